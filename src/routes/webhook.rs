//! Gateway Webhook Endpoints
//!
//! # Interview Q&A
//!
//! Q: webhook 응답 코드는 어떻게 정하는가?
//! A: 게이트웨이는 non-200 이면 재전송한다 (at-least-once)
//!    - 처리 완료 / 중복 / 무시: 200
//!    - 아직 모르는 주문(저장 전 도착), DB 오류: non-200 → 재시도 유도

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::ApiError,
    services::{
        investment::{self, PaymentNotification},
        withdrawal::{self, PayoutNotification},
        WebhookOutcome,
    },
    AppState,
};

/// callback 본문의 데이터 부분
#[derive(Debug, Default, Deserialize)]
pub struct CallbackData {
    /// 게이트웨이 결제/payout id
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    /// 숫자 또는 문자열로 온다
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
}

/// 게이트웨이 callback 본문
///
/// `{"callback_code", "callback_message", "callback_data": {...}}` 형태와
/// 데이터만 평평하게 보내는 형태를 모두 받는다.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CallbackPayload {
    Envelope { callback_data: CallbackData },
    Flat(CallbackData),
}

impl CallbackPayload {
    fn into_data(self) -> CallbackData {
        match self {
            CallbackPayload::Envelope { callback_data } => callback_data,
            CallbackPayload::Flat(data) => data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub outcome: WebhookOutcome,
}

/// reference id, status 필수
fn required(data: &CallbackData) -> Result<(String, String), ApiError> {
    let reference_id = data
        .reference_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("reference_id is required".to_string()))?;
    let status = data
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("status is required".to_string()))?;
    Ok((reference_id.to_string(), status.to_string()))
}

/// 정수 통화 단위 금액
fn whole_amount(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

/// POST /payments/webhook
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<CallbackPayload>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let data = payload.into_data();
    let (reference_id, status) = required(&data)?;

    tracing::info!(reference_id = %reference_id, status = %status, "Payment webhook received");

    let notification = PaymentNotification {
        reference_id,
        gateway_id: data.id,
        status,
        amount: data.amount.as_ref().and_then(whole_amount),
    };

    let outcome = investment::confirm_payment(state.db.as_ref(), &notification, chrono::Utc::now()).await?;

    Ok(Json(WebhookResponse { success: true, outcome }))
}

/// POST /payouts/webhook
pub async fn payout_webhook(
    State(state): State<AppState>,
    Json(payload): Json<CallbackPayload>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let data = payload.into_data();
    let (reference_id, status) = required(&data)?;

    tracing::info!(reference_id = %reference_id, status = %status, "Payout webhook received");

    let notification = PayoutNotification {
        reference_id,
        gateway_id: data.id,
        status,
    };

    let outcome = withdrawal::reconcile_payout_webhook(state.db.as_ref(), &notification).await?;

    Ok(Json(WebhookResponse { success: true, outcome }))
}
