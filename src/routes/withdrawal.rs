//! Withdrawal Endpoints
//!
//! 사용자 출금 요청과 관리자 승인/거절.
//! 관리자 권한 확인은 앞단 인증 계층의 책임.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;

use crate::{
    db::{Withdrawal, WithdrawalStatus},
    error::ApiError,
    services::withdrawal::{self, WithdrawalRequest, WithdrawalView},
    types::Money,
    AppState,
};

use super::caller_id;

/// 출금 상태 응답
#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub id: i64,
    pub order_id: String,
    pub amount: Money,
    pub charge: Money,
    pub final_amount: Money,
    pub status: WithdrawalStatus,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(w: Withdrawal) -> Self {
        Self {
            id: w.id,
            order_id: w.order_id,
            amount: w.amount,
            charge: w.charge,
            final_amount: w.final_amount,
            status: w.status,
        }
    }
}

/// POST /withdrawals
pub async fn request_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WithdrawalRequest>,
) -> Result<Json<WithdrawalResponse>, ApiError> {
    let user_id = caller_id(&headers)?;
    let created = withdrawal::request_withdrawal(state.db.as_ref(), user_id, &req).await?;
    Ok(Json(created.into()))
}

/// GET /admin/withdrawals/:id
///
/// 마스킹 정책이 적용된 계좌 정보를 돌려준다 (실제 payout 목적지와 동일).
pub async fn get_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<WithdrawalView>, ApiError> {
    let view = withdrawal::withdrawal_view(state.db.as_ref(), id).await?;
    Ok(Json(view))
}

/// PUT /admin/withdrawals/:id/approve
///
/// # Modes
///
/// - 수동 (`settings.auto_withdraw = false`): 상태만 Success
/// - 자동: 게이트웨이 payout 요청 → 성공 시 Success, 실패 시 502 + Pending 유지
pub async fn approve_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<WithdrawalResponse>, ApiError> {
    let approved = withdrawal::approve(state.db.as_ref(), state.gateway.as_ref(), id).await?;
    Ok(Json(approved.into()))
}

/// PUT /admin/withdrawals/:id/reject
pub async fn reject_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<WithdrawalResponse>, ApiError> {
    let rejected = withdrawal::reject(state.db.as_ref(), id).await?;
    Ok(Json(rejected.into()))
}
