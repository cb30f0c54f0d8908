//! Investment Endpoints
//!
//! 투자 구매와 결제 안내 조회.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use crate::{
    error::ApiError,
    services::investment::{self, PaymentDetails, PurchaseReceipt, PurchaseRequest},
    AppState,
};

use super::caller_id;

/// POST /investments
///
/// # Flow
///
/// 1. 결제 수단, VIP 레벨, 구매 한도, 금액 제약 검증
/// 2. 게이트웨이 charge 생성 (QRIS 또는 VA)
/// 3. Investment / Payment / Transaction 을 Pending 으로 저장
/// 4. 결제 코드/링크 반환
pub async fn create_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<PurchaseReceipt>, ApiError> {
    let user_id = caller_id(&headers)?;

    let receipt = investment::create_investment(
        state.db.as_ref(),
        state.gateway.as_ref(),
        user_id,
        &req,
        chrono::Utc::now(),
    )
    .await?;

    Ok(Json(receipt))
}

/// GET /payments/:order_id
pub async fn get_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentDetails>, ApiError> {
    let user_id = caller_id(&headers)?;
    let details = investment::payment_details(state.db.as_ref(), user_id, &order_id).await?;
    Ok(Json(details))
}
