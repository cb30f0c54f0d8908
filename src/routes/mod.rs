//! API Routes Module
//!
//! 모든 HTTP 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크
//! - `/investments`, `/payments/:order_id` - 투자 구매, 결제 안내
//! - `/payments/webhook`, `/payouts/webhook` - 게이트웨이 callback
//! - `/cron/daily-returns` - 일일 정산 트리거
//! - `/withdrawals`, `/admin/withdrawals/*` - 출금 요청/승인/거절
//!
//! 사용자 인증은 앞단 게이트웨이가 처리하고 `X-User-Id` 헤더로 전달한다.

pub mod cron;
pub mod health;
pub mod investment;
pub mod webhook;
pub mod withdrawal;

use axum::{
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{error::ApiError, AppState};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const CRON_KEY_HEADER: &str = "x-cron-key";

/// 인증 계층이 넣어 준 사용자 id
pub fn caller_id(headers: &HeaderMap) -> Result<i64, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or(ApiError::Unauthorized)
}

/// 라우터 생성
///
/// # Route Structure
///
/// ```text
/// GET  /health                          - 서버 상태 확인
///
/// POST /investments                     - 투자 구매 (X-User-Id)
/// GET  /payments/:order_id              - 결제 안내 조회 (X-User-Id)
///
/// POST /payments/webhook                - 결제 callback
/// POST /payouts/webhook                 - payout callback
///
/// POST /cron/daily-returns              - 일일 정산 (X-CRON-KEY)
///
/// POST /withdrawals                     - 출금 요청 (X-User-Id)
/// GET  /admin/withdrawals/:id           - 출금 조회 (마스킹 적용)
/// PUT  /admin/withdrawals/:id/approve   - 출금 승인
/// PUT  /admin/withdrawals/:id/reject    - 출금 거절
/// ```
pub fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션에서는 ALLOWED_ORIGINS 만 허용
    // 개발 환경에서는 localhost 허용
    let cors = if state.config.is_production() {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                HeaderName::from_static(USER_ID_HEADER),
            ])
    } else {
        CorsLayer::new()
            .allow_origin([
                HeaderValue::from_static("http://localhost:5173"),  // Vite dev server
                HeaderValue::from_static("http://localhost:3000"),  // Alternative
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Health check
        .route("/health", get(health::health_check))

        // Investment
        .route("/investments", post(investment::create_investment))
        .route("/payments/:order_id", get(investment::get_payment))

        // Gateway callbacks
        .route("/payments/webhook", post(webhook::payment_webhook))
        .route("/payouts/webhook", post(webhook::payout_webhook))

        // Settlement
        .route("/cron/daily-returns", post(cron::daily_returns))

        // Withdrawal
        .route("/withdrawals", post(withdrawal::request_withdrawal))
        .route("/admin/withdrawals/:id", get(withdrawal::get_withdrawal))
        .route("/admin/withdrawals/:id/approve", put(withdrawal::approve_withdrawal))
        .route("/admin/withdrawals/:id/reject", put(withdrawal::reject_withdrawal))

        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors)

        // 상태 주입
        .with_state(state)
}
