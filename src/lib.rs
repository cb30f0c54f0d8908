//! Investment Ledger API Library
//!
//! # Overview
//!
//! 투자 상품 구매부터 결제 확인, 일일 정산, 추천 보너스, 출금 승인/payout 까지
//! 돈이 움직이는 모든 상태 전이를 담당하는 백엔드.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          API                              │
//! │                                                           │
//! │  ┌─────────┐  ┌──────────┐  ┌──────────┐  ┌─────────┐   │
//! │  │ Routes  │─▶│ Services │─▶│ Store/UoW│  │  Types  │   │
//! │  └─────────┘  └────┬─────┘  └────┬─────┘  └─────────┘   │
//! │                    │             │                        │
//! └────────────────────┼─────────────┼────────────────────────┘
//!                      ▼             ▼
//!             ┌────────────────┐  ┌────────────┐
//!             │ Payment Gateway│  │ PostgreSQL │
//!             └────────────────┘  └────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `routes`: HTTP 엔드포인트 핸들러
//! - `services`: 비즈니스 로직 (투자, 정산, 추천, 출금, 게이트웨이)
//! - `db`: 데이터베이스 연동, `Store` / `UnitOfWork` trait
//! - `types`: 금액, 주문 번호

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod db;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use error::ApiError;
pub use db::Database;
pub use services::GatewayClient;

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub gateway: Arc<GatewayClient>,
    pub config: Arc<Config>,
}
