//! Services Module
//!
//! 비즈니스 로직을 담당하는 서비스 레이어.
//! 모든 서비스 함수는 `Store` 를 인자로 받는다 (전역 DB 핸들 없음).
//!
//! # Services
//! - `gateway`: 결제 게이트웨이 클라이언트 (charge / payout)
//! - `catalog`: 상품 → 카테고리 정책 조회
//! - `ledger`: 잔액 변경 + ledger entry 쌍 기록
//! - `investment`: 투자 생성, 결제 webhook 반영
//! - `settlement`: 일일 정산
//! - `referral`: 추천 보너스, VIP 레벨
//! - `withdrawal`: 출금 요청/승인/거절, payout webhook 반영
//! - `webhook`: webhook 상태 해석, 중복 처리 키

pub mod catalog;
pub mod gateway;
pub mod investment;
pub mod ledger;
pub mod referral;
pub mod settlement;
pub mod webhook;
pub mod withdrawal;

pub use gateway::{GatewayClient, GatewayError, PaymentGateway};
pub use webhook::WebhookOutcome;
