//! Database Models
//!
//! Entities of the investment ledger and their status machines.
//! Every status is a closed Postgres enum; legal moves live in the
//! `can_transition_to` tables below, never in ad hoc string checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

use crate::types::Money;

/// 허용되지 않은 상태 전이
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

// ============ Status enums ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "catalog_status", rename_all = "PascalCase")]
pub enum CatalogStatus {
    Active,
    Inactive,
}

/// 카테고리 수익 지급 정책
///
/// - `Locked`: 수익은 만기에 원금과 함께 일괄 지급
/// - `Unlocked`: 매 정산 주기마다 수익 지급, 원금은 만기에 반환
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "profit_type", rename_all = "lowercase")]
pub enum ProfitType {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "investment_status", rename_all = "PascalCase")]
pub enum InvestmentStatus {
    Pending,
    Running,
    Completed,
    Suspended,
    Cancelled,
}

impl InvestmentStatus {
    /// 상태 전이 테이블
    ///
    /// ```text
    /// Pending   → Running | Cancelled
    /// Running   → Completed | Suspended
    /// Suspended → Running
    /// Completed, Cancelled: terminal
    /// ```
    pub fn can_transition_to(self, next: InvestmentStatus) -> bool {
        use InvestmentStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Suspended)
                | (Suspended, Running)
        )
    }

    /// 구매 한도 계산 시 포함되는 상태
    pub fn counts_toward_limit(self) -> bool {
        matches!(
            self,
            InvestmentStatus::Running | InvestmentStatus::Completed | InvestmentStatus::Suspended
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "PascalCase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!((self, next), (Pending, Success) | (Pending, Failed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "PascalCase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    /// `Success → Pending` 은 payout 실패 webhook 으로 출금이 되돌려질 때만 사용
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Success) | (Pending, Failed) | (Success, Pending)
        )
    }
}

/// 자금 흐름 방향
///
/// - `Debit`: 플랫폼 → 사용자 (수익, 원금 반환, 보너스, 출금)
/// - `Credit`: 사용자 → 플랫폼 (투자 결제)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "transaction_flow", rename_all = "lowercase")]
pub enum TransactionFlow {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "PascalCase")]
pub enum WithdrawalStatus {
    Pending,
    Success,
    Failed,
}

impl WithdrawalStatus {
    /// ```text
    /// Pending → Success | Failed
    /// Success → Pending   (payout 실패 webhook)
    /// ```
    pub fn can_transition_to(self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Success) | (Pending, Failed) | (Success, Pending)
        )
    }
}

macro_rules! checked_transition {
    ($ty:ty, $entity:literal) => {
        impl $ty {
            /// 전이 테이블에 없는 이동이면 `TransitionError`
            pub fn transition(self, next: $ty) -> Result<$ty, TransitionError> {
                if self.can_transition_to(next) {
                    Ok(next)
                } else {
                    Err(TransitionError {
                        entity: $entity,
                        from: format!("{:?}", self),
                        to: format!("{:?}", next),
                    })
                }
            }
        }
    };
}

checked_transition!(InvestmentStatus, "investment");
checked_transition!(PaymentStatus, "payment");
checked_transition!(TransactionStatus, "transaction");
checked_transition!(WithdrawalStatus, "withdrawal");

/// Ledger entry 종류 (`transactions.transaction_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Investment,
    Return,
    Team,
    Withdraw,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Investment => "investment",
            TransactionKind::Return => "return",
            TransactionKind::Team => "team",
            TransactionKind::Withdraw => "withdraw",
        }
    }
}

// ============ Entities ============

/// 사용자 (잔액, VIP 레벨, 누적 투자액)
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub balance: Money,
    /// VIP 레벨 (0–5)
    pub level: i32,
    pub total_invest: Money,
    /// locked 카테고리 투자 누적액만 집계
    pub total_invest_vip: Money,
    pub reff_by: Option<i64>,
    pub spin_ticket: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub status: CatalogStatus,
    pub profit_type: ProfitType,
}

#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub amount: Money,
    pub daily_profit: Money,
    /// 정산 주기 수
    pub duration: i32,
    pub required_vip: i32,
    /// 0 = 무제한
    pub purchase_limit: i32,
    pub status: CatalogStatus,
}

#[derive(Debug, Clone, FromRow)]
pub struct Investment {
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    /// 생성 시점 스냅샷. 이후 카테고리 변경과 무관하게 정산 정책을 결정한다.
    pub category_id: i64,
    pub amount: Money,
    pub daily_profit: Money,
    pub duration: i32,
    pub total_paid: i32,
    pub total_returned: Money,
    pub last_return_at: Option<DateTime<Utc>>,
    pub next_return_at: Option<DateTime<Utc>>,
    pub order_id: String,
    pub status: InvestmentStatus,
}

#[derive(Debug, Clone)]
pub struct NewInvestment {
    pub user_id: i64,
    pub product_id: i64,
    pub category_id: i64,
    pub amount: Money,
    pub daily_profit: Money,
    pub duration: i32,
    pub order_id: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub id: i64,
    pub investment_id: i64,
    /// 게이트웨이 correlation id
    pub reference_id: Option<String>,
    pub order_id: String,
    pub payment_method: Option<String>,
    pub payment_channel: Option<String>,
    /// QR string 또는 VA 번호
    pub payment_code: Option<String>,
    pub payment_link: Option<String>,
    pub status: PaymentStatus,
    pub expired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub investment_id: i64,
    pub reference_id: Option<String>,
    pub order_id: String,
    pub payment_method: String,
    pub payment_channel: Option<String>,
    pub payment_code: Option<String>,
    pub payment_link: Option<String>,
    pub expired_at: DateTime<Utc>,
}

/// Ledger entry
#[derive(Debug, Clone, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub amount: Money,
    pub charge: Money,
    pub order_id: String,
    pub transaction_flow: TransactionFlow,
    pub transaction_type: String,
    pub message: Option<String>,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: i64,
    pub amount: Money,
    pub charge: Money,
    pub order_id: String,
    pub flow: TransactionFlow,
    pub kind: TransactionKind,
    pub message: Option<String>,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, FromRow)]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: i64,
    pub bank_account_id: i64,
    pub amount: Money,
    pub charge: Money,
    /// DB generated column (`amount - charge`)
    pub final_amount: Money,
    pub order_id: String,
    pub status: WithdrawalStatus,
    /// 자동 payout 시 게이트웨이가 돌려준 payout id
    pub payout_reference: Option<String>,
    /// 자동 payout 요청 횟수. payout webhook receipt 키에 포함된다.
    pub payout_attempts: i32,
}

/// 출금 생성 입력. `final_amount` 는 항상 `amount`, `charge` 에서 유도된다.
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub user_id: i64,
    pub bank_account_id: i64,
    pub order_id: String,
    amount: Money,
    charge: Money,
}

impl NewWithdrawal {
    pub fn new(user_id: i64, bank_account_id: i64, order_id: String, amount: Money, charge: Money) -> Self {
        Self { user_id, bank_account_id, order_id, amount, charge }
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn charge(&self) -> Money {
        self.charge
    }

    pub fn final_amount(&self) -> Money {
        self.amount - self.charge
    }
}

/// 사용자 연결 계좌 (banks 조인 결과)
#[derive(Debug, Clone, FromRow)]
pub struct BankAccount {
    pub id: i64,
    pub user_id: i64,
    pub bank_name: String,
    pub bank_code: String,
    pub account_name: String,
    pub account_number: String,
}

/// 플랫폼 운영 설정 (`settings` 단일 row)
#[derive(Debug, Clone, FromRow)]
pub struct PlatformSettings {
    /// true 면 승인 시 게이트웨이 payout 자동 요청
    pub auto_withdraw: bool,
    pub withdraw_charge_percent: i32,
    pub min_withdraw: Money,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            auto_withdraw: false,
            withdraw_charge_percent: 10,
            min_withdraw: Money::from_major(50_000),
        }
    }
}

/// 출금 계좌 마스킹 정책 (`payment_settings` 단일 row)
#[derive(Debug, Clone, FromRow)]
pub struct PayoutMasking {
    /// 이 금액 이상이면 하우스 계좌로 대체
    pub withdraw_amount: Money,
    pub bank_name: String,
    pub bank_code: String,
    pub account_number: String,
    /// 마스킹 제외 사용자
    pub exempt_user_ids: Vec<i64>,
}

impl PayoutMasking {
    pub fn is_exempt(&self, user_id: i64) -> bool {
        self.exempt_user_ids.contains(&user_id)
    }
}
