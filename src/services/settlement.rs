//! Daily Settlement Scheduler
//!
//! # Interview Q&A
//!
//! Q: 정산을 두 번 돌리면 이중 지급되지 않는가?
//! A: 대상 선정 조건(`next_return_at <= now`)을 lock 을 잡은 뒤 다시 확인하고,
//!    같은 트랜잭션 안에서 `next_return_at` 을 한 주기 뒤로 민다.
//!    두 번째 실행은 조건에서 걸러진다.
//!
//! Q: 한 건이 실패하면 전체 배치가 멈추는가?
//! A: 아니다. 투자 한 건 = 트랜잭션 한 개. 실패한 건은 롤백되어 그대로
//!    due 상태로 남고 다음 실행에서 다시 처리된다.
//!
//! Q: locked / unlocked 차이는?
//! A: unlocked 는 매 주기 수익 지급, locked 는 만기에 수익 전액을 한 번에 지급.
//!    원금은 둘 다 만기에 별도 entry 로 반환.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{Investment, InvestmentStatus, ProfitType, Store, TransactionKind, UnitOfWork};
use crate::error::ApiError;
use crate::types::Money;

use super::ledger;

/// 정산 주기 (24시간)
pub fn settlement_period() -> Duration {
    Duration::hours(24)
}

/// 한 주기 정산 결과 (순수 계산)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub total_paid: i32,
    pub total_returned: Money,
    /// 이번 주기에 지급할 수익
    pub profit_payout: Option<Money>,
    /// 만기 원금 반환
    pub principal_payout: Option<Money>,
    pub completes: bool,
}

pub fn plan_settlement(investment: &Investment, profit_type: ProfitType) -> SettlementPlan {
    let total_paid = investment.total_paid + 1;
    let completes = total_paid >= investment.duration;

    let profit_payout = match profit_type {
        ProfitType::Unlocked => Some(investment.daily_profit),
        ProfitType::Locked if completes => Some(investment.daily_profit.times(investment.duration)),
        ProfitType::Locked => None,
    }
    .filter(|amount| amount.is_positive());

    SettlementPlan {
        total_paid,
        total_returned: investment.total_returned + investment.daily_profit,
        profit_payout,
        principal_payout: completes.then_some(investment.amount),
        completes,
    }
}

/// 정산 실행 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    /// 한 주기 진행된 투자 수
    pub processed: usize,
    /// lock 후 재확인에서 대상이 아니게 된 수
    pub skipped: usize,
    /// 실패하여 롤백된 수
    pub failed: usize,
}

/// due 상태의 모든 Running 투자를 한 주기씩 진행
pub async fn run_daily_settlement<S: Store>(store: &S, now: DateTime<Utc>) -> Result<SettlementReport, ApiError> {
    let due = store.due_investment_ids(now).await?;
    let mut report = SettlementReport::default();

    tracing::info!(due = due.len(), "Daily settlement started");

    for investment_id in due {
        match settle_one(store, investment_id, now).await {
            Ok(true) => report.processed += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                tracing::warn!(investment_id, error = %e, "Settlement failed, will retry next run");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failed,
        "Daily settlement finished"
    );
    Ok(report)
}

fn is_due(investment: &Investment, now: DateTime<Utc>) -> bool {
    investment.status == InvestmentStatus::Running
        && investment.total_paid < investment.duration
        && investment.next_return_at.map_or(false, |t| t <= now)
}

/// 투자 한 건 정산. 대상이 아니면 `Ok(false)`.
async fn settle_one<S: Store>(store: &S, investment_id: i64, now: DateTime<Utc>) -> Result<bool, ApiError> {
    let mut tx = store.begin().await?;

    let Some(mut investment) = tx.lock_investment(investment_id).await? else {
        return Ok(false);
    };
    if !is_due(&investment, now) {
        return Ok(false);
    }

    let category = tx
        .find_category(investment.category_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Category".to_string()))?;

    let mut user = tx
        .lock_user(investment.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User".to_string()))?;

    let plan = plan_settlement(&investment, category.profit_type);

    if let Some(profit) = plan.profit_payout {
        let message = match category.profit_type {
            ProfitType::Unlocked => format!(
                "Profit {}/{} for investment {}",
                plan.total_paid, investment.duration, investment.order_id
            ),
            ProfitType::Locked => format!("Total profit for investment {}", investment.order_id),
        };
        ledger::pay_to_user(&mut tx, &mut user, profit, TransactionKind::Return, message).await?;
    }

    if let Some(principal) = plan.principal_payout {
        ledger::pay_to_user(
            &mut tx,
            &mut user,
            principal,
            TransactionKind::Return,
            format!("Principal return for investment {}", investment.order_id),
        )
        .await?;
    }

    investment.total_paid = plan.total_paid;
    investment.total_returned = plan.total_returned;
    investment.last_return_at = Some(now);
    investment.next_return_at = Some(now + settlement_period());
    if plan.completes {
        investment.status = investment.status.transition(InvestmentStatus::Completed)?;
    }
    tx.save_investment(&investment).await?;

    tx.commit().await?;

    tracing::debug!(
        investment_id,
        total_paid = investment.total_paid,
        completed = plan.completes,
        "Investment settled"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MemoryStore;
    use crate::db::{TransactionFlow, TransactionStatus};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn running(user_id: i64, category_id: i64, duration: i32) -> Investment {
        Investment {
            id: 0,
            user_id,
            product_id: 1,
            category_id,
            amount: Money::from_major(100_000),
            daily_profit: Money::from_major(5_000),
            duration,
            total_paid: 0,
            total_returned: Money::ZERO,
            last_return_at: None,
            next_return_at: Some(start() + settlement_period()),
            order_id: format!("INV-TEST-{}-{}", user_id, category_id),
            status: InvestmentStatus::Running,
        }
    }

    async fn seeded(profit_type: ProfitType, duration: i32) -> (MemoryStore, i64, i64) {
        let store = MemoryStore::new();
        let user_id = store.add_user(Money::ZERO, None).await;
        let category_id = store.add_category(profit_type).await;
        let investment_id = store.put_investment(running(user_id, category_id, duration)).await;
        (store, user_id, investment_id)
    }

    /// 매 주기마다 정산을 실행하고 마지막 시각을 돌려준다
    async fn run_periods(store: &MemoryStore, periods: i32) -> DateTime<Utc> {
        let mut now = start();
        for _ in 0..periods {
            now = now + settlement_period();
            run_daily_settlement(store, now).await.unwrap();
        }
        now
    }

    #[test]
    fn test_plan_unlocked_final_period() {
        let mut investment = running(1, 1, 3);
        investment.total_paid = 2;
        let plan = plan_settlement(&investment, ProfitType::Unlocked);
        assert!(plan.completes);
        assert_eq!(plan.profit_payout, Some(Money::from_major(5_000)));
        assert_eq!(plan.principal_payout, Some(Money::from_major(100_000)));
    }

    #[test]
    fn test_plan_locked_accrues_until_completion() {
        let investment = running(1, 1, 3);
        let plan = plan_settlement(&investment, ProfitType::Locked);
        assert_eq!(plan.profit_payout, None);
        assert_eq!(plan.principal_payout, None);
        assert_eq!(plan.total_returned, Money::from_major(5_000));
    }

    #[tokio::test]
    async fn test_unlocked_lifecycle() {
        let (store, user_id, investment_id) = seeded(ProfitType::Unlocked, 3).await;

        run_periods(&store, 3).await;

        let investment = store.snapshot().await.investments[&investment_id].clone();
        assert_eq!(investment.status, InvestmentStatus::Completed);
        assert_eq!(investment.total_paid, investment.duration);

        let entries = store.transactions_of(user_id).await;
        let profits = entries.iter().filter(|t| t.amount == Money::from_major(5_000)).count();
        let principals = entries.iter().filter(|t| t.amount == Money::from_major(100_000)).count();
        assert_eq!(profits, 3);
        assert_eq!(principals, 1);
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|t| t.transaction_type == "return"
            && t.transaction_flow == TransactionFlow::Debit
            && t.status == TransactionStatus::Success));

        assert_eq!(store.user(user_id).await.balance, Money::from_major(115_000));
    }

    #[tokio::test]
    async fn test_locked_lifecycle_pays_once_at_completion() {
        let (store, user_id, investment_id) = seeded(ProfitType::Locked, 3).await;

        run_periods(&store, 2).await;
        assert!(store.transactions_of(user_id).await.is_empty());
        assert_eq!(store.user(user_id).await.balance, Money::ZERO);

        let mut now = start() + settlement_period() * 3;
        run_daily_settlement(&store, now).await.unwrap();

        let entries = store.transactions_of(user_id).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().filter(|t| t.amount == Money::from_major(15_000)).count(), 1);
        assert_eq!(entries.iter().filter(|t| t.amount == Money::from_major(100_000)).count(), 1);

        let investment = store.snapshot().await.investments[&investment_id].clone();
        assert_eq!(investment.status, InvestmentStatus::Completed);
        assert_eq!(investment.total_paid, 3);

        // 완료 후에는 더 이상 정산 대상이 아님
        now = now + settlement_period() * 5;
        let report = run_daily_settlement(&store, now).await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(store.transactions_of(user_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_in_same_period_is_noop() {
        let (store, user_id, _) = seeded(ProfitType::Unlocked, 5).await;
        let now = start() + settlement_period();

        let first = run_daily_settlement(&store, now).await.unwrap();
        assert_eq!(first.processed, 1);
        let after_first = store.snapshot().await;

        let second = run_daily_settlement(&store, now).await.unwrap();
        assert_eq!(second.processed, 0);
        let after_second = store.snapshot().await;

        assert_eq!(after_first.users[&user_id].balance, after_second.users[&user_id].balance);
        assert_eq!(after_first.transactions.len(), after_second.transactions.len());
    }

    #[tokio::test]
    async fn test_not_yet_due_is_skipped() {
        let (store, user_id, _) = seeded(ProfitType::Unlocked, 5).await;

        let report = run_daily_settlement(&store, start()).await.unwrap();
        assert_eq!(report, SettlementReport::default());
        assert!(store.transactions_of(user_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let store = MemoryStore::new();
        let user_id = store.add_user(Money::ZERO, None).await;
        let category_id = store.add_category(ProfitType::Unlocked).await;
        store.put_investment(running(user_id, category_id, 5)).await;

        // 존재하지 않는 사용자의 투자는 실패
        let mut orphan = running(9_999, category_id, 5);
        orphan.order_id = "INV-ORPHAN".to_string();
        let orphan_id = store.put_investment(orphan).await;

        let now = start() + settlement_period();
        let report = run_daily_settlement(&store, now).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);

        // 실패 건은 due 상태 그대로
        let orphan = store.snapshot().await.investments[&orphan_id].clone();
        assert_eq!(orphan.total_paid, 0);
        assert_eq!(store.user(user_id).await.balance, Money::from_major(5_000));
    }

    #[tokio::test]
    async fn test_suspended_is_excluded() {
        let store = MemoryStore::new();
        let user_id = store.add_user(Money::ZERO, None).await;
        let category_id = store.add_category(ProfitType::Unlocked).await;
        let mut investment = running(user_id, category_id, 5);
        investment.status = InvestmentStatus::Suspended;
        store.put_investment(investment).await;

        let report = run_daily_settlement(&store, start() + settlement_period()).await.unwrap();
        assert_eq!(report.processed, 0);
    }
}
