//! Referral & VIP Engine
//!
//! # Interview Q&A
//!
//! Q: VIP 레벨은 왜 증가(increment)가 아니라 재계산인가?
//! A: 누적액에서 순수 함수로 계산하면 중복 호출이나 재시도에도 결과가 같다.
//!    누적액 자체는 단조 증가하므로 레벨도 내려가지 않는다.
//!
//! Q: 추천 보너스는 몇 단계까지?
//! A: 1단계만. 직접 추천인에게 투자 금액의 30%.

use crate::db::{TransactionKind, UnitOfWork, User};
use crate::types::Money;

use super::ledger;

/// (누적 locked 투자액 하한, VIP 레벨). 높은 순.
const VIP_THRESHOLDS: [(Money, i32); 5] = [
    (Money::from_major(150_000_000), 5),
    (Money::from_major(30_000_000), 4),
    (Money::from_major(7_000_000), 3),
    (Money::from_major(1_200_000), 2),
    (Money::from_major(50_000), 1),
];

pub const REFERRAL_PERCENT: u32 = 30;

/// 이 금액 이상 투자 시 추천인에게 스핀 티켓 1장
pub const SPIN_TICKET_MIN: Money = Money::from_major(100_000);

/// 누적 locked 투자액 → VIP 레벨
pub fn vip_tier(total_invest_vip: Money) -> i32 {
    VIP_THRESHOLDS
        .iter()
        .find(|(threshold, _)| total_invest_vip >= *threshold)
        .map_or(0, |(_, level)| *level)
}

pub fn referral_bonus(amount: Money) -> Money {
    amount.percent(REFERRAL_PERCENT)
}

/// 추천 보너스 지급
///
/// 투자가 Pending → Running 으로 바뀌는 같은 `UnitOfWork` 안에서 한 번만 호출된다.
/// 추천인 row 는 투자자 row 다음에 lock 한다.
pub async fn apply_referral_bonus<T: UnitOfWork>(
    tx: &mut T,
    investor: &User,
    amount: Money,
    investment_order_id: &str,
) -> Result<(), sqlx::Error> {
    let Some(referrer_id) = investor.reff_by else {
        return Ok(());
    };
    if referrer_id == investor.id {
        tracing::warn!(user_id = investor.id, "Self referral ignored");
        return Ok(());
    }

    let Some(mut referrer) = tx.lock_user(referrer_id).await? else {
        tracing::warn!(user_id = investor.id, referrer_id, "Referrer not found, bonus skipped");
        return Ok(());
    };

    if amount >= SPIN_TICKET_MIN {
        referrer.spin_ticket = Some(referrer.spin_ticket.unwrap_or(0) + 1);
    }

    let bonus = referral_bonus(amount);
    if bonus.is_positive() {
        ledger::pay_to_user(
            tx,
            &mut referrer,
            bonus,
            TransactionKind::Team,
            format!("Referral bonus from investment {}", investment_order_id),
        )
        .await?;
    } else {
        tx.save_user(&referrer).await?;
    }

    tracing::info!(
        referrer_id,
        investor_id = investor.id,
        bonus = %bonus,
        spin_ticket = ?referrer.spin_ticket,
        "Referral bonus applied"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MemoryStore;
    use crate::db::{Store, TransactionFlow};

    #[test]
    fn test_vip_tier_thresholds() {
        assert_eq!(vip_tier(Money::ZERO), 0);
        assert_eq!(vip_tier(Money::from_major(49_999)), 0);
        assert_eq!(vip_tier(Money::from_major(50_000)), 1);
        assert_eq!(vip_tier(Money::from_major(1_200_000)), 2);
        assert_eq!(vip_tier(Money::from_major(7_000_000)), 3);
        assert_eq!(vip_tier(Money::from_major(29_999_999)), 3);
        assert_eq!(vip_tier(Money::from_major(30_000_000)), 4);
        assert_eq!(vip_tier(Money::from_major(500_000_000)), 5);
    }

    #[test]
    fn test_referral_bonus_rounds_half_up() {
        assert_eq!(referral_bonus(Money::from_major(100_000)), Money::from_major(30_000));
        assert_eq!(referral_bonus(Money::from_minor(5)), Money::from_minor(2));
    }

    #[tokio::test]
    async fn test_bonus_and_spin_ticket() {
        let store = MemoryStore::new();
        let referrer_id = store.add_user(Money::ZERO, None).await;
        let investor_id = store.add_user(Money::ZERO, Some(referrer_id)).await;

        let mut tx = store.begin().await.unwrap();
        let investor = tx.lock_user(investor_id).await.unwrap().unwrap();
        apply_referral_bonus(&mut tx, &investor, Money::from_major(100_000), "INV1")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let referrer = store.user(referrer_id).await;
        assert_eq!(referrer.balance, Money::from_major(30_000));
        assert_eq!(referrer.spin_ticket, Some(1));

        let entries = store.transactions_of(referrer_id).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].transaction_type, "team");
        assert_eq!(entries[0].transaction_flow, TransactionFlow::Debit);
    }

    #[tokio::test]
    async fn test_small_investment_gets_no_spin_ticket() {
        let store = MemoryStore::new();
        let referrer_id = store.add_user(Money::ZERO, None).await;
        let investor_id = store.add_user(Money::ZERO, Some(referrer_id)).await;

        let mut tx = store.begin().await.unwrap();
        let investor = tx.lock_user(investor_id).await.unwrap().unwrap();
        apply_referral_bonus(&mut tx, &investor, Money::from_major(50_000), "INV2")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let referrer = store.user(referrer_id).await;
        assert_eq!(referrer.balance, Money::from_major(15_000));
        assert_eq!(referrer.spin_ticket, None);
    }
}
