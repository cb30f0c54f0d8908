//! Ledger
//!
//! 사용자 잔액 변경은 반드시 여기서 ledger entry 와 함께 기록된다.
//! 호출자는 같은 `UnitOfWork` 안에서 user row 를 lock 한 상태여야 한다.

use crate::db::{NewTransaction, Transaction, TransactionFlow, TransactionKind, TransactionStatus, UnitOfWork, User};
use crate::error::ApiError;
use crate::types::{new_order_id, Money, OrderKind};

/// 플랫폼 → 사용자 지급 (수익, 원금 반환, 추천 보너스)
///
/// 잔액을 `amount` 만큼 올리고 `Success` 상태의 debit entry 를 남긴다.
pub async fn pay_to_user<T: UnitOfWork>(
    tx: &mut T,
    user: &mut User,
    amount: Money,
    kind: TransactionKind,
    message: String,
) -> Result<Transaction, sqlx::Error> {
    let order_kind = match kind {
        TransactionKind::Team => OrderKind::Team,
        TransactionKind::Withdraw => OrderKind::Withdraw,
        TransactionKind::Investment => OrderKind::Investment,
        TransactionKind::Return => OrderKind::Return,
    };

    user.balance += amount;
    tx.save_user(user).await?;

    tx.insert_transaction(&NewTransaction {
        user_id: user.id,
        amount,
        charge: Money::ZERO,
        order_id: new_order_id(order_kind, user.id),
        flow: TransactionFlow::Debit,
        kind,
        message: Some(message),
        status: TransactionStatus::Success,
    })
    .await
}

/// 출금 요청 시 잔액 차감 + `Pending` withdraw entry
///
/// entry 의 order id 는 Withdrawal 과 공유한다.
pub async fn hold_for_withdrawal<T: UnitOfWork>(
    tx: &mut T,
    user: &mut User,
    order_id: &str,
    amount: Money,
    charge: Money,
) -> Result<Transaction, sqlx::Error> {
    user.balance -= amount;
    tx.save_user(user).await?;

    tx.insert_transaction(&NewTransaction {
        user_id: user.id,
        amount,
        charge,
        order_id: order_id.to_string(),
        flow: TransactionFlow::Debit,
        kind: TransactionKind::Withdraw,
        message: Some(format!("Withdrawal {}", order_id)),
        status: TransactionStatus::Pending,
    })
    .await
}

/// 거절된 출금 환불. 기존 withdraw entry 가 `Failed` 로 결과를 기록한다.
pub async fn refund_withdrawal<T: UnitOfWork>(
    tx: &mut T,
    user: &mut User,
    order_id: &str,
    amount: Money,
) -> Result<(), ApiError> {
    user.balance += amount;
    tx.save_user(user).await?;
    set_entry_status(tx, order_id, TransactionStatus::Failed).await
}

/// order id 로 entry 상태 변경
///
/// entry row 를 lock 한 뒤 전이 테이블을 통과한 경우에만 쓴다.
/// 대상이 없으면 경고만 남긴다.
pub async fn set_entry_status<T: UnitOfWork>(
    tx: &mut T,
    order_id: &str,
    status: TransactionStatus,
) -> Result<(), ApiError> {
    let Some(entry) = tx.lock_transaction_by_order(order_id).await? else {
        tracing::warn!(order_id, ?status, "No ledger entry found for order");
        return Ok(());
    };

    entry.status.transition(status)?;
    tx.set_transaction_status(order_id, status).await?;
    Ok(())
}
