//! Withdrawal State Machine
//!
//! # Interview Q&A
//!
//! Q: 출금 요청 시점에 잔액을 차감하는 이유는?
//! A: 승인 대기 중에 같은 잔액으로 재투자/재출금하는 것을 막기 위함.
//!    거절 시 원금(`amount`) 전액을 환불하고 ledger entry 를 Failed 로 기록.
//!
//! Q: 자동 payout 중 게이트웨이가 실패하면?
//! A: 출금 row lock 을 쥔 채로 게이트웨이를 호출하고, 실패하면 트랜잭션을 버린다.
//!    출금은 Pending 그대로 남아 운영자가 재승인할 수 있다.
//!
//! Q: 승인 후 payout 실패 webhook 이 오면?
//! A: 자동 payout 으로 나간 건(`payout_reference` 있음)만 Success → Pending 으로 되돌린다.
//!    잔액은 이미 차감된 상태이므로 건드리지 않는다.
//!
//! Q: 마스킹(masking) 정책이란?
//! A: 설정 금액 이상 출금은 하우스 계좌로 대체 송금 (면제 사용자 제외).
//!    관리자 화면 표시와 실제 payout 목적지가 같은 resolver 를 쓴다.

use serde::{Deserialize, Serialize};

use crate::db::{
    BankAccount, NewWithdrawal, PayoutMasking, Store, TransactionStatus, UnitOfWork, Withdrawal,
    WithdrawalStatus,
};
use crate::error::ApiError;
use crate::types::{new_order_id, Money, OrderKind};

use super::gateway::{PaymentGateway, PayoutRequest};
use super::ledger;
use super::webhook::{event_key, GatewayStatus, WebhookOutcome, PAYOUT_SOURCE};

/// 출금 요청
#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalRequest {
    pub bank_account_id: i64,
    pub amount: Money,
}

/// 출금 요청 생성
///
/// 잔액 차감 + Withdrawal(Pending) + Transaction(debit, withdraw, Pending) 을 하나의 단위로.
pub async fn request_withdrawal<S: Store>(
    store: &S,
    user_id: i64,
    request: &WithdrawalRequest,
) -> Result<Withdrawal, ApiError> {
    let settings = store.platform_settings().await?;
    let amount = request.amount;

    if !amount.is_positive() || amount < settings.min_withdraw {
        return Err(ApiError::ValidationError(format!(
            "minimum withdrawal is {}",
            settings.min_withdraw
        )));
    }

    let account = store
        .find_bank_account(request.bank_account_id)
        .await?
        .filter(|a| a.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound("Bank account".to_string()))?;

    let charge = amount.percent(settings.withdraw_charge_percent.max(0) as u32);
    let order_id = new_order_id(OrderKind::Withdraw, user_id);

    let mut tx = store.begin().await?;

    let mut user = tx
        .lock_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User".to_string()))?;

    if user.balance < amount {
        return Err(ApiError::RuleViolation("insufficient balance".to_string()));
    }

    ledger::hold_for_withdrawal(&mut tx, &mut user, &order_id, amount, charge).await?;
    let withdrawal = tx
        .insert_withdrawal(&NewWithdrawal::new(user_id, account.id, order_id, amount, charge))
        .await?;

    tx.commit().await?;

    tracing::info!(
        user_id,
        withdrawal_id = withdrawal.id,
        order_id = %withdrawal.order_id,
        amount = %amount,
        charge = %charge,
        "Withdrawal requested"
    );
    Ok(withdrawal)
}

/// 실제 송금 목적지 (마스킹 적용 후)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutDestination {
    pub bank_name: String,
    pub bank_code: String,
    pub account_name: String,
    pub account_number: String,
    pub masked: bool,
}

/// 마스킹 정책 적용
///
/// 금액이 기준 이상이고 면제 대상이 아니면 은행/계좌번호를 하우스 계좌로 대체한다.
/// 예금주 이름은 사용자 계좌의 것을 유지한다.
pub fn resolve_payout_destination(
    withdrawal: &Withdrawal,
    account: &BankAccount,
    masking: Option<&PayoutMasking>,
) -> PayoutDestination {
    match masking {
        Some(policy)
            if !policy.is_exempt(withdrawal.user_id) && withdrawal.amount >= policy.withdraw_amount =>
        {
            PayoutDestination {
                bank_name: policy.bank_name.clone(),
                bank_code: policy.bank_code.clone(),
                account_name: account.account_name.clone(),
                account_number: policy.account_number.clone(),
                masked: true,
            }
        }
        _ => PayoutDestination {
            bank_name: account.bank_name.clone(),
            bank_code: account.bank_code.clone(),
            account_name: account.account_name.clone(),
            account_number: account.account_number.clone(),
            masked: false,
        },
    }
}

async fn destination_for<S: Store>(store: &S, withdrawal: &Withdrawal) -> Result<PayoutDestination, ApiError> {
    let account = store
        .find_bank_account(withdrawal.bank_account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Bank account".to_string()))?;
    let masking = store.payout_masking().await?;
    Ok(resolve_payout_destination(withdrawal, &account, masking.as_ref()))
}

/// 관리자 조회용 출금 정보 (마스킹 적용)
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalView {
    pub id: i64,
    pub user_id: i64,
    pub bank_account_id: i64,
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    pub amount: Money,
    pub charge: Money,
    pub final_amount: Money,
    pub order_id: String,
    pub status: WithdrawalStatus,
}

impl WithdrawalView {
    fn new(withdrawal: Withdrawal, destination: PayoutDestination) -> Self {
        Self {
            id: withdrawal.id,
            user_id: withdrawal.user_id,
            bank_account_id: withdrawal.bank_account_id,
            bank_name: destination.bank_name,
            account_name: destination.account_name,
            account_number: destination.account_number,
            amount: withdrawal.amount,
            charge: withdrawal.charge,
            final_amount: withdrawal.final_amount,
            order_id: withdrawal.order_id,
            status: withdrawal.status,
        }
    }
}

pub async fn withdrawal_view<S: Store>(store: &S, withdrawal_id: i64) -> Result<WithdrawalView, ApiError> {
    let withdrawal = store
        .find_withdrawal(withdrawal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Withdrawal".to_string()))?;
    let destination = destination_for(store, &withdrawal).await?;
    Ok(WithdrawalView::new(withdrawal, destination))
}

/// 출금 승인
///
/// - 수동 모드: Success 로 기록만 (운영자가 직접 송금)
/// - 자동 모드: 게이트웨이 payout 요청 성공 시에만 Success
pub async fn approve<S, G>(store: &S, gateway: &G, withdrawal_id: i64) -> Result<Withdrawal, ApiError>
where
    S: Store,
    G: PaymentGateway + ?Sized,
{
    // 트랜잭션 밖 읽기: 정책과 목적지 (bank_account_id 는 불변)
    let settings = store.platform_settings().await?;
    let snapshot = store
        .find_withdrawal(withdrawal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Withdrawal".to_string()))?;
    let destination = if settings.auto_withdraw {
        Some(destination_for(store, &snapshot).await?)
    } else {
        None
    };

    let mut tx = store.begin().await?;

    let mut withdrawal = tx
        .lock_withdrawal(withdrawal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Withdrawal".to_string()))?;
    let next = withdrawal.status.transition(WithdrawalStatus::Success)?;

    if let Some(destination) = destination {
        let payout = gateway
            .create_payout(&PayoutRequest {
                reference_id: withdrawal.order_id.clone(),
                amount: withdrawal.final_amount,
                description: format!("Withdrawal #{}", withdrawal.order_id),
                bank_code: destination.bank_code,
                account_number: destination.account_number,
                account_name: destination.account_name,
            })
            .await?;

        withdrawal.payout_attempts += 1;
        withdrawal.payout_reference = Some(payout.payout_id.unwrap_or_else(|| withdrawal.order_id.clone()));
        tracing::info!(
            withdrawal_id,
            masked = destination.masked,
            attempt = withdrawal.payout_attempts,
            payout_status = ?payout.status,
            "Automatic payout accepted by gateway"
        );
    }

    withdrawal.status = next;
    tx.save_withdrawal(&withdrawal).await?;
    ledger::set_entry_status(&mut tx, &withdrawal.order_id, TransactionStatus::Success).await?;
    tx.commit().await?;

    tracing::info!(
        withdrawal_id,
        order_id = %withdrawal.order_id,
        automatic = settings.auto_withdraw,
        "Withdrawal approved"
    );
    Ok(withdrawal)
}

/// 출금 거절: Failed + 원금 환불
pub async fn reject<S: Store>(store: &S, withdrawal_id: i64) -> Result<Withdrawal, ApiError> {
    let mut tx = store.begin().await?;

    let mut withdrawal = tx
        .lock_withdrawal(withdrawal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Withdrawal".to_string()))?;
    withdrawal.status = withdrawal.status.transition(WithdrawalStatus::Failed)?;

    let mut user = tx
        .lock_user(withdrawal.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User".to_string()))?;

    tx.save_withdrawal(&withdrawal).await?;
    ledger::refund_withdrawal(&mut tx, &mut user, &withdrawal.order_id, withdrawal.amount).await?;
    tx.commit().await?;

    tracing::info!(
        withdrawal_id,
        user_id = user.id,
        refunded = %withdrawal.amount,
        "Withdrawal rejected"
    );
    Ok(withdrawal)
}

/// payout webhook 에서 추출한 값
#[derive(Debug, Clone)]
pub struct PayoutNotification {
    /// = Withdrawal order id
    pub reference_id: String,
    pub gateway_id: Option<String>,
    pub status: String,
}

/// payout 결과 반영
///
/// 성공 callback 은 무시 (승인 시 이미 Success). 그 외에는 자동 payout 으로 나간
/// Success 출금만 Pending 으로 되돌린다.
///
/// receipt 키에는 payout 시도 횟수가 붙는다. 재승인 후 같은 id 로 다시 실패해도
/// 새 시도의 callback 으로 처리된다.
pub async fn reconcile_payout_webhook<S: Store>(
    store: &S,
    notification: &PayoutNotification,
) -> Result<WebhookOutcome, ApiError> {
    let status = GatewayStatus::parse(&notification.status);
    if status == GatewayStatus::Success {
        tracing::debug!(order_id = %notification.reference_id, "Payout success callback acknowledged");
        return Ok(WebhookOutcome::Ignored("payout succeeded".to_string()));
    }

    let order_id = notification.reference_id.as_str();

    let mut tx = store.begin().await?;

    // 모르는 출금은 404: 게이트웨이가 재전송한다
    let mut withdrawal = tx
        .lock_withdrawal_by_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Withdrawal".to_string()))?;

    let key = format!(
        "{}#{}",
        event_key(notification.gateway_id.as_deref(), order_id),
        withdrawal.payout_attempts
    );
    if !tx.record_webhook(PAYOUT_SOURCE, &key, status.key()).await? {
        tracing::debug!(order_id, key = %key, "Duplicate payout webhook");
        return Ok(WebhookOutcome::Duplicate);
    }

    if withdrawal.status != WithdrawalStatus::Success || withdrawal.payout_reference.is_none() {
        tx.commit().await?;
        tracing::info!(
            order_id,
            status = ?withdrawal.status,
            "Payout webhook ignored, no automatic payout in flight"
        );
        return Ok(WebhookOutcome::Ignored(format!("withdrawal is {:?}", withdrawal.status)));
    }

    withdrawal.status = withdrawal.status.transition(WithdrawalStatus::Pending)?;
    withdrawal.payout_reference = None;
    tx.save_withdrawal(&withdrawal).await?;
    ledger::set_entry_status(&mut tx, order_id, TransactionStatus::Pending).await?;
    tx.commit().await?;

    tracing::warn!(
        order_id,
        withdrawal_id = withdrawal.id,
        gateway_status = status.key(),
        "Payout failed, withdrawal reverted to Pending"
    );
    Ok(WebhookOutcome::Applied)
}
