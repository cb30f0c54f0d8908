//! Investment State Machine + Purchase Webhook Reconciler
//!
//! # Interview Q&A
//!
//! Q: 결제 게이트웨이 호출과 DB 저장 순서는?
//! A: 게이트웨이 charge 생성 → 성공 시에만 Investment + Payment + Transaction 을
//!    한 트랜잭션으로 저장. 게이트웨이가 실패하면 아무 row 도 남지 않는다.
//!
//! Q: webhook 이 저장보다 먼저 도착하면?
//! A: order 를 찾지 못해 404 를 돌려준다. 게이트웨이는 non-200 이면 재전송하므로
//!    커밋 이후의 재시도에서 정상 처리된다.
//!
//! Q: 결제 확인 시 무엇이 한 단위로 묶이는가?
//! A: Investment → Running, Payment/Transaction → Success, 사용자 누적 투자액,
//!    VIP 재계산, 추천 보너스. 전부 하나의 `UnitOfWork`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{
    InvestmentStatus, NewInvestment, NewPayment, NewTransaction, PaymentStatus, ProfitType, Store,
    TransactionFlow, TransactionKind, TransactionStatus, UnitOfWork,
};
use crate::error::ApiError;
use crate::types::{new_order_id, Money, OrderKind};

use super::catalog;
use super::gateway::{ChargeRequest, PaymentGateway, PaymentMethod};
use super::ledger;
use super::referral;
use super::settlement::settlement_period;
use super::webhook::{event_key, GatewayStatus, WebhookOutcome, PAYMENT_SOURCE};

/// 게이트웨이가 만료 시각을 주지 않았을 때의 결제 유효 시간
fn default_payment_window() -> Duration {
    Duration::minutes(15)
}

/// 투자 구매 요청
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseRequest {
    pub product_id: i64,
    pub payment_method: String,
    #[serde(default)]
    pub payment_channel: Option<String>,
}

/// 구매 결과: 결제 안내 정보
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub investment_id: i64,
    pub order_id: String,
    pub amount: Money,
    pub payment_method: String,
    pub payment_channel: Option<String>,
    pub payment_code: Option<String>,
    pub payment_link: Option<String>,
    pub expired_at: DateTime<Utc>,
    pub status: InvestmentStatus,
}

/// 투자 생성
///
/// 검증 → 게이트웨이 charge → 원자적 저장 순서. 검증 실패는 게이트웨이 호출 전에 거른다.
pub async fn create_investment<S, G>(
    store: &S,
    gateway: &G,
    user_id: i64,
    request: &PurchaseRequest,
    now: DateTime<Utc>,
) -> Result<PurchaseReceipt, ApiError>
where
    S: Store,
    G: PaymentGateway + ?Sized,
{
    let method = PaymentMethod::parse(&request.payment_method, request.payment_channel.as_deref())
        .map_err(ApiError::ValidationError)?;

    let user = store
        .find_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User".to_string()))?;

    let catalog::ResolvedProduct { product, category } =
        catalog::resolve_product(store, request.product_id).await?;

    if user.level < product.required_vip {
        return Err(ApiError::RuleViolation(format!(
            "VIP level {} required for this product",
            product.required_vip
        )));
    }

    if product.purchase_limit > 0 {
        let purchased = store.count_limited_purchases(user_id, product.id).await?;
        if purchased >= product.purchase_limit as i64 {
            return Err(ApiError::RuleViolation(
                "purchase limit reached for this product".to_string(),
            ));
        }
    }

    method
        .check_amount(product.amount)
        .map_err(ApiError::ValidationError)?;

    let order_id = new_order_id(OrderKind::Investment, user_id);

    let charge = gateway
        .create_charge(&ChargeRequest {
            reference_id: order_id.clone(),
            amount: product.amount,
            method: method.clone(),
        })
        .await?;

    let expired_at = charge.expires_at.unwrap_or(now + default_payment_window());

    let mut tx = store.begin().await?;

    let investment = tx
        .insert_investment(&NewInvestment {
            user_id,
            product_id: product.id,
            category_id: category.id,
            amount: product.amount,
            daily_profit: product.daily_profit,
            duration: product.duration,
            order_id: order_id.clone(),
        })
        .await?;

    let payment = tx
        .insert_payment(&NewPayment {
            investment_id: investment.id,
            reference_id: charge.gateway_id.clone(),
            order_id: order_id.clone(),
            payment_method: method.method_name().to_string(),
            payment_channel: method.channel().map(str::to_string),
            payment_code: charge.payment_code.clone(),
            payment_link: charge.checkout_url.clone(),
            expired_at,
        })
        .await?;

    tx.insert_transaction(&NewTransaction {
        user_id,
        amount: product.amount,
        charge: Money::ZERO,
        order_id: order_id.clone(),
        flow: TransactionFlow::Credit,
        kind: TransactionKind::Investment,
        message: Some(format!("Investment in {}", product.name)),
        status: TransactionStatus::Pending,
    })
    .await?;

    tx.commit().await?;

    tracing::info!(
        user_id,
        product_id = product.id,
        order_id = %order_id,
        amount = %product.amount,
        method = method.method_name(),
        "Investment created, awaiting payment"
    );

    Ok(PurchaseReceipt {
        investment_id: investment.id,
        order_id,
        amount: investment.amount,
        payment_method: method.method_name().to_string(),
        payment_channel: payment.payment_channel,
        payment_code: payment.payment_code,
        payment_link: payment.payment_link,
        expired_at,
        status: investment.status,
    })
}

/// 결제 webhook 에서 추출한 값
#[derive(Debug, Clone)]
pub struct PaymentNotification {
    /// = Investment order id
    pub reference_id: String,
    /// 게이트웨이 결제 id
    pub gateway_id: Option<String>,
    pub status: String,
    /// 정수 통화 단위
    pub amount: Option<i64>,
}

/// 결제 확인
///
/// Pending 이 아닌 투자에 대한 callback 은 무시한다 (중복/지연 callback).
pub async fn confirm_payment<S: Store>(
    store: &S,
    notification: &PaymentNotification,
    now: DateTime<Utc>,
) -> Result<WebhookOutcome, ApiError> {
    let status = GatewayStatus::parse(&notification.status);
    let succeeded = match status {
        GatewayStatus::Success => true,
        GatewayStatus::Failure => false,
        GatewayStatus::Other(ref raw) => {
            tracing::info!(order_id = %notification.reference_id, status = %raw, "Non-terminal payment status ignored");
            return Ok(WebhookOutcome::Ignored(format!("status {} is not terminal", raw)));
        }
    };

    let order_id = notification.reference_id.as_str();
    let key = event_key(notification.gateway_id.as_deref(), order_id);

    let mut tx = store.begin().await?;

    if !tx.record_webhook(PAYMENT_SOURCE, key, status.key()).await? {
        tracing::debug!(order_id, key, "Duplicate payment webhook");
        return Ok(WebhookOutcome::Duplicate);
    }

    let mut investment = tx
        .lock_investment_by_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Investment".to_string()))?;

    if investment.status != InvestmentStatus::Pending {
        tx.commit().await?;
        tracing::info!(order_id, status = ?investment.status, "Investment already settled, webhook ignored");
        return Ok(WebhookOutcome::Ignored(format!(
            "investment is {:?}",
            investment.status
        )));
    }

    if let Some(amount) = notification.amount {
        if amount != investment.amount.whole_units() {
            tracing::warn!(
                order_id,
                expected = investment.amount.whole_units(),
                received = amount,
                "Payment webhook amount mismatch"
            );
        }
    }

    let gateway_id = notification.gateway_id.as_deref();

    if !succeeded {
        investment.status = investment.status.transition(InvestmentStatus::Cancelled)?;
        tx.save_investment(&investment).await?;
        settle_payment(&mut tx, order_id, PaymentStatus::Failed, gateway_id).await?;
        ledger::set_entry_status(&mut tx, order_id, TransactionStatus::Failed).await?;
        tx.commit().await?;

        tracing::info!(order_id, "Payment failed, investment cancelled");
        return Ok(WebhookOutcome::Applied);
    }

    investment.status = investment.status.transition(InvestmentStatus::Running)?;
    investment.last_return_at = None;
    investment.next_return_at = Some(now + settlement_period());
    tx.save_investment(&investment).await?;
    settle_payment(&mut tx, order_id, PaymentStatus::Success, gateway_id).await?;
    ledger::set_entry_status(&mut tx, order_id, TransactionStatus::Success).await?;

    let mut user = tx
        .lock_user(investment.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User".to_string()))?;

    let locked = match tx.find_category(investment.category_id).await? {
        Some(category) => category.profit_type == ProfitType::Locked,
        None => {
            tracing::warn!(order_id, category_id = investment.category_id, "Category missing, treated as unlocked");
            false
        }
    };

    user.total_invest += investment.amount;
    if locked {
        user.total_invest_vip += investment.amount;
        user.level = user.level.max(referral::vip_tier(user.total_invest_vip));
    }
    tx.save_user(&user).await?;

    referral::apply_referral_bonus(&mut tx, &user, investment.amount, order_id).await?;

    tx.commit().await?;

    tracing::info!(
        order_id,
        user_id = user.id,
        level = user.level,
        "Payment confirmed, investment running"
    );
    Ok(WebhookOutcome::Applied)
}

/// Payment row 를 lock 하고 전이 테이블을 거쳐 상태 + correlation id 를 반영
async fn settle_payment<T: UnitOfWork>(
    tx: &mut T,
    order_id: &str,
    status: PaymentStatus,
    gateway_id: Option<&str>,
) -> Result<(), ApiError> {
    let Some(payment) = tx.lock_payment_by_order(order_id).await? else {
        tracing::warn!(order_id, ?status, "No payment row found for order");
        return Ok(());
    };

    payment.status.transition(status)?;
    tx.settle_payment(order_id, status, gateway_id).await?;
    Ok(())
}

/// 결제 안내 조회 응답
#[derive(Debug, Clone, Serialize)]
pub struct PaymentDetails {
    pub order_id: String,
    pub product: String,
    pub amount: Money,
    pub payment_code: Option<String>,
    pub payment_method: Option<String>,
    pub payment_channel: Option<String>,
    pub payment_link: Option<String>,
    pub expired_at: Option<DateTime<Utc>>,
    pub status: PaymentStatus,
}

/// 본인 주문의 결제 안내 조회. 다른 사용자의 주문은 존재하지 않는 것으로 취급.
pub async fn payment_details<S: Store>(store: &S, user_id: i64, order_id: &str) -> Result<PaymentDetails, ApiError> {
    let not_found = || ApiError::NotFound("Payment".to_string());

    let payment = store.find_payment_by_order(order_id).await?.ok_or_else(not_found)?;
    let investment = store
        .find_investment(payment.investment_id)
        .await?
        .ok_or_else(not_found)?;

    if investment.user_id != user_id {
        return Err(not_found());
    }

    let product = store
        .find_product(investment.product_id)
        .await?
        .map(|p| p.name)
        .unwrap_or_default();

    Ok(PaymentDetails {
        order_id: payment.order_id,
        product,
        amount: investment.amount,
        payment_code: payment.payment_code,
        payment_method: payment.payment_method,
        payment_channel: payment.payment_channel,
        payment_link: payment.payment_link,
        expired_at: payment.expired_at,
        status: payment.status,
    })
}
