//! Repository Pattern Implementation
//!
//! 비즈니스 로직은 `Store` / `UnitOfWork` trait 에만 의존한다.
//!
//! - `Store`: 트랜잭션 밖의 읽기 + `begin()`
//! - `UnitOfWork`: 하나의 원자적 단위. `lock_*` 는 해당 row 에 대한 배타 lock 을
//!   커밋/롤백 시점까지 보유한다 (Postgres: `SELECT ... FOR UPDATE`).
//!   `commit()` 없이 drop 되면 모든 쓰기가 롤백된다.
//!
//! Lock 순서: investment/withdrawal row → payment/transaction row → 소유 user row
//! → (referrer user row).
//!
//! PostgreSQL 구현은 db/mod.rs 의 `Database`, 테스트용 in-memory 구현은 아래 `mock`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::*;

#[async_trait]
pub trait Store: Send + Sync {
    type Tx: UnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, sqlx::Error>;

    async fn find_user(&self, id: i64) -> Result<Option<User>, sqlx::Error>;
    async fn find_product(&self, id: i64) -> Result<Option<Product>, sqlx::Error>;
    async fn find_category(&self, id: i64) -> Result<Option<Category>, sqlx::Error>;

    /// Running/Completed/Suspended 상태의 동일 상품 구매 수
    async fn count_limited_purchases(&self, user_id: i64, product_id: i64) -> Result<i64, sqlx::Error>;

    async fn find_investment(&self, id: i64) -> Result<Option<Investment>, sqlx::Error>;
    async fn find_payment_by_order(&self, order_id: &str) -> Result<Option<Payment>, sqlx::Error>;

    /// 정산 대상: Running, next_return_at <= now, total_paid < duration
    async fn due_investment_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error>;

    async fn find_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, sqlx::Error>;
    async fn find_bank_account(&self, id: i64) -> Result<Option<BankAccount>, sqlx::Error>;

    /// row 가 없으면 기본값
    async fn platform_settings(&self) -> Result<PlatformSettings, sqlx::Error>;
    async fn payout_masking(&self) -> Result<Option<PayoutMasking>, sqlx::Error>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn lock_user(&mut self, id: i64) -> Result<Option<User>, sqlx::Error>;
    async fn save_user(&mut self, user: &User) -> Result<(), sqlx::Error>;

    async fn find_category(&mut self, id: i64) -> Result<Option<Category>, sqlx::Error>;

    async fn insert_investment(&mut self, new: &NewInvestment) -> Result<Investment, sqlx::Error>;
    async fn lock_investment(&mut self, id: i64) -> Result<Option<Investment>, sqlx::Error>;
    async fn lock_investment_by_order(&mut self, order_id: &str) -> Result<Option<Investment>, sqlx::Error>;
    async fn save_investment(&mut self, investment: &Investment) -> Result<(), sqlx::Error>;

    async fn insert_payment(&mut self, new: &NewPayment) -> Result<Payment, sqlx::Error>;
    async fn lock_payment_by_order(&mut self, order_id: &str) -> Result<Option<Payment>, sqlx::Error>;
    /// 결제 상태 + 게이트웨이 correlation id 갱신. 반환값은 변경된 row 수.
    async fn settle_payment(
        &mut self,
        order_id: &str,
        status: PaymentStatus,
        gateway_id: Option<&str>,
    ) -> Result<u64, sqlx::Error>;

    async fn insert_transaction(&mut self, new: &NewTransaction) -> Result<Transaction, sqlx::Error>;
    async fn lock_transaction_by_order(&mut self, order_id: &str) -> Result<Option<Transaction>, sqlx::Error>;
    async fn set_transaction_status(
        &mut self,
        order_id: &str,
        status: TransactionStatus,
    ) -> Result<u64, sqlx::Error>;

    async fn insert_withdrawal(&mut self, new: &NewWithdrawal) -> Result<Withdrawal, sqlx::Error>;
    async fn lock_withdrawal(&mut self, id: i64) -> Result<Option<Withdrawal>, sqlx::Error>;
    async fn lock_withdrawal_by_order(&mut self, order_id: &str) -> Result<Option<Withdrawal>, sqlx::Error>;
    /// status, payout_reference, payout_attempts 저장 (금액은 불변)
    async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), sqlx::Error>;

    /// webhook 수신 기록. 같은 (source, event_key, status) 가 이미 있으면 false.
    async fn record_webhook(
        &mut self,
        source: &str,
        event_key: &str,
        status: &str,
    ) -> Result<bool, sqlx::Error>;

    async fn commit(self) -> Result<(), sqlx::Error>;
}

// 테스트용 Mock 구현:

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard};

    use crate::types::Money;

    #[derive(Debug, Clone, Default)]
    pub struct MemoryState {
        pub users: BTreeMap<i64, User>,
        pub categories: BTreeMap<i64, Category>,
        pub products: BTreeMap<i64, Product>,
        pub investments: BTreeMap<i64, Investment>,
        pub payments: BTreeMap<i64, Payment>,
        pub transactions: Vec<Transaction>,
        pub withdrawals: BTreeMap<i64, Withdrawal>,
        pub bank_accounts: BTreeMap<i64, BankAccount>,
        pub settings: Option<PlatformSettings>,
        pub masking: Option<PayoutMasking>,
        pub receipts: HashSet<(String, String, String)>,
        next_id: i64,
    }

    impl MemoryState {
        fn next_id(&mut self) -> i64 {
            self.next_id += 1;
            self.next_id
        }
    }

    /// 전체 상태를 하나의 mutex 로 보호하는 in-memory store.
    /// UnitOfWork 는 guard 를 쥔 채 사본에 쓰고, commit 시에만 반영한다.
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        state: Arc<Mutex<MemoryState>>,
    }

    pub struct MemoryUnitOfWork {
        guard: OwnedMutexGuard<MemoryState>,
        working: MemoryState,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn snapshot(&self) -> MemoryState {
            self.state.lock().await.clone()
        }

        pub async fn add_user(&self, balance: Money, reff_by: Option<i64>) -> i64 {
            let mut state = self.state.lock().await;
            let id = state.next_id();
            state.users.insert(id, User {
                id,
                balance,
                level: 0,
                total_invest: Money::ZERO,
                total_invest_vip: Money::ZERO,
                reff_by,
                spin_ticket: None,
            });
            id
        }

        pub async fn set_level(&self, user_id: i64, level: i32) {
            let mut state = self.state.lock().await;
            if let Some(user) = state.users.get_mut(&user_id) {
                user.level = level;
            }
        }

        pub async fn add_category(&self, profit_type: ProfitType) -> i64 {
            let mut state = self.state.lock().await;
            let id = state.next_id();
            state.categories.insert(id, Category {
                id,
                name: format!("category-{}", id),
                status: CatalogStatus::Active,
                profit_type,
            });
            id
        }

        pub async fn add_product(&self, product: Product) -> i64 {
            let mut state = self.state.lock().await;
            let id = state.next_id();
            state.products.insert(id, Product { id, ..product });
            id
        }

        pub async fn add_bank_account(&self, user_id: i64) -> i64 {
            let mut state = self.state.lock().await;
            let id = state.next_id();
            state.bank_accounts.insert(id, BankAccount {
                id,
                user_id,
                bank_name: "Bank Central Asia".to_string(),
                bank_code: "BCA".to_string(),
                account_name: "Budi".to_string(),
                account_number: "1234567890".to_string(),
            });
            id
        }

        pub async fn set_settings(&self, settings: PlatformSettings) {
            self.state.lock().await.settings = Some(settings);
        }

        pub async fn set_masking(&self, masking: Option<PayoutMasking>) {
            self.state.lock().await.masking = masking;
        }

        pub async fn user(&self, id: i64) -> User {
            self.state.lock().await.users[&id].clone()
        }

        pub async fn investment_by_order(&self, order_id: &str) -> Investment {
            let state = self.state.lock().await;
            state
                .investments
                .values()
                .find(|i| i.order_id == order_id)
                .cloned()
                .expect("investment exists")
        }

        pub async fn transactions_of(&self, user_id: i64) -> Vec<Transaction> {
            let state = self.state.lock().await;
            state.transactions.iter().filter(|t| t.user_id == user_id).cloned().collect()
        }

        pub async fn transaction_by_order(&self, order_id: &str) -> Option<Transaction> {
            let state = self.state.lock().await;
            state.transactions.iter().find(|t| t.order_id == order_id).cloned()
        }

        /// 테스트 시나리오용: 이미 Running 인 투자를 직접 심는다
        pub async fn put_investment(&self, investment: Investment) -> i64 {
            let mut state = self.state.lock().await;
            let id = state.next_id();
            state.investments.insert(id, Investment { id, ..investment });
            id
        }
    }

    #[async_trait]
    impl Store for MemoryStore {
        type Tx = MemoryUnitOfWork;

        async fn begin(&self) -> Result<Self::Tx, sqlx::Error> {
            let guard = self.state.clone().lock_owned().await;
            let working = guard.clone();
            Ok(MemoryUnitOfWork { guard, working })
        }

        async fn find_user(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
            Ok(self.state.lock().await.users.get(&id).cloned())
        }

        async fn find_product(&self, id: i64) -> Result<Option<Product>, sqlx::Error> {
            Ok(self.state.lock().await.products.get(&id).cloned())
        }

        async fn find_category(&self, id: i64) -> Result<Option<Category>, sqlx::Error> {
            Ok(self.state.lock().await.categories.get(&id).cloned())
        }

        async fn count_limited_purchases(&self, user_id: i64, product_id: i64) -> Result<i64, sqlx::Error> {
            let state = self.state.lock().await;
            Ok(state
                .investments
                .values()
                .filter(|i| i.user_id == user_id && i.product_id == product_id)
                .filter(|i| i.status.counts_toward_limit())
                .count() as i64)
        }

        async fn find_investment(&self, id: i64) -> Result<Option<Investment>, sqlx::Error> {
            Ok(self.state.lock().await.investments.get(&id).cloned())
        }

        async fn find_payment_by_order(&self, order_id: &str) -> Result<Option<Payment>, sqlx::Error> {
            let state = self.state.lock().await;
            Ok(state.payments.values().find(|p| p.order_id == order_id).cloned())
        }

        async fn due_investment_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error> {
            let state = self.state.lock().await;
            Ok(state
                .investments
                .values()
                .filter(|i| i.status == InvestmentStatus::Running)
                .filter(|i| i.next_return_at.map_or(false, |t| t <= now))
                .filter(|i| i.total_paid < i.duration)
                .map(|i| i.id)
                .collect())
        }

        async fn find_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, sqlx::Error> {
            Ok(self.state.lock().await.withdrawals.get(&id).cloned())
        }

        async fn find_bank_account(&self, id: i64) -> Result<Option<BankAccount>, sqlx::Error> {
            Ok(self.state.lock().await.bank_accounts.get(&id).cloned())
        }

        async fn platform_settings(&self) -> Result<PlatformSettings, sqlx::Error> {
            Ok(self.state.lock().await.settings.clone().unwrap_or_default())
        }

        async fn payout_masking(&self) -> Result<Option<PayoutMasking>, sqlx::Error> {
            Ok(self.state.lock().await.masking.clone())
        }
    }

    fn constraint(msg: &str) -> sqlx::Error {
        sqlx::Error::Protocol(msg.to_string())
    }

    #[async_trait]
    impl UnitOfWork for MemoryUnitOfWork {
        async fn lock_user(&mut self, id: i64) -> Result<Option<User>, sqlx::Error> {
            Ok(self.working.users.get(&id).cloned())
        }

        async fn save_user(&mut self, user: &User) -> Result<(), sqlx::Error> {
            if !(0..=5).contains(&user.level) {
                return Err(constraint("users.level out of range"));
            }
            self.working.users.insert(user.id, user.clone());
            Ok(())
        }

        async fn find_category(&mut self, id: i64) -> Result<Option<Category>, sqlx::Error> {
            Ok(self.working.categories.get(&id).cloned())
        }

        async fn insert_investment(&mut self, new: &NewInvestment) -> Result<Investment, sqlx::Error> {
            if self.working.investments.values().any(|i| i.order_id == new.order_id) {
                return Err(constraint("investments.order_id unique"));
            }
            let id = self.working.next_id();
            let investment = Investment {
                id,
                user_id: new.user_id,
                product_id: new.product_id,
                category_id: new.category_id,
                amount: new.amount,
                daily_profit: new.daily_profit,
                duration: new.duration,
                total_paid: 0,
                total_returned: Money::ZERO,
                last_return_at: None,
                next_return_at: None,
                order_id: new.order_id.clone(),
                status: InvestmentStatus::Pending,
            };
            self.working.investments.insert(id, investment.clone());
            Ok(investment)
        }

        async fn lock_investment(&mut self, id: i64) -> Result<Option<Investment>, sqlx::Error> {
            Ok(self.working.investments.get(&id).cloned())
        }

        async fn lock_investment_by_order(&mut self, order_id: &str) -> Result<Option<Investment>, sqlx::Error> {
            Ok(self.working.investments.values().find(|i| i.order_id == order_id).cloned())
        }

        async fn save_investment(&mut self, investment: &Investment) -> Result<(), sqlx::Error> {
            if investment.total_paid < 0 || investment.total_paid > investment.duration {
                return Err(constraint("investments.total_paid out of range"));
            }
            self.working.investments.insert(investment.id, investment.clone());
            Ok(())
        }

        async fn insert_payment(&mut self, new: &NewPayment) -> Result<Payment, sqlx::Error> {
            let id = self.working.next_id();
            let payment = Payment {
                id,
                investment_id: new.investment_id,
                reference_id: new.reference_id.clone(),
                order_id: new.order_id.clone(),
                payment_method: Some(new.payment_method.clone()),
                payment_channel: new.payment_channel.clone(),
                payment_code: new.payment_code.clone(),
                payment_link: new.payment_link.clone(),
                status: PaymentStatus::Pending,
                expired_at: Some(new.expired_at),
            };
            self.working.payments.insert(id, payment.clone());
            Ok(payment)
        }

        async fn lock_payment_by_order(&mut self, order_id: &str) -> Result<Option<Payment>, sqlx::Error> {
            Ok(self.working.payments.values().find(|p| p.order_id == order_id).cloned())
        }

        async fn settle_payment(
            &mut self,
            order_id: &str,
            status: PaymentStatus,
            gateway_id: Option<&str>,
        ) -> Result<u64, sqlx::Error> {
            let mut changed = 0;
            for payment in self.working.payments.values_mut().filter(|p| p.order_id == order_id) {
                payment.status = status;
                if let Some(id) = gateway_id {
                    payment.reference_id = Some(id.to_string());
                }
                changed += 1;
            }
            Ok(changed)
        }

        async fn insert_transaction(&mut self, new: &NewTransaction) -> Result<Transaction, sqlx::Error> {
            if self.working.transactions.iter().any(|t| t.order_id == new.order_id) {
                return Err(constraint("transactions.order_id unique"));
            }
            let transaction = Transaction {
                id: self.working.next_id(),
                user_id: new.user_id,
                amount: new.amount,
                charge: new.charge,
                order_id: new.order_id.clone(),
                transaction_flow: new.flow,
                transaction_type: new.kind.as_str().to_string(),
                message: new.message.clone(),
                status: new.status,
            };
            self.working.transactions.push(transaction.clone());
            Ok(transaction)
        }

        async fn lock_transaction_by_order(&mut self, order_id: &str) -> Result<Option<Transaction>, sqlx::Error> {
            Ok(self.working.transactions.iter().find(|t| t.order_id == order_id).cloned())
        }

        async fn set_transaction_status(
            &mut self,
            order_id: &str,
            status: TransactionStatus,
        ) -> Result<u64, sqlx::Error> {
            let mut changed = 0;
            for t in self.working.transactions.iter_mut().filter(|t| t.order_id == order_id) {
                t.status = status;
                changed += 1;
            }
            Ok(changed)
        }

        async fn insert_withdrawal(&mut self, new: &NewWithdrawal) -> Result<Withdrawal, sqlx::Error> {
            let id = self.working.next_id();
            let withdrawal = Withdrawal {
                id,
                user_id: new.user_id,
                bank_account_id: new.bank_account_id,
                amount: new.amount(),
                charge: new.charge(),
                final_amount: new.final_amount(),
                order_id: new.order_id.clone(),
                status: WithdrawalStatus::Pending,
                payout_reference: None,
                payout_attempts: 0,
            };
            self.working.withdrawals.insert(id, withdrawal.clone());
            Ok(withdrawal)
        }

        async fn lock_withdrawal(&mut self, id: i64) -> Result<Option<Withdrawal>, sqlx::Error> {
            Ok(self.working.withdrawals.get(&id).cloned())
        }

        async fn lock_withdrawal_by_order(&mut self, order_id: &str) -> Result<Option<Withdrawal>, sqlx::Error> {
            Ok(self.working.withdrawals.values().find(|w| w.order_id == order_id).cloned())
        }

        async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), sqlx::Error> {
            if let Some(stored) = self.working.withdrawals.get_mut(&withdrawal.id) {
                stored.status = withdrawal.status;
                stored.payout_reference = withdrawal.payout_reference.clone();
                stored.payout_attempts = withdrawal.payout_attempts;
            }
            Ok(())
        }

        async fn record_webhook(
            &mut self,
            source: &str,
            event_key: &str,
            status: &str,
        ) -> Result<bool, sqlx::Error> {
            Ok(self.working.receipts.insert((
                source.to_string(),
                event_key.to_string(),
                status.to_string(),
            )))
        }

        async fn commit(mut self) -> Result<(), sqlx::Error> {
            *self.guard = std::mem::take(&mut self.working);
            Ok(())
        }
    }
}
