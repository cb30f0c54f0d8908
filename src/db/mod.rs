//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 왜 PostgreSQL을 선택했는가?
//! A: 원장(ledger) 서비스에 적합한 이유
//!
//!    1. ACID 트랜잭션: 잔액 변경과 ledger entry 를 한 단위로 커밋
//!    2. Row-level lock: `SELECT ... FOR UPDATE` 로 같은 사용자 잔액 갱신 직렬화
//!    3. Enum 타입: 상태 값을 closed set 으로 강제
//!    4. Generated column: `final_amount = amount - charge` 를 DB 가 보장
//!
//! Q: 동시에 들어온 webhook / 정산 / 출금이 같은 사용자를 건드리면?
//! A: 모든 변경은 `UnitOfWork` 안에서 일어난다
//!
//!    - 대상 엔티티 row 를 먼저 lock (investment / withdrawal)
//!    - 이어서 소유 user row 를 lock
//!    - 커밋 또는 롤백 시 lock 해제
//!
//!    → 두 작업이 interleave 되어 balance lost update 가 생기지 않음
//!
//! Q: 커넥션 풀은 어떻게 관리하는가?
//! A: SQLx의 PgPool 사용
//!    - 최소/최대 커넥션 수 설정
//!    - acquire 타임아웃 처리

mod models;
mod repository;

pub use models::*;
pub use repository::{Store, UnitOfWork};
#[cfg(test)]
pub use repository::mock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres};

const USER_COLUMNS: &str =
    "id, balance, level, total_invest, total_invest_vip, reff_by, spin_ticket";

const INVESTMENT_COLUMNS: &str = "id, user_id, product_id, category_id, amount, daily_profit, \
     duration, total_paid, total_returned, last_return_at, next_return_at, order_id, status";

const PAYMENT_COLUMNS: &str = "id, investment_id, reference_id, order_id, payment_method, \
     payment_channel, payment_code, payment_link, status, expired_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, charge, order_id, transaction_flow, \
     transaction_type, message, status";

const WITHDRAWAL_COLUMNS: &str = "id, user_id, bank_account_id, amount, charge, final_amount, \
     order_id, status, payout_reference, payout_attempts";

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10 (트래픽에 따라 조정)
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 3초 (커넥션 획득 대기)
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 접속을 미루는 pool (라우터 테스트용)
    #[cfg(test)]
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await?;
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, sqlx::Error> {
        Ok(PgUnitOfWork { tx: self.pool.begin().await? })
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_product(&self, id: i64) -> Result<Option<Product>, sqlx::Error> {
        sqlx::query_as::<_, Product>(
            r#"
            SELECT
                id, category_id, name, amount, daily_profit,
                duration, required_vip, purchase_limit, status
            FROM products
            WHERE id = $1
            "#
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_category(&self, id: i64) -> Result<Option<Category>, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            "SELECT id, name, status, profit_type FROM categories WHERE id = $1"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn count_limited_purchases(&self, user_id: i64, product_id: i64) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM investments
            WHERE user_id = $1 AND product_id = $2
              AND status IN ('Running', 'Completed', 'Suspended')
            "#
        )
        .bind(user_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    async fn find_investment(&self, id: i64) -> Result<Option<Investment>, sqlx::Error> {
        sqlx::query_as::<_, Investment>(&format!(
            "SELECT {} FROM investments WHERE id = $1",
            INVESTMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_payment_by_order(&self, order_id: &str) -> Result<Option<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE order_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn due_investment_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM investments
            WHERE status = 'Running'
              AND next_return_at IS NOT NULL
              AND next_return_at <= $1
              AND total_paid < duration
            ORDER BY next_return_at ASC
            "#
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn find_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, sqlx::Error> {
        sqlx::query_as::<_, Withdrawal>(&format!(
            "SELECT {} FROM withdrawals WHERE id = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_bank_account(&self, id: i64) -> Result<Option<BankAccount>, sqlx::Error> {
        sqlx::query_as::<_, BankAccount>(
            r#"
            SELECT
                ba.id, ba.user_id,
                b.name AS bank_name, b.code AS bank_code,
                ba.account_name, ba.account_number
            FROM bank_accounts ba
            JOIN banks b ON b.id = ba.bank_id
            WHERE ba.id = $1
            "#
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn platform_settings(&self) -> Result<PlatformSettings, sqlx::Error> {
        let settings = sqlx::query_as::<_, PlatformSettings>(
            "SELECT auto_withdraw, withdraw_charge_percent, min_withdraw FROM settings ORDER BY id LIMIT 1"
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(settings.unwrap_or_default())
    }

    async fn payout_masking(&self) -> Result<Option<PayoutMasking>, sqlx::Error> {
        sqlx::query_as::<_, PayoutMasking>(
            r#"
            SELECT withdraw_amount, bank_name, bank_code, account_number, exempt_user_ids
            FROM payment_settings
            ORDER BY id
            LIMIT 1
            "#
        )
        .fetch_optional(&self.pool)
        .await
    }
}

/// Postgres 트랜잭션 하나 = 원자적 단위 하나.
/// commit 없이 drop 되면 sqlx 가 롤백한다.
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_user(&mut self, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1 FOR UPDATE",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn save_user(&mut self, user: &User) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users SET
                balance = $2,
                level = $3,
                total_invest = $4,
                total_invest_vip = $5,
                spin_ticket = $6,
                updated_at = NOW()
            WHERE id = $1
            "#
        )
        .bind(user.id)
        .bind(user.balance)
        .bind(user.level)
        .bind(user.total_invest)
        .bind(user.total_invest_vip)
        .bind(user.spin_ticket)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_category(&mut self, id: i64) -> Result<Option<Category>, sqlx::Error> {
        sqlx::query_as::<_, Category>(
            "SELECT id, name, status, profit_type FROM categories WHERE id = $1"
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn insert_investment(&mut self, new: &NewInvestment) -> Result<Investment, sqlx::Error> {
        sqlx::query_as::<_, Investment>(&format!(
            r#"
            INSERT INTO investments (
                user_id, product_id, category_id, amount, daily_profit,
                duration, total_paid, total_returned, order_id, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, 0, $7, 'Pending')
            RETURNING {}
            "#,
            INVESTMENT_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.product_id)
        .bind(new.category_id)
        .bind(new.amount)
        .bind(new.daily_profit)
        .bind(new.duration)
        .bind(&new.order_id)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn lock_investment(&mut self, id: i64) -> Result<Option<Investment>, sqlx::Error> {
        sqlx::query_as::<_, Investment>(&format!(
            "SELECT {} FROM investments WHERE id = $1 FOR UPDATE",
            INVESTMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn lock_investment_by_order(&mut self, order_id: &str) -> Result<Option<Investment>, sqlx::Error> {
        sqlx::query_as::<_, Investment>(&format!(
            "SELECT {} FROM investments WHERE order_id = $1 FOR UPDATE",
            INVESTMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn save_investment(&mut self, investment: &Investment) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE investments SET
                total_paid = $2,
                total_returned = $3,
                last_return_at = $4,
                next_return_at = $5,
                status = $6,
                updated_at = NOW()
            WHERE id = $1
            "#
        )
        .bind(investment.id)
        .bind(investment.total_paid)
        .bind(investment.total_returned)
        .bind(investment.last_return_at)
        .bind(investment.next_return_at)
        .bind(investment.status)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_payment(&mut self, new: &NewPayment) -> Result<Payment, sqlx::Error> {
        sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (
                investment_id, reference_id, order_id, payment_method, payment_channel,
                payment_code, payment_link, status, expired_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'Pending', $8)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(new.investment_id)
        .bind(&new.reference_id)
        .bind(&new.order_id)
        .bind(&new.payment_method)
        .bind(&new.payment_channel)
        .bind(&new.payment_code)
        .bind(&new.payment_link)
        .bind(new.expired_at)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn lock_payment_by_order(&mut self, order_id: &str) -> Result<Option<Payment>, sqlx::Error> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE order_id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn settle_payment(
        &mut self,
        order_id: &str,
        status: PaymentStatus,
        gateway_id: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = $2,
                reference_id = COALESCE($3, reference_id),
                updated_at = NOW()
            WHERE order_id = $1
            "#
        )
        .bind(order_id)
        .bind(status)
        .bind(gateway_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_transaction(&mut self, new: &NewTransaction) -> Result<Transaction, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions (
                user_id, amount, charge, order_id, transaction_flow,
                transaction_type, message, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.amount)
        .bind(new.charge)
        .bind(&new.order_id)
        .bind(new.flow)
        .bind(new.kind.as_str())
        .bind(&new.message)
        .bind(new.status)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn lock_transaction_by_order(&mut self, order_id: &str) -> Result<Option<Transaction>, sqlx::Error> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE order_id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn set_transaction_status(
        &mut self,
        order_id: &str,
        status: TransactionStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE transactions SET status = $2, updated_at = NOW() WHERE order_id = $1"
        )
        .bind(order_id)
        .bind(status)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_withdrawal(&mut self, new: &NewWithdrawal) -> Result<Withdrawal, sqlx::Error> {
        // final_amount 는 generated column 이므로 INSERT 하지 않는다
        sqlx::query_as::<_, Withdrawal>(&format!(
            r#"
            INSERT INTO withdrawals (user_id, bank_account_id, amount, charge, order_id, status)
            VALUES ($1, $2, $3, $4, $5, 'Pending')
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.bank_account_id)
        .bind(new.amount())
        .bind(new.charge())
        .bind(&new.order_id)
        .fetch_one(&mut *self.tx)
        .await
    }

    async fn lock_withdrawal(&mut self, id: i64) -> Result<Option<Withdrawal>, sqlx::Error> {
        sqlx::query_as::<_, Withdrawal>(&format!(
            "SELECT {} FROM withdrawals WHERE id = $1 FOR UPDATE",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn lock_withdrawal_by_order(&mut self, order_id: &str) -> Result<Option<Withdrawal>, sqlx::Error> {
        sqlx::query_as::<_, Withdrawal>(&format!(
            "SELECT {} FROM withdrawals WHERE order_id = $1 FOR UPDATE",
            WITHDRAWAL_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
    }

    async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE withdrawals SET
                status = $2,
                payout_reference = $3,
                payout_attempts = $4,
                updated_at = NOW()
            WHERE id = $1
            "#
        )
        .bind(withdrawal.id)
        .bind(withdrawal.status)
        .bind(&withdrawal.payout_reference)
        .bind(withdrawal.payout_attempts)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn record_webhook(
        &mut self,
        source: &str,
        event_key: &str,
        status: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_receipts (source, event_key, status, received_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (source, event_key, status) DO NOTHING
            "#
        )
        .bind(source)
        .bind(event_key)
        .bind(status)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }
}
