//! Postgres-backed ledger store.
//!
//! ## Locking
//!
//! Every unit is a READ COMMITTED transaction with `lock_timeout` set locally.
//! Rows are locked with `SELECT ... FOR UPDATE`, account rows always through one
//! `ORDER BY id` query, so two units never wait on each other in a cycle.
//! Balance writes are increments (`balance = balance + $1`); the table's
//! `CHECK (balance >= 0)` is the last line that keeps a balance from going
//! negative.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | Result |
//! |------------|------------------|
//! | `23514` on a balance update | `LedgerError::InsufficientBalance` |
//! | `23505` on account insert | `LedgerError::DuplicateAccount` |
//! | `22003` (numeric_value_out_of_range) | `LedgerError::InvalidAmount` |
//! | `55P03` (lock_not_available) | `StoreError::LockTimeout` |
//! | other database errors | `StoreError::Constraint` |
//! | pool / io / protocol errors | `StoreError::Unavailable` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction as PgTransaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AtomicUnit, Entity, FundRequest, FundRequestId, FundRequestStatus,
    LedgerError, LedgerStore, Money, NewTransaction, StoreError, Transaction, TransactionId,
};

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Creates the ledger tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        info!("ledger schema ready");
        Ok(())
    }

    /// Waits for checked-out connections and closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    type Unit = PostgresUnit;

    async fn begin(&self) -> Result<PostgresUnit, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let set_timeout = format!(
            "SET LOCAL lock_timeout = {}",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&set_timeout)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        Ok(PostgresUnit { tx })
    }

    #[instrument(skip(self), err)]
    async fn open_account(&self, email: &str) -> Result<Account, LedgerError> {
        let account = Account::new(email);
        let result = sqlx::query(
            "INSERT INTO accounts (id, email, balance, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(*account.id.as_uuid())
        .bind(&account.email)
        .bind(account.balance.to_decimal())
        .bind(account.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(account),
            Err(e) if is_unique_violation(&e) => Err(LedgerError::DuplicateAccount(email.to_string())),
            Err(e) => Err(map_sqlx_error("open_account", e)),
        }
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query("SELECT id, email, balance, created_at FROM accounts WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("account", e))?;
        row.map(|r| decode::<AccountRow, _>(&r)).transpose()
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, LedgerError> {
        let row =
            sqlx::query("SELECT id, email, balance, created_at FROM accounts WHERE email = $1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("account_by_email", e))?;
        row.map(|r| decode::<AccountRow, _>(&r)).transpose()
    }

    async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let rows =
            sqlx::query("SELECT id, email, balance, created_at FROM accounts ORDER BY email")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("accounts", e))?;
        rows.iter().map(decode::<AccountRow, _>).collect()
    }

    async fn transactions_for(&self, id: AccountId) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, type, amount, status, description, counterparty_id, created_at
            FROM transactions
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("transactions_for", e))?;
        rows.iter().map(decode::<TransactionRow, _>).collect()
    }

    async fn transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, type, amount, status, description, counterparty_id, created_at
            FROM transactions
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("transactions", e))?;
        rows.iter().map(decode::<TransactionRow, _>).collect()
    }

    #[instrument(skip(self, request), fields(request_id = %request.id), err)]
    async fn create_fund_request(&self, request: FundRequest) -> Result<FundRequest, LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO fund_requests (id, account_id, amount, reason, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*request.id.as_uuid())
        .bind(*request.account_id.as_uuid())
        .bind(request.amount.to_decimal())
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(request),
            Err(e) if is_foreign_key_violation(&e) => Err(LedgerError::NotFound(Entity::Account)),
            Err(e) => Err(map_sqlx_error("create_fund_request", e)),
        }
    }

    async fn fund_request(&self, id: FundRequestId) -> Result<Option<FundRequest>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, amount, reason, status, resolution_note, created_at
            FROM fund_requests
            WHERE id = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fund_request", e))?;
        row.map(|r| decode::<FundRequestRow, _>(&r)).transpose()
    }

    async fn fund_requests(
        &self,
        status: Option<FundRequestStatus>,
    ) -> Result<Vec<FundRequest>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, amount, reason, status, resolution_note, created_at
            FROM fund_requests
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fund_requests", e))?;
        rows.iter().map(decode::<FundRequestRow, _>).collect()
    }

    async fn fund_requests_for(&self, id: AccountId) -> Result<Vec<FundRequest>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, amount, reason, status, resolution_note, created_at
            FROM fund_requests
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fund_requests_for", e))?;
        rows.iter().map(decode::<FundRequestRow, _>).collect()
    }
}

/// A database transaction. sqlx rolls it back if it is dropped uncommitted.
pub struct PostgresUnit {
    tx: PgTransaction<'static, Postgres>,
}

#[async_trait]
impl AtomicUnit for PostgresUnit {
    async fn find_account(&mut self, id: AccountId) -> Result<Option<AccountId>, LedgerError> {
        let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM accounts WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_account", e))?;
        Ok(id.map(AccountId::from_uuid))
    }

    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<AccountId>, LedgerError> {
        let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM accounts WHERE email = $1")
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("find_account_by_email", e))?;
        Ok(id.map(AccountId::from_uuid))
    }

    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>, LedgerError> {
        let mut ordered: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        ordered.sort();
        ordered.dedup();

        let rows = sqlx::query(
            r#"
            SELECT id, email, balance, created_at
            FROM accounts
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(&ordered)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_accounts", e))?;

        if rows.len() != ordered.len() {
            return Err(LedgerError::NotFound(Entity::Account));
        }
        debug!(rows = rows.len(), "accounts locked");
        rows.iter().map(decode::<AccountRow, _>).collect()
    }

    async fn lock_fund_request(
        &mut self,
        id: FundRequestId,
    ) -> Result<Option<FundRequest>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, amount, reason, status, resolution_note, created_at
            FROM fund_requests
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_fund_request", e))?;
        row.map(|r| decode::<FundRequestRow, _>(&r)).transpose()
    }

    async fn adjust_balance(&mut self, id: AccountId, delta: Money) -> Result<Money, LedgerError> {
        let result: Result<Option<Decimal>, sqlx::Error> = sqlx::query_scalar(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING balance",
        )
        .bind(delta.to_decimal())
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await;

        match result {
            Ok(Some(balance)) => to_money(balance),
            Ok(None) => Err(LedgerError::NotFound(Entity::Account)),
            Err(e) if is_check_violation(&e) => Err(LedgerError::InsufficientBalance),
            Err(e) => Err(map_sqlx_error("adjust_balance", e)),
        }
    }

    async fn append_transaction(&mut self, entry: NewTransaction) -> Result<Transaction, LedgerError> {
        let tx = entry.completed();
        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, account_id, type, amount, status, description, counterparty_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*tx.id.as_uuid())
        .bind(*tx.account_id.as_uuid())
        .bind(tx.kind.as_str())
        .bind(tx.amount.to_decimal())
        .bind(tx.status.as_str())
        .bind(&tx.description)
        .bind(tx.counterparty_id.map(|id| *id.as_uuid()))
        .bind(tx.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_transaction", e))?;
        Ok(tx)
    }

    async fn set_fund_request_status(
        &mut self,
        id: FundRequestId,
        status: FundRequestStatus,
        note: Option<String>,
    ) -> Result<(), LedgerError> {
        let updated = sqlx::query(
            "UPDATE fund_requests SET status = $1, resolution_note = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(note)
        .bind(*id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("set_fund_request_status", e))?;

        if updated.rows_affected() == 0 {
            return Err(LedgerError::NotFound(Entity::FundRequest));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn decode<'r, T, U>(row: &'r PgRow) -> Result<U, LedgerError>
where
    T: FromRow<'r, PgRow> + TryInto<U, Error = LedgerError>,
{
    T::from_row(row)
        .map_err(|e| map_sqlx_error("decode", e))?
        .try_into()
}

fn to_money(value: Decimal) -> Result<Money, LedgerError> {
    Money::from_decimal(value)
        .ok_or_else(|| StoreError::Constraint(format!("amount out of range: {}", value)).into())
}

fn db_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    db_code(err).as_deref() == Some("23505")
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    db_code(err).as_deref() == Some("23503")
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    db_code(err).as_deref() == Some("23514")
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") => StoreError::LockTimeout.into(),
                // numeric_value_out_of_range: past NUMERIC(15, 2)
                Some("22003") => LedgerError::InvalidAmount,
                // serialization_failure / deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Unavailable(msg).into(),
                _ => StoreError::Constraint(msg).into(),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation)).into()
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation)).into()
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)).into(),
    }
}

struct AccountRow {
    id: Uuid,
    email: String,
    balance: Decimal,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            balance: row.try_get("balance")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: AccountId::from_uuid(row.id),
            email: row.email,
            balance: to_money(row.balance)?,
            created_at: row.created_at,
        })
    }
}

struct TransactionRow {
    id: Uuid,
    account_id: Uuid,
    kind: String,
    amount: Decimal,
    status: String,
    description: String,
    counterparty_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            kind: row.try_get("type")?,
            amount: row.try_get("amount")?,
            status: row.try_get("status")?,
            description: row.try_get("description")?,
            counterparty_id: row.try_get("counterparty_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: TransactionId::from_uuid(row.id),
            account_id: AccountId::from_uuid(row.account_id),
            kind: row.kind.parse().map_err(StoreError::Constraint)?,
            amount: to_money(row.amount)?,
            status: row.status.parse().map_err(StoreError::Constraint)?,
            description: row.description,
            counterparty_id: row.counterparty_id.map(AccountId::from_uuid),
            created_at: row.created_at,
        })
    }
}

struct FundRequestRow {
    id: Uuid,
    account_id: Uuid,
    amount: Decimal,
    reason: String,
    status: String,
    resolution_note: Option<String>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for FundRequestRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(FundRequestRow {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            amount: row.try_get("amount")?,
            reason: row.try_get("reason")?,
            status: row.try_get("status")?,
            resolution_note: row.try_get("resolution_note")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<FundRequestRow> for FundRequest {
    type Error = LedgerError;

    fn try_from(row: FundRequestRow) -> Result<Self, Self::Error> {
        Ok(FundRequest {
            id: FundRequestId::from_uuid(row.id),
            account_id: AccountId::from_uuid(row.account_id),
            amount: to_money(row.amount)?,
            reason: row.reason,
            status: row.status.parse().map_err(StoreError::Constraint)?,
            resolution_note: row.resolution_note,
            created_at: row.created_at,
        })
    }
}
