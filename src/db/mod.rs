//! Database connection management

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Tables for accounts, transactions and saga steps.
///
/// Status and type columns are SMALLINT ids (see `transaction::state`).
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id              BIGSERIAL PRIMARY KEY,
        account_number  TEXT NOT NULL UNIQUE,
        balance         NUMERIC(30, 8) NOT NULL CHECK (balance >= 0),
        version         BIGINT NOT NULL DEFAULT 1,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id              BIGSERIAL PRIMARY KEY,
        transaction_id  TEXT NOT NULL UNIQUE,
        account_id      BIGINT NOT NULL REFERENCES accounts(id),
        amount          NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
        tx_type         SMALLINT NOT NULL,
        status          SMALLINT NOT NULL,
        reference_id    TEXT,
        description     TEXT,
        is_saga         BOOLEAN NOT NULL DEFAULT FALSE,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "ALTER TABLE transactions ADD COLUMN IF NOT EXISTS is_saga BOOLEAN NOT NULL DEFAULT FALSE",
    "CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions (account_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_reference ON transactions (reference_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_status_updated ON transactions (status, updated_at)",
    r#"
    CREATE TABLE IF NOT EXISTS transaction_steps (
        id                    BIGSERIAL PRIMARY KEY,
        transaction_id        TEXT NOT NULL REFERENCES transactions(transaction_id),
        step_name             TEXT NOT NULL,
        service_name          TEXT NOT NULL,
        status                SMALLINT NOT NULL,
        payload               TEXT NOT NULL,
        compensation_payload  TEXT,
        created_at            TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at            TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_steps_transaction ON transaction_steps (transaction_id, id)",
];

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(50)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create tables and indexes if missing
    pub async fn init_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }
}

/// SQLSTATE for unique_violation
pub const UNIQUE_VIOLATION: &str = "23505";

/// Whether `e` is a unique-constraint violation
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}
