//! Transaction Database Layer
//!
//! PostgreSQL persistence for transactions and saga steps.
//! Status updates use conditional UPDATEs so terminal rows are never touched.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;

use super::state::{StepStatus, TxStatus};
use super::store::TransactionStore;
use super::types::{
    NewTransaction, StepDefinition, StepOrder, Transaction, TransactionId, TransactionStep,
    TransactionType,
};
use crate::error::{TxError, TxResult};

const TX_COLUMNS: &str = "transaction_id, account_id, amount, tx_type, status, reference_id, \
                          description, is_saga, created_at, updated_at";

const STEP_COLUMNS: &str = "id, transaction_id, step_name, service_name, status, payload, \
                            compensation_payload, created_at, updated_at";

/// PostgreSQL transaction repository
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Convert database row to Transaction
    fn row_to_transaction(row: &PgRow) -> TxResult<Transaction> {
        let id_str: String = row.try_get("transaction_id")?;
        let transaction_id: TransactionId = id_str
            .parse()
            .map_err(|_| TxError::Internal(format!("Invalid transaction_id: {}", id_str)))?;

        let type_id: i16 = row.try_get("tx_type")?;
        let tx_type = TransactionType::from_id(type_id)
            .ok_or_else(|| TxError::Internal(format!("Invalid tx_type: {}", type_id)))?;

        let status_id: i16 = row.try_get("status")?;
        let status = TxStatus::from_id(status_id)
            .ok_or_else(|| TxError::Internal(format!("Invalid status: {}", status_id)))?;

        Ok(Transaction {
            transaction_id,
            account_id: row.try_get("account_id")?,
            amount: row.try_get("amount")?,
            tx_type,
            status,
            reference_id: row.try_get("reference_id")?,
            description: row.try_get("description")?,
            saga: row.try_get("is_saga")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Convert database row to TransactionStep
    fn row_to_step(row: &PgRow) -> TxResult<TransactionStep> {
        let id_str: String = row.try_get("transaction_id")?;
        let transaction_id: TransactionId = id_str
            .parse()
            .map_err(|_| TxError::Internal(format!("Invalid transaction_id: {}", id_str)))?;

        let service: String = row.try_get("service_name")?;
        let service_name = service.parse().map_err(TxError::Internal)?;

        let status_id: i16 = row.try_get("status")?;
        let status = StepStatus::from_id(status_id)
            .ok_or_else(|| TxError::Internal(format!("Invalid step status: {}", status_id)))?;

        let payload: String = row.try_get("payload")?;
        let compensation: Option<String> = row.try_get("compensation_payload")?;

        Ok(TransactionStep {
            id: row.try_get("id")?,
            transaction_id,
            step_name: row.try_get("step_name")?,
            service_name,
            status,
            payload: serde_json::from_str(&payload)?,
            compensation_payload: compensation
                .map(|c| serde_json::from_str(&c))
                .transpose()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn rows_to_transactions(rows: &[PgRow]) -> TxResult<Vec<Transaction>> {
        rows.iter().map(Self::row_to_transaction).collect()
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create(&self, new: NewTransaction) -> TxResult<Transaction> {
        let sql = format!(
            r#"
            INSERT INTO transactions
                (transaction_id, account_id, amount, tx_type, status, reference_id, description,
                 is_saga, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            RETURNING {}
            "#,
            TX_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(new.transaction_id.to_string())
            .bind(new.account_id)
            .bind(new.amount)
            .bind(new.tx_type.id())
            .bind(TxStatus::Pending.id())
            .bind(&new.reference_id)
            .bind(&new.description)
            .bind(new.saga)
            .fetch_one(&self.pool)
            .await?;

        Self::row_to_transaction(&row)
    }

    async fn get(&self, id: TransactionId) -> TxResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE transaction_id = $1",
            TX_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    async fn set_status(&self, id: TransactionId, status: TxStatus) -> TxResult<bool> {
        let [a, b, c] = TxStatus::terminal_ids();
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1, updated_at = NOW()
            WHERE transaction_id = $2 AND status NOT IN ($3, $4, $5)
            "#,
        )
        .bind(status.id())
        .bind(id.to_string())
        .bind(a)
        .bind(b)
        .bind(c)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_status_if(
        &self,
        id: TransactionId,
        expected: TxStatus,
        new: TxStatus,
    ) -> TxResult<bool> {
        expected.check_transition(new)?;
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1, updated_at = NOW()
            WHERE transaction_id = $2 AND status = $3
            "#,
        )
        .bind(new.id())
        .bind(id.to_string())
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_account(
        &self,
        account_id: i64,
        limit: usize,
    ) -> TxResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE account_id = $1 ORDER BY created_at DESC, id DESC \
             LIMIT $2",
            TX_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(account_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Self::rows_to_transactions(&rows)
    }

    async fn list_recent(&self, limit: usize) -> TxResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions ORDER BY created_at DESC, id DESC LIMIT $1",
            TX_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Self::rows_to_transactions(&rows)
    }

    async fn list_by_reference(&self, reference_id: &str) -> TxResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE reference_id = $1 ORDER BY id ASC",
            TX_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(reference_id)
            .fetch_all(&self.pool)
            .await?;
        Self::rows_to_transactions(&rows)
    }

    async fn find_stale(&self, threshold: Duration, limit: usize) -> TxResult<Vec<Transaction>> {
        let [a, b, c] = TxStatus::terminal_ids();
        let sql = format!(
            r#"
            SELECT {} FROM transactions
            WHERE status NOT IN ($1, $2, $3)
              AND updated_at < NOW() - INTERVAL '1 second' * $4
            ORDER BY updated_at ASC
            LIMIT $5
            "#,
            TX_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(a)
            .bind(b)
            .bind(c)
            .bind(threshold.as_secs() as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Self::rows_to_transactions(&rows)
    }

    async fn create_steps(
        &self,
        id: TransactionId,
        definitions: &[StepDefinition],
        payload: &serde_json::Value,
    ) -> TxResult<Vec<TransactionStep>> {
        let payload_text = serde_json::to_string(payload)?;
        let sql = format!(
            r#"
            INSERT INTO transaction_steps
                (transaction_id, step_name, service_name, status, payload, compensation_payload,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING {}
            "#,
            STEP_COLUMNS
        );

        // One DB transaction so a saga never has a partial step list
        let mut db_tx = self.pool.begin().await?;
        let mut steps = Vec::with_capacity(definitions.len());
        for def in definitions {
            let compensation = def.reversible.then(|| payload_text.clone());
            let row = sqlx::query(&sql)
                .bind(id.to_string())
                .bind(&def.step_name)
                .bind(def.service.as_str())
                .bind(StepStatus::Pending.id())
                .bind(&payload_text)
                .bind(compensation)
                .fetch_one(&mut *db_tx)
                .await?;
            steps.push(Self::row_to_step(&row)?);
        }
        db_tx.commit().await?;

        Ok(steps)
    }

    async fn list_steps(
        &self,
        id: TransactionId,
        order: StepOrder,
    ) -> TxResult<Vec<TransactionStep>> {
        let direction = match order {
            StepOrder::Forward => "ASC",
            StepOrder::Reverse => "DESC",
        };
        let sql = format!(
            "SELECT {} FROM transaction_steps WHERE transaction_id = $1 ORDER BY id {}",
            STEP_COLUMNS, direction
        );
        let rows = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_step).collect()
    }

    async fn set_step_status(&self, step_id: i64, status: StepStatus) -> TxResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transaction_steps
            SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = ANY($3)
            "#,
        )
        .bind(status.id())
        .bind(step_id)
        .bind(StepStatus::predecessor_ids(status))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Missing row, or a step not allowed to move to `status`
        let current: Option<i16> =
            sqlx::query_scalar("SELECT status FROM transaction_steps WHERE id = $1")
                .bind(step_id)
                .fetch_optional(&self.pool)
                .await?;
        match current.and_then(StepStatus::from_id) {
            Some(from) => Err(TxError::InvalidStateTransition(format!(
                "step {} {} -> {}",
                step_id, from, status
            ))),
            None => Ok(false),
        }
    }
}
