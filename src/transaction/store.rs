//! Transaction repository contract

use async_trait::async_trait;
use std::time::Duration;

use super::state::{StepStatus, TxStatus};
use super::types::{
    NewTransaction, StepDefinition, StepOrder, Transaction, TransactionId, TransactionStep,
};
use crate::error::TxResult;

/// Persistent transactions and saga steps
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert with status PENDING
    async fn create(&self, new: NewTransaction) -> TxResult<Transaction>;

    async fn get(&self, id: TransactionId) -> TxResult<Option<Transaction>>;

    /// Set status unless the row is already terminal
    async fn set_status(&self, id: TransactionId, status: TxStatus) -> TxResult<bool>;

    /// Atomic CAS: update status only if it currently equals `expected`
    ///
    /// Returns false if another worker moved it first.
    async fn update_status_if(
        &self,
        id: TransactionId,
        expected: TxStatus,
        new: TxStatus,
    ) -> TxResult<bool>;

    /// Newest first
    async fn list_by_account(&self, account_id: i64, limit: usize)
    -> TxResult<Vec<Transaction>>;

    /// Newest first, across all accounts
    async fn list_recent(&self, limit: usize) -> TxResult<Vec<Transaction>>;

    /// Oldest first
    async fn list_by_reference(&self, reference_id: &str) -> TxResult<Vec<Transaction>>;

    /// Non-terminal transactions not updated within `threshold`, oldest first
    async fn find_stale(&self, threshold: Duration, limit: usize) -> TxResult<Vec<Transaction>>;

    /// Insert one PENDING step per definition, in order. Reversible steps get
    /// `payload` as their compensation payload.
    async fn create_steps(
        &self,
        id: TransactionId,
        definitions: &[StepDefinition],
        payload: &serde_json::Value,
    ) -> TxResult<Vec<TransactionStep>>;

    async fn list_steps(
        &self,
        id: TransactionId,
        order: StepOrder,
    ) -> TxResult<Vec<TransactionStep>>;

    async fn set_step_status(&self, step_id: i64, status: StepStatus) -> TxResult<bool>;
}
