//! In-memory transaction store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::state::{StepStatus, TxStatus};
use super::store::TransactionStore;
use super::types::{
    NewTransaction, StepDefinition, StepOrder, Transaction, TransactionId, TransactionStep,
};
use crate::error::{TxError, TxResult};

#[derive(Default)]
struct Inner {
    /// Insertion order, used for listing ties
    order: Vec<TransactionId>,
    transactions: HashMap<TransactionId, Transaction>,
    next_step_id: i64,
    steps: Vec<TransactionStep>,
}

/// Process-local [`TransactionStore`] with the same conditional-update rules
/// as the PostgreSQL one.
#[derive(Default)]
pub struct MemoryTransactionStore {
    inner: Mutex<Inner>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> TxResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| TxError::Internal("transaction table poisoned".into()))
    }

    /// Rewind `updated_at` so a record looks stale to the reconciler
    #[cfg(test)]
    pub(crate) fn backdate(&self, id: TransactionId, by: Duration) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tx) = inner.transactions.get_mut(&id) {
            tx.updated_at -= chrono::Duration::from_std(by).unwrap();
        }
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn create(&self, new: NewTransaction) -> TxResult<Transaction> {
        let mut inner = self.locked()?;
        if inner.transactions.contains_key(&new.transaction_id) {
            return Err(TxError::Database(format!(
                "duplicate transaction_id {}",
                new.transaction_id
            )));
        }
        let record = new.into_record();
        inner.order.push(record.transaction_id);
        inner
            .transactions
            .insert(record.transaction_id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: TransactionId) -> TxResult<Option<Transaction>> {
        Ok(self.locked()?.transactions.get(&id).cloned())
    }

    async fn set_status(&self, id: TransactionId, status: TxStatus) -> TxResult<bool> {
        let mut inner = self.locked()?;
        match inner.transactions.get_mut(&id) {
            Some(tx) if !tx.status.is_terminal() => {
                tx.status = status;
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status_if(
        &self,
        id: TransactionId,
        expected: TxStatus,
        new: TxStatus,
    ) -> TxResult<bool> {
        expected.check_transition(new)?;
        let mut inner = self.locked()?;
        match inner.transactions.get_mut(&id) {
            Some(tx) if tx.status == expected => {
                tx.status = new;
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_account(
        &self,
        account_id: i64,
        limit: usize,
    ) -> TxResult<Vec<Transaction>> {
        let inner = self.locked()?;
        Ok(inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.transactions.get(id))
            .filter(|tx| tx.account_id == account_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: usize) -> TxResult<Vec<Transaction>> {
        let inner = self.locked()?;
        Ok(inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.transactions.get(id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_by_reference(&self, reference_id: &str) -> TxResult<Vec<Transaction>> {
        let inner = self.locked()?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.transactions.get(id))
            .filter(|tx| tx.reference_id.as_deref() == Some(reference_id))
            .cloned()
            .collect())
    }

    async fn find_stale(&self, threshold: Duration, limit: usize) -> TxResult<Vec<Transaction>> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| TxError::Internal(format!("invalid threshold: {}", e)))?;
        let cutoff = Utc::now() - threshold;

        let inner = self.locked()?;
        let mut stale: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|tx| !tx.status.is_terminal() && tx.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|tx| tx.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn create_steps(
        &self,
        id: TransactionId,
        definitions: &[StepDefinition],
        payload: &serde_json::Value,
    ) -> TxResult<Vec<TransactionStep>> {
        let mut inner = self.locked()?;
        if !inner.transactions.contains_key(&id) {
            return Err(TxError::TransactionNotFound(id.to_string()));
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(definitions.len());
        for def in definitions {
            inner.next_step_id += 1;
            let step = TransactionStep {
                id: inner.next_step_id,
                transaction_id: id,
                step_name: def.step_name.clone(),
                service_name: def.service,
                status: StepStatus::Pending,
                payload: payload.clone(),
                compensation_payload: def.reversible.then(|| payload.clone()),
                created_at: now,
                updated_at: now,
            };
            inner.steps.push(step.clone());
            created.push(step);
        }
        Ok(created)
    }

    async fn list_steps(
        &self,
        id: TransactionId,
        order: StepOrder,
    ) -> TxResult<Vec<TransactionStep>> {
        let inner = self.locked()?;
        let mut steps: Vec<TransactionStep> = inner
            .steps
            .iter()
            .filter(|s| s.transaction_id == id)
            .cloned()
            .collect();
        if order == StepOrder::Reverse {
            steps.reverse();
        }
        Ok(steps)
    }

    async fn set_step_status(&self, step_id: i64, status: StepStatus) -> TxResult<bool> {
        let mut inner = self.locked()?;
        match inner.steps.iter_mut().find(|s| s.id == step_id) {
            Some(step) if !step.status.can_transition_to(status) => {
                Err(TxError::InvalidStateTransition(format!(
                    "step {} {} -> {}",
                    step_id, step.status, status
                )))
            }
            Some(step) => {
                step.status = status;
                step.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
