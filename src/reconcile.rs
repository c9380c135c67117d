//! Reconcile Worker
//!
//! Background sweep over transactions that stopped moving. PENDING records
//! are driven again through the path that created them; PROCESSING and
//! COMPENSATING records are only reported, since their last write has an
//! unknown outcome.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ReconcileConfig;
use crate::error::TxResult;
use crate::saga::SagaOrchestrator;
use crate::transaction::{
    StepOrder, Transaction, TransactionService, TransactionType, TxStatus,
};

/// Configuration for the reconcile worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// How long a transaction must sit unchanged to be considered stale
    pub stale_threshold: Duration,
    /// Maximum transactions per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl From<&ReconcileConfig> for WorkerConfig {
    fn from(c: &ReconcileConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(c.scan_interval_secs),
            stale_threshold: Duration::from_secs(c.stale_threshold_secs),
            batch_size: c.batch_size,
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: usize,
    /// PENDING records that left PENDING during this sweep
    pub advanced: usize,
    /// PROCESSING/COMPENSATING records needing manual attention
    pub stuck: usize,
}

pub struct ReconcileWorker {
    service: Arc<TransactionService>,
    sagas: Arc<SagaOrchestrator>,
    config: WorkerConfig,
}

impl ReconcileWorker {
    pub fn new(
        service: Arc<TransactionService>,
        sagas: Arc<SagaOrchestrator>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            service,
            sagas,
            config,
        }
    }

    /// Scan every `scan_interval` until `shutdown` flips to true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting reconcile worker"
        );

        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Reconcile scan failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.scan_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Reconcile worker stopped");
    }

    /// Run a single sweep
    pub async fn scan_and_recover(&self) -> TxResult<ScanSummary> {
        let stale = self
            .service
            .transactions()
            .find_stale(self.config.stale_threshold, self.config.batch_size)
            .await?;

        let mut summary = ScanSummary {
            scanned: stale.len(),
            ..Default::default()
        };
        if stale.is_empty() {
            debug!("No stale transactions found");
            return Ok(summary);
        }
        info!(count = stale.len(), "Found stale transactions");

        for tx in &stale {
            match tx.status {
                TxStatus::Pending => {
                    if self.redrive(tx).await {
                        summary.advanced += 1;
                    }
                }
                status => {
                    warn!(
                        transaction_id = %tx.transaction_id,
                        status = %status,
                        updated_at = %tx.updated_at,
                        "Transaction stuck; manual reconciliation required"
                    );
                    summary.stuck += 1;
                }
            }
        }

        if summary.advanced > 0 || summary.stuck > 0 {
            info!(
                advanced = summary.advanced,
                stuck = summary.stuck,
                "Reconcile scan finished"
            );
        }
        Ok(summary)
    }

    /// Re-drive one PENDING record; true if it left PENDING.
    async fn redrive(&self, tx: &Transaction) -> bool {
        let id = tx.transaction_id;
        let result = match self.route(tx).await {
            Ok(Route::Saga) => self.sagas.execute_saga(id).await.map(|_| ()),
            Ok(Route::Transfer(reference_id)) => self
                .service
                .resume_transfer(&reference_id)
                .await
                .map(|_| ()),
            Ok(Route::Single) => self.service.process_transaction(id).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            // Business rejections still move the record to FAILED
            debug!(transaction_id = %id, error = %e, "Re-driven transaction returned error");
        }

        match self.service.transactions().get(id).await {
            Ok(Some(now)) if now.status != TxStatus::Pending => {
                info!(transaction_id = %id, status = %now.status, "Stale transaction advanced");
                true
            }
            Ok(_) => false,
            Err(e) => {
                error!(transaction_id = %id, error = %e, "Failed to reload transaction");
                false
            }
        }
    }

    async fn route(&self, tx: &Transaction) -> TxResult<Route> {
        if tx.saga {
            return Ok(Route::Saga);
        }
        // Saga rows written before the flag existed
        let steps = self
            .service
            .transactions()
            .list_steps(tx.transaction_id, StepOrder::Forward)
            .await?;
        if !steps.is_empty() {
            return Ok(Route::Saga);
        }

        match (&tx.tx_type, &tx.reference_id) {
            (TransactionType::TransferDebit | TransactionType::TransferCredit, Some(reference)) => {
                Ok(Route::Transfer(reference.clone()))
            }
            _ => Ok(Route::Single),
        }
    }
}

enum Route {
    Saga,
    Transfer(String),
    Single,
}
