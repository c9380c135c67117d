//! Saga Orchestrator
//!
//! Runs a saga's persisted steps in order and, on the first failure,
//! compensates the completed ones in reverse order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::definitions::{SagaDefinitions, SagaKind, SagaPayload};
use super::handlers::StepRegistry;
use crate::account::{AccountStore, validate_amount};
use crate::error::{TxError, TxResult};
use crate::transaction::{
    NewTransaction, StepOrder, StepStatus, Transaction, TransactionDetail, TransactionId,
    TransactionStep, TransactionStore, TxStatus,
};

/// Input for a new saga
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaRequest {
    pub account_number: String,
    pub kind: SagaKind,
    pub amount: Decimal,
    #[serde(default)]
    pub recipient_account: Option<String>,
}

/// Result of running one step forward
enum StepOutcome {
    Completed,
    Failed(TxError),
}

pub struct SagaOrchestrator {
    accounts: Arc<dyn AccountStore>,
    transactions: Arc<dyn TransactionStore>,
    definitions: SagaDefinitions,
    registry: StepRegistry,
}

impl SagaOrchestrator {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionStore>,
        definitions: SagaDefinitions,
        registry: StepRegistry,
    ) -> Self {
        Self {
            accounts,
            transactions,
            definitions,
            registry,
        }
    }

    /// Standard definitions with the standard handlers
    pub fn standard(
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionStore>,
        max_retries: u32,
    ) -> Self {
        let registry = StepRegistry::standard(accounts.clone(), max_retries);
        Self::new(accounts, transactions, SagaDefinitions::standard(), registry)
    }

    pub fn definitions(&self) -> &SagaDefinitions {
        &self.definitions
    }

    /// Record a PENDING saga transaction and its PENDING steps
    pub async fn create_saga(&self, request: SagaRequest) -> TxResult<TransactionDetail> {
        validate_amount(request.amount)?;
        if request.kind == SagaKind::Transfer {
            match request.recipient_account.as_deref() {
                None | Some("") => {
                    return Err(TxError::InvalidRequest(
                        "recipient_account is required for TRANSFER".into(),
                    ));
                }
                Some(recipient) if recipient == request.account_number => {
                    return Err(TxError::SameAccount);
                }
                Some(_) => {}
            }
        }

        let account = self
            .accounts
            .get_by_number(&request.account_number)
            .await?
            .ok_or_else(|| TxError::AccountNotFound(request.account_number.clone()))?;

        let definitions = self.definitions.steps_for(request.kind);
        if definitions.is_empty() {
            return Err(TxError::InvalidRequest(format!(
                "no steps defined for {}",
                request.kind
            )));
        }

        let payload = SagaPayload {
            account_number: request.account_number.clone(),
            recipient_account: request.recipient_account.clone(),
            amount: request.amount,
            transaction_type: request.kind,
        }
        .to_value()?;

        let transaction = self
            .transactions
            .create(
                NewTransaction::new(account.id, request.amount, request.kind.tx_type())
                    .with_description(format!("{} saga", request.kind))
                    .as_saga(),
            )
            .await?;
        let steps = match self
            .transactions
            .create_steps(transaction.transaction_id, definitions, &payload)
            .await
        {
            Ok(steps) => steps,
            Err(e) => {
                let id = transaction.transaction_id;
                match self
                    .transactions
                    .update_status_if(id, TxStatus::Pending, TxStatus::Failed)
                    .await
                {
                    Ok(_) => warn!(transaction_id = %id, error = %e, "Saga steps not recorded, saga failed"),
                    // Stays PENDING; the reconciler fails it through execute_saga
                    Err(mark) => error!(
                        transaction_id = %id,
                        error = %e,
                        mark_error = %mark,
                        "Saga steps not recorded and saga could not be failed"
                    ),
                }
                return Err(e);
            }
        };

        info!(
            transaction_id = %transaction.transaction_id,
            kind = %request.kind,
            steps = steps.len(),
            "Saga created"
        );
        Ok(TransactionDetail { transaction, steps })
    }

    /// Run a PENDING saga to COMPLETED or COMPENSATED.
    ///
    /// Anything not PENDING is returned unchanged. A saga whose steps were
    /// never recorded ends FAILED without touching any balance. A store error
    /// mid-run leaves the transaction non-terminal for reconciliation.
    pub async fn execute_saga(&self, id: TransactionId) -> TxResult<Transaction> {
        let tx = self.load(id).await?;
        if tx.status != TxStatus::Pending {
            debug!(transaction_id = %id, status = %tx.status, "Saga already started, skipping");
            return Ok(tx);
        }
        if !self
            .transactions
            .update_status_if(id, TxStatus::Pending, TxStatus::Processing)
            .await?
        {
            return self.load(id).await;
        }

        let steps = self.transactions.list_steps(id, StepOrder::Forward).await?;
        if steps.is_empty() {
            warn!(transaction_id = %id, "Saga has no steps, failing it");
            self.transactions
                .update_status_if(id, TxStatus::Processing, TxStatus::Failed)
                .await?;
            return self.load(id).await;
        }
        for (index, step) in steps.iter().enumerate() {
            if let StepOutcome::Failed(cause) = self.run_step(step).await? {
                error!(
                    transaction_id = %id,
                    step = %step.step_name,
                    index,
                    error = %cause,
                    "Saga step failed, compensating"
                );
                self.transactions
                    .update_status_if(id, TxStatus::Processing, TxStatus::Compensating)
                    .await?;
                self.compensate(id, index).await?;
                return self.load(id).await;
            }
        }

        self.transactions
            .update_status_if(id, TxStatus::Processing, TxStatus::Completed)
            .await?;
        info!(transaction_id = %id, steps = steps.len(), "Saga completed");
        self.load(id).await
    }

    /// Run [`execute_saga`](Self::execute_saga) on a background task
    pub fn spawn_saga(self: &Arc<Self>, id: TransactionId) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = orchestrator.execute_saga(id).await {
                error!(transaction_id = %id, error = %e, "Saga execution aborted");
            }
        })
    }

    async fn run_step(&self, step: &TransactionStep) -> TxResult<StepOutcome> {
        self.transactions
            .set_step_status(step.id, StepStatus::Processing)
            .await?;
        debug!(step = %step.step_name, service = %step.service_name, "Executing step");

        let result = match self.registry.get(step.service_name, &step.step_name) {
            Some(handler) => handler.execute(&step.payload).await,
            None => Err(TxError::Internal(format!(
                "no handler for {}/{}",
                step.service_name, step.step_name
            ))),
        };

        match result {
            Ok(()) => {
                self.transactions
                    .set_step_status(step.id, StepStatus::Completed)
                    .await?;
                Ok(StepOutcome::Completed)
            }
            Err(e) => {
                self.transactions
                    .set_step_status(step.id, StepStatus::Failed)
                    .await?;
                Ok(StepOutcome::Failed(TxError::StepFailed {
                    step: step.step_name.clone(),
                    reason: e.to_string(),
                }))
            }
        }
    }

    /// Undo COMPLETED steps before `failed_index`, newest first. Best effort:
    /// a failing compensation marks its step FAILED and the sweep goes on.
    async fn compensate(&self, id: TransactionId, failed_index: usize) -> TxResult<()> {
        let steps = self.transactions.list_steps(id, StepOrder::Forward).await?;

        for step in steps.iter().take(failed_index).rev() {
            if step.status != StepStatus::Completed {
                continue;
            }
            let Some(payload) = &step.compensation_payload else {
                debug!(step = %step.step_name, "No compensation payload, skipping");
                continue;
            };

            self.set_step_status_logged(step, StepStatus::Compensating)
                .await;
            let result = match self.registry.get(step.service_name, &step.step_name) {
                Some(handler) => handler.compensate(payload).await,
                None => Err(TxError::Internal(format!(
                    "no handler for {}/{}",
                    step.service_name, step.step_name
                ))),
            };

            match result {
                Ok(()) => {
                    info!(transaction_id = %id, step = %step.step_name, "Step compensated");
                    self.set_step_status_logged(step, StepStatus::Compensated)
                        .await;
                }
                Err(e) => {
                    error!(
                        transaction_id = %id,
                        step = %step.step_name,
                        error = %e,
                        "Compensation failed; manual reconciliation required"
                    );
                    self.set_step_status_logged(step, StepStatus::Failed).await;
                }
            }
        }

        self.transactions
            .update_status_if(id, TxStatus::Compensating, TxStatus::Compensated)
            .await?;
        info!(transaction_id = %id, "Saga compensated");
        Ok(())
    }

    async fn set_step_status_logged(&self, step: &TransactionStep, status: StepStatus) {
        if let Err(e) = self.transactions.set_step_status(step.id, status).await {
            warn!(step = %step.step_name, status = %status, error = %e, "Step status update failed");
        }
    }

    async fn load(&self, id: TransactionId) -> TxResult<Transaction> {
        self.transactions
            .get(id)
            .await?
            .ok_or_else(|| TxError::TransactionNotFound(id.to_string()))
    }
}
