//! Transaction Service
//!
//! Drives single transactions and two-leg transfers. Locks cut contention;
//! the versioned balance CAS is what actually prevents lost updates.
//!
//! # Failure rules
//!
//! - A definite rejection (missing account, insufficient funds, lock busy,
//!   retries exhausted) marks the transaction FAILED.
//! - A store error on a balance CAS leaves the transaction PROCESSING: the
//!   write may or may not have landed, so only reconciliation may decide.
//! - A transfer whose credit leg FAILED after the debit completed is undone
//!   by a reversal CREDIT on the source account under the same locks.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::state::TxStatus;
use super::store::TransactionStore;
use super::types::{
    NewTransaction, StepOrder, Transaction, TransactionDetail, TransactionId, TransactionType,
    TransferOutcome,
};
use crate::account::{Account, AccountStore, MAX_BALANCE, validate_amount};
use crate::error::{TxError, TxResult};
use crate::lock::{
    DistributedLock, LockConfig, LockStore, account_resource, lock_all, release_all,
};

/// Default CAS attempts per transaction
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound for account transaction listings
pub const MAX_LIST_LIMIT: usize = 100;

const TRANSFER_OUT: &str = "Transfer out";
const TRANSFER_IN: &str = "Transfer in";
const TRANSFER_REVERSAL: &str = "Transfer reversal";

pub struct TransactionService {
    accounts: Arc<dyn AccountStore>,
    transactions: Arc<dyn TransactionStore>,
    locks: Arc<dyn LockStore>,
    lock_config: LockConfig,
    max_retries: u32,
}

impl TransactionService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionStore>,
        locks: Arc<dyn LockStore>,
    ) -> Self {
        Self::with_config(
            accounts,
            transactions,
            locks,
            LockConfig::default(),
            DEFAULT_MAX_RETRIES,
        )
    }

    pub fn with_config(
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionStore>,
        locks: Arc<dyn LockStore>,
        lock_config: LockConfig,
        max_retries: u32,
    ) -> Self {
        Self {
            accounts,
            transactions,
            locks,
            lock_config,
            max_retries,
        }
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    pub fn transactions(&self) -> &Arc<dyn TransactionStore> {
        &self.transactions
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    pub async fn create_account(
        &self,
        account_number: &str,
        initial_balance: Decimal,
    ) -> TxResult<Account> {
        if account_number.trim().is_empty() {
            return Err(TxError::InvalidRequest(
                "account_number must not be empty".into(),
            ));
        }
        if initial_balance.is_sign_negative() || initial_balance > MAX_BALANCE {
            return Err(TxError::InvalidAmount);
        }

        let account = self
            .accounts
            .create_account(account_number, initial_balance)
            .await?;
        info!(account = %account.account_number, balance = %account.balance, "Account created");
        Ok(account)
    }

    pub async fn get_account(&self, account_number: &str) -> TxResult<Account> {
        self.accounts
            .get_by_number(account_number)
            .await?
            .ok_or_else(|| TxError::AccountNotFound(account_number.to_string()))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_transaction(&self, id: TransactionId) -> TxResult<TransactionDetail> {
        let transaction = self.load(id).await?;
        let steps = self.transactions.list_steps(id, StepOrder::Forward).await?;
        Ok(TransactionDetail { transaction, steps })
    }

    /// Newest first, at most [`MAX_LIST_LIMIT`]
    pub async fn list_transactions(
        &self,
        account_number: &str,
        limit: usize,
    ) -> TxResult<Vec<Transaction>> {
        let account = self.get_account(account_number).await?;
        self.transactions
            .list_by_account(account.id, limit.min(MAX_LIST_LIMIT))
            .await
    }

    /// Newest first over every account, at most [`MAX_LIST_LIMIT`]
    pub async fn list_recent(&self, limit: usize) -> TxResult<Vec<Transaction>> {
        self.transactions
            .list_recent(limit.min(MAX_LIST_LIMIT))
            .await
    }

    /// All records sharing a transfer reference, oldest first
    pub async fn transfer_legs(&self, reference_id: &str) -> TxResult<Vec<Transaction>> {
        self.transactions.list_by_reference(reference_id).await
    }

    async fn load(&self, id: TransactionId) -> TxResult<Transaction> {
        self.transactions
            .get(id)
            .await?
            .ok_or_else(|| TxError::TransactionNotFound(id.to_string()))
    }

    // ========================================================================
    // Single transactions
    // ========================================================================

    /// Record a PENDING credit or debit for `account_number`
    pub async fn create_transaction(
        &self,
        account_number: &str,
        tx_type: TransactionType,
        amount: Decimal,
        description: Option<String>,
    ) -> TxResult<Transaction> {
        validate_amount(amount)?;
        let account = self.get_account(account_number).await?;

        let mut new = NewTransaction::new(account.id, amount, tx_type);
        new.description = description;
        let tx = self.transactions.create(new).await?;

        info!(
            transaction_id = %tx.transaction_id,
            account = %account_number,
            tx_type = %tx_type,
            amount = %amount,
            "Transaction created"
        );
        Ok(tx)
    }

    /// Apply a PENDING transaction under its account lock.
    ///
    /// Anything not PENDING is returned unchanged, so calling this twice is
    /// harmless.
    pub async fn process_transaction(&self, id: TransactionId) -> TxResult<Transaction> {
        let tx = self.load(id).await?;
        if tx.status != TxStatus::Pending {
            debug!(transaction_id = %id, status = %tx.status, "Already processed, skipping");
            return Ok(tx);
        }

        let account = match self.accounts.get(tx.account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                self.mark_failed(id, TxStatus::Pending).await;
                return Err(TxError::AccountNotFound(tx.account_id.to_string()));
            }
            Err(e) => {
                self.mark_failed(id, TxStatus::Pending).await;
                return Err(e);
            }
        };

        let lock = DistributedLock::new(
            self.locks.clone(),
            &account_resource(&account.account_number),
            self.lock_config,
        );
        let guard = match lock.lock().await {
            Ok(guard) => guard,
            Err(e @ TxError::LockAcquisition(_)) => {
                self.mark_failed(id, TxStatus::Pending).await;
                return Err(e);
            }
            // Lock store unreachable: nothing was attempted, stay PENDING
            Err(e) => return Err(e),
        };

        let result = self.process_locked(tx).await;

        if let Err(e) = guard.release().await {
            warn!(transaction_id = %id, error = %e, "Lock release failed");
        }
        result
    }

    /// Processing body. Caller must hold the lock on the transaction's account.
    async fn process_locked(&self, tx: Transaction) -> TxResult<Transaction> {
        let id = tx.transaction_id;
        if !self
            .transactions
            .update_status_if(id, TxStatus::Pending, TxStatus::Processing)
            .await?
        {
            debug!(transaction_id = %id, "Picked up by another worker");
            return self.load(id).await;
        }

        let delta = tx.tx_type.delta(tx.amount);
        for attempt in 1..=self.max_retries {
            let account = match self.accounts.get(tx.account_id).await {
                Ok(Some(account)) => account,
                Ok(None) => {
                    self.mark_failed(id, TxStatus::Processing).await;
                    return Err(TxError::AccountNotFound(tx.account_id.to_string()));
                }
                Err(e) => {
                    self.mark_failed(id, TxStatus::Processing).await;
                    return Err(e);
                }
            };

            let new_balance = match delta.apply(account.balance) {
                Ok(balance) => balance,
                Err(e) => {
                    info!(
                        transaction_id = %id,
                        balance = %account.balance,
                        amount = %tx.amount,
                        reason = e.code(),
                        "Balance change rejected"
                    );
                    self.mark_failed(id, TxStatus::Processing).await;
                    return Err(e);
                }
            };

            // An error here leaves the transaction PROCESSING
            if self
                .accounts
                .compare_and_set_balance(account.id, new_balance, account.version)
                .await?
            {
                if !self
                    .transactions
                    .update_status_if(id, TxStatus::Processing, TxStatus::Completed)
                    .await?
                {
                    warn!(transaction_id = %id, "Status moved while processing");
                }
                info!(
                    transaction_id = %id,
                    account = %account.account_number,
                    balance = %new_balance,
                    version = account.version + 1,
                    "Transaction completed"
                );
                return self.load(id).await;
            }

            warn!(
                transaction_id = %id,
                attempt,
                max_retries = self.max_retries,
                "Optimistic lock conflict, retrying"
            );
        }

        self.mark_failed(id, TxStatus::Processing).await;
        Err(TxError::OptimisticLock {
            retries: self.max_retries,
        })
    }

    /// Best-effort move to FAILED; errors are logged, never returned.
    async fn mark_failed(&self, id: TransactionId, expected: TxStatus) {
        match self
            .transactions
            .update_status_if(id, expected, TxStatus::Failed)
            .await
        {
            Ok(true) => info!(transaction_id = %id, from = %expected, "Transaction failed"),
            Ok(false) => debug!(transaction_id = %id, expected = %expected, "Status already moved"),
            Err(e) => error!(transaction_id = %id, error = %e, "Failed to mark transaction FAILED"),
        }
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Move `amount` between two accounts as a linked debit/credit pair.
    pub async fn transfer(
        &self,
        from_account: &str,
        to_account: &str,
        amount: Decimal,
        description: Option<String>,
    ) -> TxResult<TransferOutcome> {
        validate_amount(amount)?;
        if from_account == to_account {
            return Err(TxError::SameAccount);
        }

        let source = self.get_account(from_account).await?;
        let target = self.get_account(to_account).await?;

        let reference_id = uuid::Uuid::new_v4().to_string();
        let debit = self
            .transactions
            .create(
                NewTransaction::new(source.id, amount, TransactionType::TransferDebit)
                    .with_reference(&reference_id)
                    .with_description(description.as_deref().unwrap_or(TRANSFER_OUT)),
            )
            .await?;
        let credit = match self
            .transactions
            .create(
                NewTransaction::new(target.id, amount, TransactionType::TransferCredit)
                    .with_reference(&reference_id)
                    .with_description(description.as_deref().unwrap_or(TRANSFER_IN)),
            )
            .await
        {
            Ok(credit) => credit,
            Err(e) => {
                self.mark_failed(debit.transaction_id, TxStatus::Pending).await;
                return Err(e);
            }
        };

        info!(
            reference_id = %reference_id,
            from = %from_account,
            to = %to_account,
            amount = %amount,
            "Transfer created"
        );

        let resources = [account_resource(from_account), account_resource(to_account)];
        let guards = match lock_all(&self.locks, &resources, self.lock_config).await {
            Ok(guards) => guards,
            Err(e) => {
                // Transfer legs are never left PENDING on their own
                self.mark_failed(debit.transaction_id, TxStatus::Pending).await;
                self.mark_failed(credit.transaction_id, TxStatus::Pending).await;
                return Err(e);
            }
        };

        let result = self
            .transfer_locked(&reference_id, &source, debit, credit)
            .await;

        release_all(guards).await;
        result
    }

    /// Finish a transfer whose legs were left behind (crash between creating
    /// the legs and completing them).
    ///
    /// A PENDING debit runs the whole transfer; a COMPLETED debit with a
    /// PENDING credit runs the credit stage (with reversal on failure). A
    /// PENDING debit next to a FAILED credit is failed as well.
    pub async fn resume_transfer(&self, reference_id: &str) -> TxResult<Vec<Transaction>> {
        let legs = self.transactions.list_by_reference(reference_id).await?;
        let debit = legs
            .iter()
            .find(|t| t.tx_type == TransactionType::TransferDebit)
            .cloned();
        let credit = legs
            .iter()
            .find(|t| t.tx_type == TransactionType::TransferCredit)
            .cloned();
        let (Some(debit), Some(credit)) = (debit, credit) else {
            return Err(TxError::TransactionNotFound(format!(
                "transfer {} is missing a leg",
                reference_id
            )));
        };
        if credit.status != TxStatus::Pending {
            if debit.status == TxStatus::Pending && credit.status == TxStatus::Failed {
                self.mark_failed(debit.transaction_id, TxStatus::Pending).await;
                return self.transactions.list_by_reference(reference_id).await;
            }
            return Ok(legs);
        }

        let source = self.account_by_id(debit.account_id).await?;
        let target = self.account_by_id(credit.account_id).await?;
        let resources = [
            account_resource(&source.account_number),
            account_resource(&target.account_number),
        ];
        let guards = lock_all(&self.locks, &resources, self.lock_config).await?;

        // Re-read under the locks
        let debit = self.load(debit.transaction_id).await;
        let credit = self.load(credit.transaction_id).await;
        let result = match (debit, credit) {
            (Ok(debit), Ok(credit)) if credit.status == TxStatus::Pending => {
                info!(reference_id = %reference_id, debit_status = %debit.status, "Resuming transfer");
                match debit.status {
                    TxStatus::Pending => self
                        .transfer_locked(reference_id, &source, debit, credit)
                        .await
                        .map(|_| ()),
                    TxStatus::Completed => self
                        .finish_credit(reference_id, &source, debit, credit)
                        .await
                        .map(|_| ()),
                    TxStatus::Failed => {
                        self.mark_failed(credit.transaction_id, TxStatus::Pending).await;
                        Ok(())
                    }
                    _ => Ok(()),
                }
            }
            (Ok(_), Ok(_)) => Ok(()),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        release_all(guards).await;
        result?;
        self.transactions.list_by_reference(reference_id).await
    }

    async fn account_by_id(&self, account_id: i64) -> TxResult<Account> {
        self.accounts
            .get(account_id)
            .await?
            .ok_or_else(|| TxError::AccountNotFound(account_id.to_string()))
    }

    /// Both legs under both locks
    async fn transfer_locked(
        &self,
        reference_id: &str,
        source: &Account,
        debit: Transaction,
        credit: Transaction,
    ) -> TxResult<TransferOutcome> {
        let credit_id = credit.transaction_id;

        let debit = match self.process_locked(debit).await {
            Ok(debit) => debit,
            Err(e) => {
                warn!(reference_id = %reference_id, error = %e, "Transfer debit leg failed");
                self.mark_failed(credit_id, TxStatus::Pending).await;
                return Err(e);
            }
        };
        if debit.status != TxStatus::Completed {
            self.mark_failed(credit_id, TxStatus::Pending).await;
            return Err(TxError::InvalidStateTransition(format!(
                "debit leg {} ended {}",
                debit.transaction_id, debit.status
            )));
        }

        self.finish_credit(reference_id, source, debit, credit)
            .await
    }

    /// Credit stage of a transfer whose debit is COMPLETED
    async fn finish_credit(
        &self,
        reference_id: &str,
        source: &Account,
        debit: Transaction,
        credit: Transaction,
    ) -> TxResult<TransferOutcome> {
        let credit_id = credit.transaction_id;

        let cause = match self.process_locked(credit).await {
            Ok(credit) if credit.status == TxStatus::Completed => {
                info!(reference_id = %reference_id, amount = %debit.amount, "Transfer completed");
                return Ok(TransferOutcome {
                    reference_id: reference_id.to_string(),
                    debit,
                    credit,
                });
            }
            Ok(credit) => {
                error!(
                    reference_id = %reference_id,
                    credit_status = %credit.status,
                    "Credit leg taken by another worker; left for reconciliation"
                );
                return Err(TxError::InvalidStateTransition(format!(
                    "credit leg {} is {}",
                    credit_id, credit.status
                )));
            }
            Err(e) => e,
        };

        // Only a definite failure is reversed; an unknown CAS outcome is not
        match self.transactions.get(credit_id).await {
            Ok(Some(credit)) if credit.status == TxStatus::Failed => {}
            _ => {
                error!(
                    reference_id = %reference_id,
                    error = %cause,
                    "Credit leg outcome unknown; left for reconciliation"
                );
                return Err(cause);
            }
        }

        warn!(reference_id = %reference_id, error = %cause, "Credit leg failed, reversing debit");
        Err(self
            .reverse_debit(reference_id, source, debit.amount, cause)
            .await)
    }

    /// Credit the debited amount back to the source. Returns the error to
    /// report for the transfer.
    async fn reverse_debit(
        &self,
        reference_id: &str,
        source: &Account,
        amount: Decimal,
        cause: TxError,
    ) -> TxError {
        let reversal =
            NewTransaction::new(source.id, amount, TransactionType::Credit)
                .with_reference(reference_id)
                .with_description(TRANSFER_REVERSAL);

        let result: TxResult<Transaction> = async {
            let tx = self.transactions.create(reversal).await?;
            self.process_locked(tx).await
        }
        .await;

        match result {
            Ok(tx) if tx.status == TxStatus::Completed => {
                info!(
                    reference_id = %reference_id,
                    reversal_id = %tx.transaction_id,
                    "Transfer reversed"
                );
                TxError::TransferReversed {
                    reference_id: reference_id.to_string(),
                    cause: cause.to_string(),
                }
            }
            Ok(tx) => {
                error!(
                    reference_id = %reference_id,
                    reversal_id = %tx.transaction_id,
                    status = %tx.status,
                    "Transfer reversal did not complete"
                );
                TxError::ReversalFailed {
                    reference_id: reference_id.to_string(),
                    cause: format!("{}; reversal ended {}", cause, tx.status),
                }
            }
            Err(e) => {
                error!(
                    reference_id = %reference_id,
                    account = %source.account_number,
                    error = %e,
                    "Transfer reversal failed; manual reconciliation required"
                );
                TxError::ReversalFailed {
                    reference_id: reference_id.to_string(),
                    cause: format!("{}; reversal: {}", cause, e),
                }
            }
        }
    }
}
