//! Integration Tests for the transaction service
//!
//! Full processing flows over the in-memory stores. Store faults are injected
//! through a wrapping [`AccountStore`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::account::{Account, AccountStore, MAX_BALANCE, MemoryAccountStore};
use crate::error::{TxError, TxResult};
use crate::lock::{DistributedLock, LockConfig, MemoryLockStore, account_resource};
use crate::transaction::memory::MemoryTransactionStore;
use crate::transaction::service::TransactionService;
use crate::transaction::state::TxStatus;
use crate::transaction::store::TransactionStore;
use crate::transaction::types::{NewTransaction, TransactionType};

/// Account store with switchable faults
#[derive(Default)]
struct FaultyAccounts {
    inner: MemoryAccountStore,
    /// CAS on these account ids always reports a conflict
    reject_cas: Mutex<HashSet<i64>>,
    /// Next CAS fails with a store error
    error_cas: AtomicBool,
    /// Next CAS is preceded by a competing writer bumping the version
    interlope: AtomicBool,
}

#[async_trait]
impl AccountStore for FaultyAccounts {
    async fn create_account(
        &self,
        account_number: &str,
        initial_balance: Decimal,
    ) -> TxResult<Account> {
        self.inner
            .create_account(account_number, initial_balance)
            .await
    }

    async fn get(&self, account_id: i64) -> TxResult<Option<Account>> {
        self.inner.get(account_id).await
    }

    async fn get_by_number(&self, account_number: &str) -> TxResult<Option<Account>> {
        self.inner.get_by_number(account_number).await
    }

    async fn compare_and_set_balance(
        &self,
        account_id: i64,
        new_balance: Decimal,
        expected_version: i64,
    ) -> TxResult<bool> {
        if self.reject_cas.lock().unwrap().contains(&account_id) {
            return Ok(false);
        }
        if self.error_cas.swap(false, Ordering::SeqCst) {
            return Err(TxError::Database("connection reset".into()));
        }
        if self.interlope.swap(false, Ordering::SeqCst) {
            let current = self.inner.get(account_id).await?.unwrap();
            assert!(
                self.inner
                    .compare_and_set_balance(account_id, current.balance, current.version)
                    .await?
            );
        }
        self.inner
            .compare_and_set_balance(account_id, new_balance, expected_version)
            .await
    }
}

struct TestHarness {
    service: Arc<TransactionService>,
    accounts: Arc<FaultyAccounts>,
    transactions: Arc<MemoryTransactionStore>,
    locks: Arc<MemoryLockStore>,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_lock_config(LockConfig {
            ttl: Duration::from_secs(5),
            max_retries: 2000,
            retry_delay: Duration::from_millis(1),
        })
    }

    fn with_lock_config(lock_config: LockConfig) -> Self {
        let accounts = Arc::new(FaultyAccounts::default());
        let transactions = Arc::new(MemoryTransactionStore::new());
        let locks = Arc::new(MemoryLockStore::new());
        let service = Arc::new(TransactionService::with_config(
            accounts.clone(),
            transactions.clone(),
            locks.clone(),
            lock_config,
            3,
        ));
        Self {
            service,
            accounts,
            transactions,
            locks,
        }
    }

    async fn open(&self, number: &str, balance: i64) -> Account {
        self.service
            .create_account(number, Decimal::new(balance, 0))
            .await
            .unwrap()
    }

    async fn account(&self, number: &str) -> Account {
        self.service.get_account(number).await.unwrap()
    }

    async fn run(
        &self,
        number: &str,
        tx_type: TransactionType,
        amount: i64,
    ) -> TxResult<crate::transaction::Transaction> {
        let tx = self
            .service
            .create_transaction(number, tx_type, Decimal::new(amount, 0), None)
            .await?;
        self.service.process_transaction(tx.transaction_id).await
    }
}

// ========================================================================
// Single transactions
// ========================================================================

#[tokio::test]
async fn test_credit_and_debit_complete() {
    let h = TestHarness::new();
    h.open("ACC-1", 100).await;

    let credit = h.run("ACC-1", TransactionType::Credit, 50).await.unwrap();
    assert_eq!(credit.status, TxStatus::Completed);

    let debit = h.run("ACC-1", TransactionType::Debit, 30).await.unwrap();
    assert_eq!(debit.status, TxStatus::Completed);

    let account = h.account("ACC-1").await;
    assert_eq!(account.balance, Decimal::new(120, 0));
    assert_eq!(account.version, 3);
}

#[tokio::test]
async fn test_insufficient_funds_leaves_balance_untouched() {
    let h = TestHarness::new();
    h.open("ACC-1", 20).await;

    let tx = h
        .service
        .create_transaction("ACC-1", TransactionType::Debit, Decimal::new(50, 0), None)
        .await
        .unwrap();
    let result = h.service.process_transaction(tx.transaction_id).await;
    match result {
        Err(TxError::InsufficientFunds { balance, amount }) => {
            assert_eq!(balance, Decimal::new(20, 0));
            assert_eq!(amount, Decimal::new(50, 0));
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }

    let stored = h.transactions.get(tx.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TxStatus::Failed);

    let account = h.account("ACC-1").await;
    assert_eq!(account.balance, Decimal::new(20, 0));
    assert_eq!(account.version, 1);
}

#[tokio::test]
async fn test_reprocessing_terminal_is_noop() {
    let h = TestHarness::new();
    h.open("ACC-1", 10).await;

    let done = h.run("ACC-1", TransactionType::Credit, 5).await.unwrap();
    let again = h
        .service
        .process_transaction(done.transaction_id)
        .await
        .unwrap();
    assert_eq!(again.status, TxStatus::Completed);

    let failed = h
        .service
        .create_transaction("ACC-1", TransactionType::Debit, Decimal::new(500, 0), None)
        .await
        .unwrap();
    assert!(h.service.process_transaction(failed.transaction_id).await.is_err());
    let again = h
        .service
        .process_transaction(failed.transaction_id)
        .await
        .unwrap();
    assert_eq!(again.status, TxStatus::Failed);

    let account = h.account("ACC-1").await;
    assert_eq!(account.balance, Decimal::new(15, 0));
    assert_eq!(account.version, 2);
}

#[tokio::test]
async fn test_unknown_transaction() {
    let h = TestHarness::new();
    let result = h
        .service
        .process_transaction(crate::transaction::TransactionId::new())
        .await;
    assert!(matches!(result, Err(TxError::TransactionNotFound(_))));
}

#[tokio::test]
async fn test_create_transaction_validation() {
    let h = TestHarness::new();
    h.open("ACC-1", 10).await;

    let zero = h
        .service
        .create_transaction("ACC-1", TransactionType::Credit, Decimal::ZERO, None)
        .await;
    assert!(matches!(zero, Err(TxError::InvalidAmount)));

    let missing = h
        .service
        .create_transaction("NOPE", TransactionType::Credit, Decimal::ONE, None)
        .await;
    assert!(matches!(missing, Err(TxError::AccountNotFound(_))));
    let huge = h
        .service
        .create_transaction("ACC-1", TransactionType::Credit, Decimal::MAX, None)
        .await;
    assert!(matches!(huge, Err(TxError::InvalidAmount)));
}

#[tokio::test]
async fn test_credit_past_balance_limit_fails_cleanly() {
    let h = TestHarness::new();
    h.service
        .create_account("ACC-1", MAX_BALANCE)
        .await
        .unwrap();

    let tx = h
        .service
        .create_transaction("ACC-1", TransactionType::Credit, Decimal::ONE, None)
        .await
        .unwrap();
    let result = h.service.process_transaction(tx.transaction_id).await;
    assert!(matches!(result, Err(TxError::BalanceLimitExceeded { .. })));

    let stored = h.transactions.get(tx.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TxStatus::Failed);
    let account = h.account("ACC-1").await;
    assert_eq!(account.balance, MAX_BALANCE);
    assert_eq!(account.version, 1);

    // The lock was released on the error path
    let debit = h.run("ACC-1", TransactionType::Debit, 1).await.unwrap();
    assert_eq!(debit.status, TxStatus::Completed);
}

#[tokio::test]
async fn test_create_account_rules() {
    let h = TestHarness::new();
    h.open("ACC-1", 10).await;

    let dup = h.service.create_account("ACC-1", Decimal::ZERO).await;
    assert!(matches!(dup, Err(TxError::DuplicateAccount(n)) if n == "ACC-1"));

    let negative = h.service.create_account("ACC-2", Decimal::new(-1, 0)).await;
    assert!(matches!(negative, Err(TxError::InvalidAmount)));

    let over = h
        .service
        .create_account("ACC-3", MAX_BALANCE + Decimal::ONE)
        .await;
    assert!(matches!(over, Err(TxError::InvalidAmount)));

    let blank = h.service.create_account("  ", Decimal::ZERO).await;
    assert!(matches!(blank, Err(TxError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_version_conflict_is_retried() {
    let h = TestHarness::new();
    h.open("ACC-1", 100).await;
    h.accounts.interlope.store(true, Ordering::SeqCst);

    let tx = h.run("ACC-1", TransactionType::Debit, 40).await.unwrap();
    assert_eq!(tx.status, TxStatus::Completed);

    let account = h.account("ACC-1").await;
    assert_eq!(account.balance, Decimal::new(60, 0));
    // Competing writer took version 2
    assert_eq!(account.version, 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let h = TestHarness::new();
    let account = h.open("ACC-1", 100).await;
    h.accounts.reject_cas.lock().unwrap().insert(account.id);

    let tx = h
        .service
        .create_transaction("ACC-1", TransactionType::Credit, Decimal::ONE, None)
        .await
        .unwrap();
    let result = h.service.process_transaction(tx.transaction_id).await;
    assert!(matches!(result, Err(TxError::OptimisticLock { retries: 3 })));

    let stored = h.transactions.get(tx.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TxStatus::Failed);
    assert_eq!(h.account("ACC-1").await.balance, Decimal::new(100, 0));
}

#[tokio::test]
async fn test_cas_store_error_stays_processing() {
    let h = TestHarness::new();
    h.open("ACC-1", 100).await;
    h.accounts.error_cas.store(true, Ordering::SeqCst);

    let tx = h
        .service
        .create_transaction("ACC-1", TransactionType::Credit, Decimal::ONE, None)
        .await
        .unwrap();
    let result = h.service.process_transaction(tx.transaction_id).await;
    assert!(matches!(result, Err(TxError::Database(_))));

    let stored = h.transactions.get(tx.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TxStatus::Processing);
    // Lock was still released
    assert!(h.locks.holder("lock:account:ACC-1").is_none());
}

#[tokio::test]
async fn test_lock_busy_fails_transaction() {
    let h = TestHarness::with_lock_config(LockConfig {
        ttl: Duration::from_secs(5),
        max_retries: 2,
        retry_delay: Duration::from_millis(1),
    });
    h.open("ACC-1", 100).await;

    let holder = DistributedLock::new(
        h.locks.clone(),
        &account_resource("ACC-1"),
        LockConfig::default(),
    )
    .lock()
    .await
    .unwrap();

    let tx = h
        .service
        .create_transaction("ACC-1", TransactionType::Credit, Decimal::ONE, None)
        .await
        .unwrap();
    let result = h.service.process_transaction(tx.transaction_id).await;
    assert!(matches!(result, Err(TxError::LockAcquisition(_))));

    let stored = h.transactions.get(tx.transaction_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TxStatus::Failed);

    holder.release().await.unwrap();
    assert_eq!(h.account("ACC-1").await.version, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_lose_nothing() {
    let h = TestHarness::new();
    h.open("ACC-1", 100).await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let service = h.service.clone();
        let tx_type = if i % 2 == 0 {
            TransactionType::Credit
        } else {
            TransactionType::Debit
        };
        handles.push(tokio::spawn(async move {
            let tx = service
                .create_transaction("ACC-1", tx_type, Decimal::new(5, 0), None)
                .await?;
            service.process_transaction(tx.transaction_id).await
        }));
    }

    for handle in handles {
        let tx = handle.await.unwrap().unwrap();
        assert_eq!(tx.status, TxStatus::Completed);
    }

    let account = h.account("ACC-1").await;
    assert_eq!(account.balance, Decimal::new(100, 0));
    assert_eq!(account.version, 41);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_cannot_overdraw() {
    let h = TestHarness::new();
    h.open("ACC-1", 100).await;

    let mut ids = Vec::new();
    for amount in [80, 50] {
        let tx = h
            .service
            .create_transaction("ACC-1", TransactionType::Debit, Decimal::new(amount, 0), None)
            .await
            .unwrap();
        ids.push(tx.transaction_id);
    }

    let (first, second) = tokio::join!(
        tokio::spawn({
            let service = h.service.clone();
            let id = ids[0];
            async move { service.process_transaction(id).await }
        }),
        tokio::spawn({
            let service = h.service.clone();
            let id = ids[1];
            async move { service.process_transaction(id).await }
        }),
    );
    let results = [first.unwrap(), second.unwrap()];

    let completed = results
        .iter()
        .filter(|r| matches!(r, Ok(tx) if tx.status == TxStatus::Completed))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(TxError::InsufficientFunds { .. })))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(rejected, 1);

    // 80 first leaves 20; 50 first leaves 50
    let expected = if results[0].is_ok() {
        Decimal::new(20, 0)
    } else {
        Decimal::new(50, 0)
    };
    let account = h.account("ACC-1").await;
    assert_eq!(account.balance, expected);
    assert_eq!(account.version, 2);
}

#[tokio::test]
async fn test_larger_debit_first_leaves_twenty() {
    let h = TestHarness::new();
    h.open("ACC-1", 100).await;

    let big = h.run("ACC-1", TransactionType::Debit, 80).await.unwrap();
    assert_eq!(big.status, TxStatus::Completed);
    let small = h.run("ACC-1", TransactionType::Debit, 50).await;
    assert!(matches!(small, Err(TxError::InsufficientFunds { .. })));

    let account = h.account("ACC-1").await;
    assert_eq!(account.balance, Decimal::new(20, 0));
    assert_eq!(account.version, 2);
}

#[tokio::test]
async fn test_list_transactions_newest_first() {
    let h = TestHarness::new();
    h.open("ACC-1", 0).await;
    let first = h.run("ACC-1", TransactionType::Credit, 1).await.unwrap();
    let second = h.run("ACC-1", TransactionType::Credit, 2).await.unwrap();

    let listed = h.service.list_transactions("ACC-1", 10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].transaction_id, second.transaction_id);
    assert_eq!(listed[1].transaction_id, first.transaction_id);

    let detail = h
        .service
        .get_transaction(first.transaction_id)
        .await
        .unwrap();
    assert!(detail.steps.is_empty());
    assert_eq!(detail.transaction.amount, Decimal::ONE);
}

// ========================================================================
// Transfers
// ========================================================================

#[tokio::test]
async fn test_transfer_moves_funds() {
    let h = TestHarness::new();
    h.open("A", 100).await;
    h.open("B", 0).await;

    let outcome = h
        .service
        .transfer("A", "B", Decimal::new(30, 0), None)
        .await
        .unwrap();
    assert_eq!(outcome.debit.status, TxStatus::Completed);
    assert_eq!(outcome.credit.status, TxStatus::Completed);
    assert_eq!(outcome.debit.tx_type, TransactionType::TransferDebit);
    assert_eq!(outcome.credit.tx_type, TransactionType::TransferCredit);
    assert_eq!(outcome.debit.description.as_deref(), Some("Transfer out"));
    assert_eq!(outcome.credit.description.as_deref(), Some("Transfer in"));

    let legs = h.service.transfer_legs(&outcome.reference_id).await.unwrap();
    assert_eq!(legs.len(), 2);

    let a = h.account("A").await;
    let b = h.account("B").await;
    assert_eq!((a.balance, a.version), (Decimal::new(70, 0), 2));
    assert_eq!((b.balance, b.version), (Decimal::new(30, 0), 2));
    assert!(h.locks.holder("lock:account:A").is_none());
    assert!(h.locks.holder("lock:account:B").is_none());
}

#[tokio::test]
async fn test_transfer_insufficient_funds_fails_both_legs() {
    let h = TestHarness::new();
    h.open("A", 10).await;
    h.open("B", 0).await;

    let result = h.service.transfer("A", "B", Decimal::new(30, 0), None).await;
    assert!(matches!(result, Err(TxError::InsufficientFunds { .. })));

    let a = h.account("A").await;
    let legs = h.transactions.list_by_account(a.id, 10).await.unwrap();
    let reference = legs[0].reference_id.clone().unwrap();
    let legs = h.service.transfer_legs(&reference).await.unwrap();
    assert_eq!(legs.len(), 2);
    assert!(legs.iter().all(|t| t.status == TxStatus::Failed));

    assert_eq!(a.balance, Decimal::new(10, 0));
    assert_eq!(h.account("B").await.balance, Decimal::ZERO);
}

#[tokio::test]
async fn test_transfer_validation() {
    let h = TestHarness::new();
    h.open("A", 10).await;

    assert!(matches!(
        h.service.transfer("A", "A", Decimal::ONE, None).await,
        Err(TxError::SameAccount)
    ));
    assert!(matches!(
        h.service.transfer("A", "B", Decimal::ZERO, None).await,
        Err(TxError::InvalidAmount)
    ));
    assert!(matches!(
        h.service.transfer("A", "B", Decimal::ONE, None).await,
        Err(TxError::AccountNotFound(n)) if n == "B"
    ));
}

#[tokio::test]
async fn test_failed_credit_leg_is_reversed() {
    let h = TestHarness::new();
    h.open("A", 100).await;
    let b = h.open("B", 0).await;
    h.accounts.reject_cas.lock().unwrap().insert(b.id);

    let result = h.service.transfer("A", "B", Decimal::new(40, 0), None).await;
    let reference_id = match result {
        Err(TxError::TransferReversed { reference_id, .. }) => reference_id,
        other => panic!("expected TransferReversed, got {:?}", other),
    };

    let legs = h.service.transfer_legs(&reference_id).await.unwrap();
    assert_eq!(legs.len(), 3);
    assert_eq!(legs[0].tx_type, TransactionType::TransferDebit);
    assert_eq!(legs[0].status, TxStatus::Completed);
    assert_eq!(legs[1].tx_type, TransactionType::TransferCredit);
    assert_eq!(legs[1].status, TxStatus::Failed);
    assert_eq!(legs[2].tx_type, TransactionType::Credit);
    assert_eq!(legs[2].status, TxStatus::Completed);
    assert_eq!(legs[2].description.as_deref(), Some("Transfer reversal"));

    let a = h.account("A").await;
    assert_eq!(a.balance, Decimal::new(100, 0));
    // Debit then reversal
    assert_eq!(a.version, 3);
    assert_eq!(h.account("B").await.balance, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock() {
    let h = TestHarness::new();
    h.open("A", 1000).await;
    h.open("B", 1000).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let service = h.service.clone();
        let (from, to) = if i % 2 == 0 { ("A", "B") } else { ("B", "A") };
        handles.push(tokio::spawn(async move {
            service.transfer(from, to, Decimal::new(10, 0), None).await
        }));
    }

    let all = async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("transfers deadlocked");

    let a = h.account("A").await;
    let b = h.account("B").await;
    assert_eq!(a.balance + b.balance, Decimal::new(2000, 0));
    assert_eq!(a.balance, Decimal::new(1000, 0));
    assert_eq!(a.version, 21);
    assert_eq!(b.version, 21);
}

#[tokio::test]
async fn test_resume_abandoned_transfer() {
    let h = TestHarness::new();
    let a = h.open("A", 50).await;
    let b = h.open("B", 0).await;

    // Legs recorded but never processed
    let reference = "ref-crashed";
    h.transactions
        .create(
            NewTransaction::new(a.id, Decimal::new(20, 0), TransactionType::TransferDebit)
                .with_reference(reference),
        )
        .await
        .unwrap();
    h.transactions
        .create(
            NewTransaction::new(b.id, Decimal::new(20, 0), TransactionType::TransferCredit)
                .with_reference(reference),
        )
        .await
        .unwrap();

    let legs = h.service.resume_transfer(reference).await.unwrap();
    assert!(legs.iter().all(|t| t.status == TxStatus::Completed));
    assert_eq!(h.account("A").await.balance, Decimal::new(30, 0));
    assert_eq!(h.account("B").await.balance, Decimal::new(20, 0));

    // Second resume changes nothing
    h.service.resume_transfer(reference).await.unwrap();
    assert_eq!(h.account("B").await.version, 2);
}
