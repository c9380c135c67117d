//! fintx - Financial Transaction Core
//!
//! Account balances that stay correct under concurrent writers.
//!
//! # Modules
//!
//! - [`lock`] - Named distributed lock (Redis or in-process store)
//! - [`account`] - Accounts and compare-and-set balance updates
//! - [`transaction`] - Transaction records, processing, transfers
//! - [`saga`] - Multi-step sagas with reverse-order compensation
//! - [`reconcile`] - Background sweep over stalled transactions
//! - [`gateway`] - HTTP API
//! - [`db`] - PostgreSQL pool and schema
//!
//! # Write Path
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │ Gateway  │───▶│  Lock    │───▶│  Ledger  │───▶│  Status  │
//! │  (HTTP)  │    │ (Redis)  │    │  (CAS)   │    │  (CAS)   │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```

pub mod account;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod logging;
pub mod reconcile;
pub mod saga;
pub mod transaction;

// Convenient re-exports at crate root
pub use account::{Account, AccountStore, BalanceDelta, MemoryAccountStore, PgAccountStore};
pub use error::{TxError, TxResult};
pub use lock::{DistributedLock, LockConfig, LockGuard, LockStore, MemoryLockStore, RedisLockStore};
pub use reconcile::{ReconcileWorker, WorkerConfig};
pub use saga::{SagaKind, SagaOrchestrator, SagaRequest};
pub use transaction::{
    MemoryTransactionStore, PgTransactionStore, Transaction, TransactionId, TransactionService,
    TransactionStore, TransactionType, TxStatus,
};
