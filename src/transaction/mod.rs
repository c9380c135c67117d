//! Transactions and Transfers
//!
//! Single credits/debits and two-leg transfers over versioned account
//! balances.
//!
//! # Lifecycle
//!
//! ```text
//! create → PENDING ──lock──→ PROCESSING ──CAS ok──→ COMPLETED
//!             │                   │
//!             └──lock busy──→ FAILED ←── insufficient funds / retries exhausted
//! ```
//!
//! # Safety Invariants
//!
//! 1. **CAS Backstop**: every balance write carries the version it read; a
//!    stale writer gets zero rows and retries from a fresh read.
//! 2. **Sorted Locks**: transfers lock both accounts in ascending account
//!    number order, so opposite transfers cannot deadlock.
//! 3. **Unknown Is Not Failed**: a balance write whose outcome is unknown
//!    leaves the transaction PROCESSING; it is never reversed blindly.
//! 4. **Terminal Is Final**: COMPLETED, FAILED and COMPENSATED rows are never
//!    modified again.

pub mod db;
pub mod memory;
pub mod service;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use db::PgTransactionStore;
pub use memory::MemoryTransactionStore;
pub use service::{DEFAULT_MAX_RETRIES, MAX_LIST_LIMIT, TransactionService};
pub use state::{StepStatus, TxStatus};
pub use store::TransactionStore;
pub use types::{
    NewTransaction, ServiceName, StepDefinition, StepOrder, Transaction, TransactionDetail,
    TransactionId, TransactionStep, TransactionType, TransferOutcome,
};
