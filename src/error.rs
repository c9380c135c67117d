//! Transaction Error Types
//!
//! One error type for the whole core. Business-rule and concurrency failures
//! are distinct variants so callers can match on them instead of strings.

use rust_decimal::Decimal;
use thiserror::Error;

/// Transaction core error types
///
/// Error codes are stable strings used in API responses.
#[derive(Error, Debug, Clone)]
pub enum TxError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and target account cannot be the same")]
    SameAccount,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Resource Errors ===
    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Account number {0} already exists")]
    DuplicateAccount(String),

    #[error("Transaction {0} not found")]
    TransactionNotFound(String),

    // === Business Rule Errors ===
    #[error("Insufficient funds: {balance} < {amount}")]
    InsufficientFunds { balance: Decimal, amount: Decimal },

    #[error("Balance limit exceeded: {balance} + {amount}")]
    BalanceLimitExceeded { balance: Decimal, amount: Decimal },

    // === Concurrency Errors ===
    #[error("Failed to acquire lock: {0}")]
    LockAcquisition(String),

    #[error("Failed to process transaction after {retries} retries")]
    OptimisticLock { retries: u32 },

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // === Transfer / Saga Errors ===
    #[error("Transfer {reference_id} reversed after credit leg failed: {cause}")]
    TransferReversed { reference_id: String, cause: String },

    #[error("Transfer {reference_id} debited but reversal failed: {cause}")]
    ReversalFailed { reference_id: String, cause: String },

    #[error("Step {step} failed: {reason}")]
    StepFailed { step: String, reason: String },

    // === System Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Lock store error: {0}")]
    LockStore(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TxError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TxError::InvalidAmount => "INVALID_AMOUNT",
            TxError::SameAccount => "SAME_ACCOUNT",
            TxError::InvalidRequest(_) => "INVALID_REQUEST",
            TxError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TxError::DuplicateAccount(_) => "DUPLICATE_ACCOUNT",
            TxError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            TxError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TxError::BalanceLimitExceeded { .. } => "BALANCE_LIMIT_EXCEEDED",
            TxError::LockAcquisition(_) => "LOCK_ACQUISITION_FAILED",
            TxError::OptimisticLock { .. } => "OPTIMISTIC_LOCK_CONFLICT",
            TxError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            TxError::TransferReversed { .. } => "TRANSFER_REVERSED",
            TxError::ReversalFailed { .. } => "REVERSAL_FAILED",
            TxError::StepFailed { .. } => "STEP_FAILED",
            TxError::Database(_) => "DATABASE_ERROR",
            TxError::LockStore(_) => "LOCK_STORE_ERROR",
            TxError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TxError::InvalidAmount
            | TxError::SameAccount
            | TxError::InvalidRequest(_)
            | TxError::InsufficientFunds { .. }
            | TxError::BalanceLimitExceeded { .. } => 400,
            TxError::AccountNotFound(_) | TxError::TransactionNotFound(_) => 404,
            TxError::DuplicateAccount(_)
            | TxError::LockAcquisition(_)
            | TxError::OptimisticLock { .. }
            | TxError::InvalidStateTransition(_)
            | TxError::TransferReversed { .. } => 409,
            TxError::StepFailed { .. } => 422,
            TxError::LockStore(_) => 503,
            TxError::ReversalFailed { .. } | TxError::Database(_) | TxError::Internal(_) => 500,
        }
    }

    /// Contention failures: the caller may resubmit the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxError::LockAcquisition(_) | TxError::OptimisticLock { .. }
        )
    }

    /// Infrastructure failures (store unreachable, driver errors).
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            TxError::Database(_) | TxError::LockStore(_) | TxError::Internal(_)
        )
    }
}

impl From<sqlx::Error> for TxError {
    fn from(e: sqlx::Error) -> Self {
        TxError::Database(e.to_string())
    }
}

impl From<redis::RedisError> for TxError {
    fn from(e: redis::RedisError) -> Self {
        TxError::LockStore(e.to_string())
    }
}

impl From<serde_json::Error> for TxError {
    fn from(e: serde_json::Error) -> Self {
        TxError::Internal(format!("payload serialization: {}", e))
    }
}

pub type TxResult<T> = Result<T, TxError>;
