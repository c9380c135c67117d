//! Account balances
//!
//! Balances are only written through [`AccountStore::compare_and_set_balance`].

pub mod memory;
pub mod models;
pub mod repository;

pub use memory::MemoryAccountStore;
pub use models::{Account, BalanceDelta, MAX_BALANCE, validate_amount};
pub use repository::{AccountStore, PgAccountStore};

use tracing::warn;

use crate::error::{TxError, TxResult};

/// Read-modify-CAS loop for a single balance change.
///
/// Re-reads the account on every attempt. Debits that would go negative fail
/// with [`TxError::InsufficientFunds`] and credits past [`MAX_BALANCE`] with
/// [`TxError::BalanceLimitExceeded`], both without retrying.
pub async fn adjust_balance(
    store: &dyn AccountStore,
    account_number: &str,
    delta: BalanceDelta,
    max_retries: u32,
) -> TxResult<Account> {
    for attempt in 1..=max_retries {
        let account = store
            .get_by_number(account_number)
            .await?
            .ok_or_else(|| TxError::AccountNotFound(account_number.to_string()))?;

        let new_balance = delta.apply(account.balance)?;

        if store
            .compare_and_set_balance(account.id, new_balance, account.version)
            .await?
        {
            return Ok(Account {
                balance: new_balance,
                version: account.version + 1,
                ..account
            });
        }

        warn!(
            account = %account_number,
            attempt,
            max_retries,
            "Optimistic lock conflict"
        );
    }

    Err(TxError::OptimisticLock {
        retries: max_retries,
    })
}
