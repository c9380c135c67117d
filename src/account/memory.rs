//! In-memory account store

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use super::models::Account;
use super::repository::AccountStore;
use crate::error::{TxError, TxResult};

#[derive(Default)]
struct Inner {
    next_id: i64,
    by_id: HashMap<i64, Account>,
    by_number: HashMap<String, i64>,
}

/// Process-local [`AccountStore`]; the mutex makes each call one atomic step.
#[derive(Default)]
pub struct MemoryAccountStore {
    inner: Mutex<Inner>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> TxResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| TxError::Internal("account table poisoned".into()))
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn create_account(
        &self,
        account_number: &str,
        initial_balance: Decimal,
    ) -> TxResult<Account> {
        let mut inner = self.locked()?;
        if inner.by_number.contains_key(account_number) {
            return Err(TxError::DuplicateAccount(account_number.to_string()));
        }

        inner.next_id += 1;
        let account = Account::new(inner.next_id, account_number, initial_balance);
        inner
            .by_number
            .insert(account_number.to_string(), account.id);
        inner.by_id.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get(&self, account_id: i64) -> TxResult<Option<Account>> {
        Ok(self.locked()?.by_id.get(&account_id).cloned())
    }

    async fn get_by_number(&self, account_number: &str) -> TxResult<Option<Account>> {
        let inner = self.locked()?;
        Ok(inner
            .by_number
            .get(account_number)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn compare_and_set_balance(
        &self,
        account_id: i64,
        new_balance: Decimal,
        expected_version: i64,
    ) -> TxResult<bool> {
        let mut inner = self.locked()?;
        match inner.by_id.get_mut(&account_id) {
            Some(account) if account.version == expected_version => {
                account.balance = new_balance;
                account.version += 1;
                account.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
