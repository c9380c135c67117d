//! In-process lock store
//!
//! Same semantics as the Redis store (NX + expiry, compare-and-delete) for a
//! single process. Used by tests and the `memory` backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::LockStore;
use crate::error::{TxError, TxResult};

struct Entry {
    token: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder token of a live key
    pub fn holder(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.token.clone())
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> TxResult<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TxError::LockStore("lock table poisoned".into()))?;
        let now = Instant::now();

        if let Some(existing) = entries.get(key)
            && existing.expires_at > now
        {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> TxResult<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TxError::LockStore("lock table poisoned".into()))?;

        match entries.get(key) {
            Some(e) if e.token == token && e.expires_at > Instant::now() => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
