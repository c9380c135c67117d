//! Distributed Lock
//!
//! Named mutual-exclusion lock backed by a shared key-value store with expiry.
//!
//! # Protocol
//!
//! ```text
//! acquire: SET lock:{key} {token} NX PX {ttl}    (retry with delay)
//! release: if GET lock:{key} == {token} then DEL  (one atomic script)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Token Ownership**: a holder may only delete the key while it still
//!    stores that holder's token. After TTL expiry another holder may own the
//!    key and the original release becomes a no-op.
//! 2. **Bounded Damage**: every key carries a TTL, so a crashed holder blocks
//!    others for at most `ttl`.
//! 3. **Not a Correctness Mechanism**: the account CAS is the backstop. The
//!    lock only cuts wasted CAS retries under contention.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryLockStore;
pub use redis_store::RedisLockStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{TxError, TxResult};

/// Atomic primitives a lock backend must provide.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Get backend name for logging
    fn name(&self) -> &'static str;

    /// Create `key = token` with expiry only if `key` does not exist.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> TxResult<bool>;

    /// Delete `key` only if it still holds `token`, in one indivisible step.
    async fn release(&self, key: &str, token: &str) -> TxResult<bool>;
}

/// Lock timing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Key expiry
    pub ttl: Duration,
    /// Acquisition attempts before giving up
    pub max_retries: u32,
    /// Sleep between attempts
    pub retry_delay: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            max_retries: 5,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Serializable form of [`LockConfig`] used in `config/*.yaml`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LockSettings {
    pub ttl_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 10_000,
            max_retries: 5,
            retry_delay_ms: 200,
        }
    }
}

impl From<&LockSettings> for LockConfig {
    fn from(s: &LockSettings) -> Self {
        Self {
            ttl: Duration::from_millis(s.ttl_ms),
            max_retries: s.max_retries,
            retry_delay: Duration::from_millis(s.retry_delay_ms),
        }
    }
}

/// Lock key for an account
pub fn account_resource(account_number: &str) -> String {
    format!("account:{}", account_number)
}

/// A single named lock and its holder token.
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    key: String,
    token: String,
    config: LockConfig,
    locked: bool,
}

impl DistributedLock {
    /// Create a lock for `resource` (stored under `lock:{resource}`)
    pub fn new(store: Arc<dyn LockStore>, resource: &str, config: LockConfig) -> Self {
        Self {
            store,
            key: format!("lock:{}", resource),
            token: uuid::Uuid::new_v4().to_string(),
            config,
            locked: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Try to acquire, retrying up to `max_retries` times.
    ///
    /// Returns `Ok(false)` when the key stayed held for the whole budget.
    pub async fn acquire(&mut self) -> TxResult<bool> {
        for attempt in 1..=self.config.max_retries {
            // Fresh token per attempt; only the winning one is kept.
            self.token = uuid::Uuid::new_v4().to_string();
            if self
                .store
                .try_acquire(&self.key, &self.token, self.config.ttl)
                .await?
            {
                self.locked = true;
                debug!(key = %self.key, store = self.store.name(), "Lock acquired");
                return Ok(true);
            }

            debug!(
                key = %self.key,
                attempt,
                max_retries = self.config.max_retries,
                "Lock busy, retrying"
            );
            if attempt < self.config.max_retries {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        warn!(
            key = %self.key,
            attempts = self.config.max_retries,
            "Failed to acquire lock"
        );
        Ok(false)
    }

    /// Compare-and-delete release.
    ///
    /// Returns `Ok(false)` if the key expired or now belongs to another holder.
    pub async fn release(&mut self) -> TxResult<bool> {
        if !self.locked {
            return Ok(true);
        }

        let released = self.store.release(&self.key, &self.token).await?;
        self.locked = false;
        if released {
            debug!(key = %self.key, "Lock released");
        } else {
            warn!(key = %self.key, "Lock already expired or taken over at release");
        }
        Ok(released)
    }

    /// Acquire as a scoped guard.
    ///
    /// Fails with [`TxError::LockAcquisition`] once retries are exhausted.
    pub async fn lock(mut self) -> TxResult<LockGuard> {
        if !self.acquire().await? {
            return Err(TxError::LockAcquisition(self.key.clone()));
        }
        Ok(LockGuard { lock: Some(self) })
    }
}

/// Held lock. Release with [`LockGuard::release`]; dropping it unreleased
/// (early return, panic, cancelled future) schedules the release on the
/// current tokio runtime.
pub struct LockGuard {
    lock: Option<DistributedLock>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        self.lock.as_ref().map(|l| l.key()).unwrap_or_default()
    }

    pub async fn release(mut self) -> TxResult<bool> {
        match self.lock.take() {
            Some(mut lock) => lock.release().await,
            None => Ok(true),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(mut lock) = self.lock.take() else {
            return;
        };
        if !lock.locked {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release().await {
                        warn!(key = %lock.key, error = %e, "Deferred lock release failed");
                    }
                });
            }
            Err(_) => {
                warn!(key = %lock.key, "Lock guard dropped outside runtime; relying on TTL");
            }
        }
    }
}

/// Acquire several locks in sorted order (deadlock freedom), returning guards
/// in acquisition order. Duplicates are collapsed.
pub async fn lock_all(
    store: &Arc<dyn LockStore>,
    resources: &[String],
    config: LockConfig,
) -> TxResult<Vec<LockGuard>> {
    let mut sorted: Vec<&String> = resources.iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut guards = Vec::with_capacity(sorted.len());
    for resource in sorted {
        match DistributedLock::new(store.clone(), resource, config).lock().await {
            Ok(guard) => guards.push(guard),
            Err(e) => {
                release_all(guards).await;
                return Err(e);
            }
        }
    }
    Ok(guards)
}

/// Release guards in reverse acquisition order. Errors are logged only.
pub async fn release_all(mut guards: Vec<LockGuard>) {
    while let Some(guard) = guards.pop() {
        let key = guard.key().to_string();
        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "Lock release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> LockConfig {
        LockConfig {
            ttl: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(5),
        }
    }

    fn store() -> Arc<dyn LockStore> {
        Arc::new(MemoryLockStore::new())
    }

    #[test]
    fn test_lock_config_default() {
        let config = LockConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(10));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(200));
    }

    #[test]
    fn test_lock_settings_conversion() {
        let settings = LockSettings {
            ttl_ms: 1500,
            max_retries: 7,
            retry_delay_ms: 20,
        };
        let config = LockConfig::from(&settings);
        assert_eq!(config.ttl, Duration::from_millis(1500));
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.retry_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_key_is_namespaced() {
        let lock = DistributedLock::new(store(), &account_resource("ACC-1"), fast_config());
        assert_eq!(lock.key(), "lock:account:ACC-1");
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = store();
        let mut lock = DistributedLock::new(store.clone(), "r1", fast_config());
        assert!(lock.acquire().await.unwrap());
        assert!(lock.is_locked());

        let mut other = DistributedLock::new(store.clone(), "r1", fast_config());
        assert!(!other.acquire().await.unwrap());

        assert!(lock.release().await.unwrap());
        assert!(other.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_release_unacquired_is_noop() {
        let mut lock = DistributedLock::new(store(), "r1", fast_config());
        assert!(lock.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_guard_exhausts_retries() {
        let store = store();
        let _held = DistributedLock::new(store.clone(), "r1", fast_config())
            .lock()
            .await
            .unwrap();

        let result = DistributedLock::new(store.clone(), "r1", fast_config())
            .lock()
            .await;
        assert!(matches!(result, Err(TxError::LockAcquisition(k)) if k == "lock:r1"));
    }

    #[tokio::test]
    async fn test_dropped_guard_releases() {
        let store = store();
        {
            let _guard = DistributedLock::new(store.clone(), "r1", fast_config())
                .lock()
                .await
                .unwrap();
        }
        // Deferred release runs on the runtime; the retry budget covers it.
        let guard = DistributedLock::new(store.clone(), "r1", fast_config())
            .lock()
            .await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn test_expired_lock_taken_over() {
        let store = store();
        let config = LockConfig {
            ttl: Duration::from_millis(30),
            ..fast_config()
        };
        let mut first = DistributedLock::new(store.clone(), "r1", config);
        assert!(first.acquire().await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;

        let mut second = DistributedLock::new(store.clone(), "r1", fast_config());
        assert!(second.acquire().await.unwrap());

        // Token mismatch: first holder cannot delete the new owner's key.
        assert!(!first.release().await.unwrap());
        assert!(!store.try_acquire("lock:r1", "x", config.ttl).await.unwrap());
        assert!(second.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_all_sorted_and_deduped() {
        let store = store();
        let resources = vec![
            account_resource("B"),
            account_resource("A"),
            account_resource("B"),
        ];
        let guards = lock_all(&store, &resources, fast_config()).await.unwrap();
        let keys: Vec<&str> = guards.iter().map(|g| g.key()).collect();
        assert_eq!(keys, vec!["lock:account:A", "lock:account:B"]);

        release_all(guards).await;
        assert!(
            store
                .try_acquire("lock:account:A", "t", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_lock_all_rolls_back_partial_acquisition() {
        let store = store();
        let _held = DistributedLock::new(store.clone(), &account_resource("B"), fast_config())
            .lock()
            .await
            .unwrap();

        let resources = vec![account_resource("A"), account_resource("B")];
        let result = lock_all(&store, &resources, fast_config()).await;
        assert!(matches!(result, Err(TxError::LockAcquisition(_))));

        // "A" was released when "B" could not be taken.
        assert!(
            store
                .try_acquire("lock:account:A", "t", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }
}
