//! Redis lock store
//!
//! `SET NX PX` for acquisition and a Lua compare-and-delete for release.

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::LockStore;
use crate::error::TxResult;

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

pub struct RedisLockStore {
    conn: ConnectionManager,
    release_script: Script,
}

impl RedisLockStore {
    /// Connect to `redis_url` with an auto-reconnecting connection manager
    pub async fn connect(redis_url: &str) -> TxResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Redis lock store connected");
        Ok(Self::new(conn))
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> TxResult<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        // Replies "OK" when set, nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, token: &str) -> TxResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}
