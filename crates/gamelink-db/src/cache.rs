//! Redis-backed single-flight lock for settlement runs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use deadpool_redis::Pool as RedisPool;
use tracing::{debug, warn};

use gamelink_commission::SettlementLock;
use gamelink_types::{Result, SettlementMonth};

use crate::{DbError, DbResult};

/// Cache key prefixes
pub mod keys {
    pub const LOCK: &str = "lock:";
    pub const SETTLEMENT: &str = "settlement:";
}

/// Default TTLs
pub mod ttl {
    use std::time::Duration;

    /// Long enough for a month's run; the key expires if the holder dies
    pub const SETTLEMENT_LOCK: Duration = Duration::from_secs(30 * 60); // 30 minutes
}

/// Deletes the key only while it still holds the caller's token
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// `SET NX EX` lock keyed by month, shared by every settlement process
///
/// Each acquire stores a fresh token; release only deletes the key while
/// it still carries that token, so a run whose lock expired cannot free a
/// lock another process has since taken.
#[derive(Clone)]
pub struct RedisSettlementLock {
    pool: RedisPool,
    ttl: Duration,
    tokens: Arc<Mutex<HashMap<SettlementMonth, String>>>,
}

impl RedisSettlementLock {
    pub fn new(pool: RedisPool, ttl: Duration) -> Self {
        Self {
            pool,
            ttl,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn lock_key(month: SettlementMonth) -> String {
        format!("{}{}{}", keys::LOCK, keys::SETTLEMENT, month)
    }

    fn new_token() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    async fn acquire(&self, month: SettlementMonth) -> DbResult<bool> {
        let mut conn = self.pool.get().await?;
        let key = Self::lock_key(month);
        let token = Self::new_token();

        let result: Option<String> = deadpool_redis::redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| DbError::Redis(e.to_string()))?;

        let acquired = result.is_some();
        if acquired {
            self.tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(month, token);
        }
        debug!(key = %key, acquired, "Settlement lock attempt");
        Ok(acquired)
    }

    async fn remove(&self, month: SettlementMonth) -> DbResult<()> {
        let token = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&month);
        let Some(token) = token else {
            debug!(month = %month, "Release without a held settlement lock");
            return Ok(());
        };

        let mut conn = self.pool.get().await?;
        let deleted: i64 = deadpool_redis::redis::cmd("EVAL")
            .arg(RELEASE_SCRIPT)
            .arg(1)
            .arg(Self::lock_key(month))
            .arg(&token)
            .query_async(&mut conn)
            .await
            .map_err(|e| DbError::Redis(e.to_string()))?;

        if deleted == 0 {
            warn!(month = %month, "Settlement lock expired before release; left the current holder's key");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SettlementLock for RedisSettlementLock {
    async fn try_acquire(&self, month: SettlementMonth) -> Result<bool> {
        Ok(self.acquire(month).await?)
    }

    async fn release(&self, month: SettlementMonth) -> Result<()> {
        Ok(self.remove(month).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_per_month() {
        let month: SettlementMonth = "2024-11".parse().unwrap();
        assert_eq!(RedisSettlementLock::lock_key(month), "lock:settlement:2024-11");
        assert_ne!(
            RedisSettlementLock::lock_key(month),
            RedisSettlementLock::lock_key(month.next())
        );
    }

    #[test]
    fn test_tokens_are_unique_per_acquire() {
        assert_ne!(RedisSettlementLock::new_token(), RedisSettlementLock::new_token());
    }
}
