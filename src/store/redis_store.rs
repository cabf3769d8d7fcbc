//! # Redis Store
//!
//! [`KvStore`] over Redis. Conditional writes map onto `SET NX PX` / `SET XX PX`; value
//! checked deletes and expiry refreshes run as Lua scripts so the check and the write are
//! one atomic step on the server.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tracing::{debug, info};

use super::KvStore;
use crate::core::error::{GatewayError, GatewayResult};

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_PEXPIRE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

const SCAN_BATCH: usize = 100;

/// Redis-backed coordination store
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis at `url`
    pub async fn connect(url: &str) -> GatewayResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected to Redis coordination store");
        Ok(Self { conn })
    }

    fn ttl_millis(ttl: Duration) -> GatewayResult<u64> {
        let millis = u64::try_from(ttl.as_millis())
            .map_err(|_| GatewayError::validation("ttl", "expiry out of range"))?;
        if millis == 0 {
            return Err(GatewayError::validation("ttl", "must be at least 1ms"));
        }
        Ok(millis)
    }

    async fn conditional_set(&self, key: &str, value: &str, ttl: Duration, mode: &str) -> GatewayResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg(mode)
            .arg("PX")
            .arg(Self::ttl_millis(ttl)?)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> GatewayResult<bool> {
        self.conditional_set(key, value, ttl, "NX").await
    }

    async fn set_xx(&self, key: &str, value: &str, ttl: Duration) -> GatewayResult<bool> {
        self.conditional_set(key, value, ttl, "XX").await
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> GatewayResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> GatewayResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = Script::new(COMPARE_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> GatewayResult<bool> {
        let mut conn = self.conn.clone();
        let updated: i64 = Script::new(COMPARE_AND_PEXPIRE)
            .key(key)
            .arg(expected)
            .arg(Self::ttl_millis(ttl)?)
            .invoke_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn scan_prefix(&self, prefix: &str) -> GatewayResult<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            // a key may expire between SCAN and GET
            let value: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
            if let Some(value) = value {
                found.push((key, value));
            }
        }
        debug!(prefix = %prefix, count = found.len(), "Scanned coordination store");
        Ok(found)
    }
}
