//! # Coordination Store Module
//!
//! Key/value store abstraction used by the lease-backed service registry and the
//! distributed lock. Every key carries an expiry; a key whose expiry passes disappears
//! without any action from its writer, which is what turns a plain key into a lease.
//!
//! Two implementations are provided:
//! - [`RedisStore`]: the production store, one Redis deployment shared by every instance
//! - [`MemoryStore`]: an in-process store with per-key deadlines for single-node
//!   deployments and tests

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::core::error::GatewayResult;

/// Atomic key/value operations with per-key expiry
///
/// All conditional operations must be atomic on the store side; callers never emulate
/// them with separate read and write calls.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` only if it does not exist. Returns `true` when the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> GatewayResult<bool>;

    /// Overwrite `key` only if it still exists, resetting its expiry to `ttl`.
    /// Returns `false` when the key is gone.
    async fn set_xx(&self, key: &str, value: &str, ttl: Duration) -> GatewayResult<bool>;

    async fn get(&self, key: &str) -> GatewayResult<Option<String>>;

    /// Delete `key`. Returns `true` when a key was removed.
    async fn delete(&self, key: &str) -> GatewayResult<bool>;

    /// Delete `key` only if its value equals `expected`
    async fn compare_and_delete(&self, key: &str, expected: &str) -> GatewayResult<bool>;

    /// Reset the expiry of `key` only if its value equals `expected`
    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> GatewayResult<bool>;

    /// Every live key starting with `prefix`, with its value
    async fn scan_prefix(&self, prefix: &str) -> GatewayResult<Vec<(String, String)>>;
}
