//! In-process [`KvStore`] with per-key deadlines.
//!
//! Deadlines use `tokio::time::Instant` so tests can drive expiry with paused time.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::KvStore;
use crate::core::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    deadline: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.deadline
    }
}

/// In-process key/value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    fn deadline(now: Instant, ttl: Duration) -> GatewayResult<Instant> {
        now.checked_add(ttl)
            .ok_or_else(|| GatewayError::validation("ttl", "expiry out of range"))
    }

    fn live_value(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<String> {
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> GatewayResult<bool> {
        let now = Instant::now();
        let deadline = Self::deadline(now, ttl)?;
        let mut entries = self.entries.lock();
        if Self::live_value(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline,
            },
        );
        Ok(true)
    }

    async fn set_xx(&self, key: &str, value: &str, ttl: Duration) -> GatewayResult<bool> {
        let now = Instant::now();
        let deadline = Self::deadline(now, ttl)?;
        let mut entries = self.entries.lock();
        if Self::live_value(&mut entries, key, now).is_none() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut entries = self.entries.lock();
        Ok(Self::live_value(&mut entries, key, Instant::now()))
    }

    async fn delete(&self, key: &str) -> GatewayResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(entries.remove(key).map(|e| e.is_live(now)).unwrap_or(false))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> GatewayResult<bool> {
        let mut entries = self.entries.lock();
        match Self::live_value(&mut entries, key, Instant::now()) {
            Some(value) if value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> GatewayResult<bool> {
        let now = Instant::now();
        let deadline = Self::deadline(now, ttl)?;
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == expected => {
                entry.deadline = deadline;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan_prefix(&self, prefix: &str) -> GatewayResult<Vec<(String, String)>> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let mut found: Vec<(String, String)> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}
