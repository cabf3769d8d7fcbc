//! # Core Types
//!
//! Identifiers shared by the gateway and the registry, and the clock the liveness
//! predicate is evaluated against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// User identifier issued by the auth collaborator
pub type UserId = u64;

/// Separator between the gateway-instance prefix and the random suffix
const CONN_ID_SEPARATOR: char = '#';

/// Globally unique connection identifier
///
/// Formatted as `<gate_id>#<32 hex chars>`. The prefix names the gateway instance that
/// terminates the connection, so ids never collide across instances and any holder of an
/// id can tell which gateway owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Mint a fresh id for the given gateway instance
    pub fn generate(gate_id: &str) -> Self {
        Self(format!("{}{}{}", gate_id, CONN_ID_SEPARATOR, Uuid::new_v4().simple()))
    }

    /// Wrap an existing id (e.g. one received from a peer)
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gateway instance that minted this id, if the id carries one
    pub fn gateway_id(&self) -> Option<&str> {
        self.0
            .rsplit_once(CONN_ID_SEPARATOR)
            .map(|(gate, _)| gate)
            .filter(|gate| !gate.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Source of the current unix time in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_carries_gateway_prefix() {
        let id = ConnectionId::generate("gate-1");
        assert_eq!(id.gateway_id(), Some("gate-1"));

        let (_, suffix) = id.as_str().split_once('#').unwrap();
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::generate("gate-1");
        let b = ConnectionId::generate("gate-1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_foreign_id_without_prefix() {
        assert_eq!(ConnectionId::from("plain").gateway_id(), None);
        assert_eq!(ConnectionId::from("#abc").gateway_id(), None);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        clock.advance(5);
        assert_eq!(clock.now(), 105);
        clock.set(1);
        assert_eq!(clock.now(), 1);
    }
}
