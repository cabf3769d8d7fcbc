//! # Connection Registry
//!
//! Process-wide index of live sessions, keyed both by connection id and by user id.
//! Both indices sit behind one `RwLock` so they are always mutated together.

use metrics::gauge;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use super::session::GatewaySession;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{ConnectionId, UserId};
use crate::observability::metrics::ACTIVE_CONNECTIONS;

#[derive(Default)]
struct Indices {
    conns: HashMap<ConnectionId, Arc<GatewaySession>>,
    user_conns: HashMap<UserId, HashSet<ConnectionId>>,
}

impl Indices {
    fn detach_from_user(&mut self, user_id: UserId, id: &ConnectionId) {
        if let Some(ids) = self.user_conns.get_mut(&user_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.user_conns.remove(&user_id);
            }
        }
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Indices>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session into both indices
    ///
    /// An existing entry with the same id is replaced and detached from its previous user.
    pub fn register(&self, session: Arc<GatewaySession>) {
        let id = session.id().clone();
        let user_id = session.user_id();

        let active = {
            let mut inner = self.inner.write();
            if let Some(previous) = inner.conns.insert(id.clone(), session) {
                debug!(conn_id = %id, "Replacing registered session with the same id");
                let previous_user = previous.user_id();
                inner.detach_from_user(previous_user, &id);
            }
            inner.user_conns.entry(user_id).or_default().insert(id.clone());
            inner.conns.len()
        };

        gauge!(ACTIVE_CONNECTIONS).set(active as f64);
        debug!(conn_id = %id, user_id = user_id, "Connection registered");
    }

    /// Remove a session from both indices
    ///
    /// Fails with `ConnectionNotFound` when the id is absent or now belongs to a
    /// different session.
    pub fn unregister(&self, session: &GatewaySession) -> GatewayResult<()> {
        let id = session.id();

        let active = {
            let mut inner = self.inner.write();
            let owned = inner
                .conns
                .get(id)
                .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), session));
            if !owned {
                return Err(GatewayError::ConnectionNotFound {
                    conn_id: id.to_string(),
                });
            }
            inner.conns.remove(id);
            inner.detach_from_user(session.user_id(), id);
            inner.conns.len()
        };

        gauge!(ACTIVE_CONNECTIONS).set(active as f64);
        debug!(conn_id = %id, user_id = session.user_id(), "Connection unregistered");
        Ok(())
    }

    pub fn get_by_id(&self, id: &ConnectionId) -> GatewayResult<Arc<GatewaySession>> {
        self.inner
            .read()
            .conns
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::ConnectionNotFound {
                conn_id: id.to_string(),
            })
    }

    /// Every live session of a user, in no particular order
    pub fn get_by_user_id(&self, user_id: UserId) -> Vec<Arc<GatewaySession>> {
        let inner = self.inner.read();
        inner
            .user_conns
            .get(&user_id)
            .map(|ids| ids.iter().filter_map(|id| inner.conns.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().conns.is_empty()
    }

    /// Number of distinct users with at least one live session
    pub fn user_count(&self) -> usize {
        self.inner.read().user_conns.len()
    }

    pub fn all(&self) -> Vec<Arc<GatewaySession>> {
        self.inner.read().conns.values().cloned().collect()
    }

    /// Close every registered session with `reason`
    pub fn close_all(&self, reason: &str) {
        let sessions = self.all();
        info!(count = sessions.len(), reason = %reason, "Closing all sessions");
        for session in sessions {
            session.close(reason);
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConnectionRegistry")
            .field("connections", &inner.conns.len())
            .field("users", &inner.user_conns.len())
            .finish()
    }
}
