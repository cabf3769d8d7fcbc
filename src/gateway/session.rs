//! # Gateway Session
//!
//! Per-connection state shared by the inbound pump, the outbound pump and the
//! connection registry. The transport itself is owned by the pumps; the session only
//! holds the producer side of the outbound queue and the close signal.
//!
//! Lifecycle: `Active -> Closing -> Closed`. [`GatewaySession::close`] is the only way
//! out of `Active` and performs its side effects exactly once, whoever calls it.

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::connections::ConnectionRegistry;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{ConnectionId, UserId};
use crate::observability::metrics::FRAMES_DROPPED_TOTAL;

/// Observable lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Close requested, pumps still unwinding
    Closing,
    Closed,
}

/// Handle on one authenticated connection
pub struct GatewaySession {
    id: ConnectionId,
    user_id: UserId,
    device_id: String,
    outbound: mpsc::Sender<Vec<u8>>,
    closed: AtomicBool,
    close_signal: CancellationToken,
    close_reason: Mutex<Option<String>>,
    running_pumps: AtomicUsize,
    registry: Weak<ConnectionRegistry>,
}

impl GatewaySession {
    /// Create a session and the consumer side of its outbound queue
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        device_id: impl Into<String>,
        queue_size: usize,
        registry: Weak<ConnectionRegistry>,
    ) -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (outbound, receiver) = mpsc::channel(queue_size.max(1));
        let session = Arc::new(Self {
            id,
            user_id,
            device_id: device_id.into(),
            outbound,
            closed: AtomicBool::new(false),
            close_signal: CancellationToken::new(),
            close_reason: Mutex::new(None),
            running_pumps: AtomicUsize::new(0),
            registry,
        });
        (session, receiver)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SessionState {
        if !self.is_closed() {
            SessionState::Active
        } else if self.running_pumps.load(Ordering::Acquire) > 0 {
            SessionState::Closing
        } else {
            SessionState::Closed
        }
    }

    /// Reason passed to the first `close` call
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    /// Fires once the session starts closing
    pub fn close_signal(&self) -> CancellationToken {
        self.close_signal.clone()
    }

    /// Enqueue a frame without waiting
    ///
    /// Fails with `ConnectionClosed` when the session is closed or the queue is full;
    /// the frame is dropped in both cases.
    pub fn send(&self, frame: Vec<u8>) -> GatewayResult<()> {
        if self.is_closed() || self.close_signal.is_cancelled() {
            return Err(GatewayError::ConnectionClosed);
        }

        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!(FRAMES_DROPPED_TOTAL).increment(1);
                debug!(conn_id = %self.id, "Outbound queue full, frame dropped");
                Err(GatewayError::ConnectionClosed)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(GatewayError::ConnectionClosed),
        }
    }

    /// Serialize `message` as JSON and [`send`](Self::send) it
    pub fn send_json<T: Serialize + ?Sized>(&self, message: &T) -> GatewayResult<()> {
        self.send(serde_json::to_vec(message)?)
    }

    /// Close the session
    ///
    /// Only the first call has effects: it records `reason`, removes the session from the
    /// registry and fires the close signal (the outbound pump then writes a close frame and
    /// both pumps exit). Later calls return immediately.
    pub fn close(&self, reason: &str) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        *self.close_reason.lock() = Some(reason.to_string());

        if let Some(registry) = self.registry.upgrade() {
            if let Err(e) = registry.unregister(self) {
                debug!(conn_id = %self.id, error = %e, "Session was not registered");
            }
        }
        self.close_signal.cancel();

        info!(conn_id = %self.id, user_id = self.user_id, reason = %reason, "Session closed");
    }

    /// Track a pump for [`state`](Self::state); the guard releases it on drop
    pub(crate) fn enter_pump(self: &Arc<Self>) -> PumpGuard {
        self.running_pumps.fetch_add(1, Ordering::AcqRel);
        PumpGuard {
            session: self.clone(),
        }
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) struct PumpGuard {
    session: Arc<GatewaySession>,
}

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.session.running_pumps.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered_session(queue: usize) -> (Arc<ConnectionRegistry>, Arc<GatewaySession>, mpsc::Receiver<Vec<u8>>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (session, rx) = GatewaySession::new(
            ConnectionId::generate("gate-1"),
            42,
            "phoneA",
            queue,
            Arc::downgrade(&registry),
        );
        registry.register(session.clone());
        (registry, session, rx)
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (registry, session, _rx) = registered_session(4);
        assert_eq!(registry.len(), 1);

        session.close("first");
        session.close("second");

        assert!(registry.is_empty());
        assert_eq!(session.close_reason().as_deref(), Some("first"));
        assert!(session.close_signal().is_cancelled());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_concurrent_close_unregisters_once() {
        let (registry, session, _rx) = registered_session(4);
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let session = session.clone();
                tokio::spawn(async move { session.close(&format!("closer-{}", i)) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert!(registry.is_empty());
        assert!(session.close_reason().unwrap().starts_with("closer-"));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (_registry, session, _rx) = registered_session(4);
        session.close("bye");
        assert!(matches!(session.send(b"x".to_vec()), Err(GatewayError::ConnectionClosed)));
        assert!(matches!(
            session.send_json(&serde_json::json!({"type": "pong"})),
            Err(GatewayError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (_registry, session, mut rx) = registered_session(2);
        session.send(b"1".to_vec()).unwrap();
        session.send(b"2".to_vec()).unwrap();
        assert!(matches!(session.send(b"3".to_vec()), Err(GatewayError::ConnectionClosed)));

        assert_eq!(rx.recv().await.unwrap(), b"1".to_vec());
        session.send(b"4".to_vec()).unwrap();
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_state_tracks_running_pumps() {
        let (_registry, session, _rx) = registered_session(2);
        let guard = session.enter_pump();
        assert_eq!(session.state(), SessionState::Active);

        session.close("done");
        assert_eq!(session.state(), SessionState::Closing);

        drop(guard);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_frames_are_counted() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let (_registry, session, _rx) = registered_session(1);

        metrics::with_local_recorder(&recorder, || {
            session.send(b"1".to_vec()).unwrap();
            assert!(session.send(b"2".to_vec()).is_err());
        });

        assert!(handle.render().contains(&format!("{} 1", FRAMES_DROPPED_TOTAL)));
    }
}
