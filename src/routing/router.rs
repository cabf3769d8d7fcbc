//! # Message Router
//!
//! Dispatches inbound envelopes to handlers by exact `type` match. Handlers run inline
//! on the connection's inbound pump, so frames of one connection are handled strictly
//! in arrival order.

use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::error::GatewayResult;
use crate::gateway::session::GatewaySession;
use crate::observability::metrics::{HANDLER_ERRORS_TOTAL, UNKNOWN_MESSAGES_TOTAL};
use crate::protocols::envelope::{reply, Envelope};

/// Handler for one message type
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process `envelope`; replies go through `session.send_json`
    async fn handle(&self, session: &Arc<GatewaySession>, envelope: &Envelope) -> GatewayResult<()>;
}

#[derive(Default)]
pub struct MessageRouter {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `msg_type` with `handler`, replacing any previous registration
    pub fn register_handler(&self, msg_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let msg_type = msg_type.into();
        debug!(msg_type = %msg_type, "Registering message handler");
        self.handlers.write().insert(msg_type, handler);
    }

    pub fn has_handler(&self, msg_type: &str) -> bool {
        self.handlers.read().contains_key(msg_type)
    }

    /// Dispatch one envelope
    ///
    /// Unknown types get an `unknown_message_type` reply and handler failures an `error`
    /// reply; neither closes the connection.
    pub async fn route(&self, session: &Arc<GatewaySession>, envelope: &Envelope) {
        let handler = self.handlers.read().get(&envelope.msg_type).cloned();

        let Some(handler) = handler else {
            debug!(conn_id = %session.id(), msg_type = %envelope.msg_type, "No handler for message type");
            counter!(UNKNOWN_MESSAGES_TOTAL).increment(1);
            let _ = session.send_json(&reply::unknown_type(&envelope.msg_type));
            return;
        };

        if let Err(e) = handler.handle(session, envelope).await {
            warn!(
                conn_id = %session.id(),
                user_id = session.user_id(),
                msg_type = %envelope.msg_type,
                error = %e,
                "Message handler failed"
            );
            counter!(HANDLER_ERRORS_TOTAL, "type" => envelope.msg_type.clone()).increment(1);
            let _ = session.send_json(&reply::error(&envelope.msg_type, &e.to_string()));
        }
    }
}
