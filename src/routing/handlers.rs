//! Built-in message handlers.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::router::{MessageHandler, MessageRouter};
use crate::auth::AuthService;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::session::GatewaySession;
use crate::protocols::envelope::Envelope;

pub const TYPE_REFRESH_SESSION: &str = "refresh_session";
pub const TYPE_REFRESH_SESSION_RESPONSE: &str = "refresh_session_response";

/// Extends the client's session through the auth service
pub struct RefreshSessionHandler {
    auth: Arc<dyn AuthService>,
}

impl RefreshSessionHandler {
    pub fn new(auth: Arc<dyn AuthService>) -> Self {
        Self { auth }
    }
}

#[async_trait]
impl MessageHandler for RefreshSessionHandler {
    async fn handle(&self, session: &Arc<GatewaySession>, envelope: &Envelope) -> GatewayResult<()> {
        let session_id = envelope
            .session_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| envelope.body_str("session_id"))
            .ok_or_else(|| GatewayError::validation("session_id", "missing session id"))?;

        let result = self.auth.refresh_session(session_id).await?;
        info!(
            conn_id = %session.id(),
            user_id = session.user_id(),
            success = result.success,
            "Session refresh"
        );

        session.send_json(&json!({
            "type": TYPE_REFRESH_SESSION_RESPONSE,
            "success": result.success,
            "error": result.error,
        }))
    }
}

/// Register the built-in handlers on `router`
pub fn register_default_handlers(router: &MessageRouter, auth: Arc<dyn AuthService>) {
    router.register_handler(TYPE_REFRESH_SESSION, Arc::new(RefreshSessionHandler::new(auth)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthResult, RefreshResult};
    use crate::core::types::ConnectionId;
    use crate::gateway::connections::ConnectionRegistry;
    use parking_lot::Mutex;
    use serde_json::Value;

    #[derive(Default)]
    struct StubAuth {
        refreshed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuthService for StubAuth {
        async fn validate_token_or_session(&self, _: &str, _: &str, _: &str) -> GatewayResult<AuthResult> {
            Ok(AuthResult::rejected("unused"))
        }

        async fn refresh_session(&self, session_id: &str) -> GatewayResult<RefreshResult> {
            self.refreshed.lock().push(session_id.to_string());
            Ok(RefreshResult {
                success: session_id == "s-1",
                error: if session_id == "s-1" { String::new() } else { "expired".into() },
            })
        }
    }

    #[tokio::test]
    async fn test_refresh_session_replies_with_result() {
        let auth = Arc::new(StubAuth::default());
        let router = MessageRouter::new();
        register_default_handlers(&router, auth.clone());

        let registry = Arc::new(ConnectionRegistry::new());
        let (session, mut rx) =
            GatewaySession::new(ConnectionId::generate("gate-1"), 9, "d", 4, Arc::downgrade(&registry));

        let mut envelope = Envelope::new(TYPE_REFRESH_SESSION);
        envelope.session_id = Some("s-1".into());
        router.route(&session, &envelope).await;

        let reply: Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply["type"], "refresh_session_response");
        assert_eq!(reply["success"], true);

        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"refresh_session","body":{"session_id":"s-2"}}"#).unwrap();
        router.route(&session, &envelope).await;
        let reply: Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error"], "expired");

        assert_eq!(*auth.refreshed.lock(), vec!["s-1".to_string(), "s-2".to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_session_without_id_is_error_reply() {
        let auth = Arc::new(StubAuth::default());
        let router = MessageRouter::new();
        register_default_handlers(&router, auth.clone());

        let registry = Arc::new(ConnectionRegistry::new());
        let (session, mut rx) =
            GatewaySession::new(ConnectionId::generate("gate-1"), 9, "d", 4, Arc::downgrade(&registry));

        router.route(&session, &Envelope::new(TYPE_REFRESH_SESSION)).await;
        let reply: Value = serde_json::from_slice(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["request_type"], "refresh_session");
        assert!(auth.refreshed.lock().is_empty());
    }
}
