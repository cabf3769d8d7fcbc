//! # Auth Collaborator Contract
//!
//! The gateway never verifies credentials itself. It asks the auth service, which is
//! reachable over gRPC or HTTP+JSON. Both bindings implement [`AuthTransport`] (the three
//! raw upstream calls) and share the decision logic in [`AuthClient`], so the gateway sees
//! the same [`AuthService`] behavior whichever transport is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::GatewayResult;
use crate::core::types::UserId;

/// Answer for a handshake credential
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub valid: bool,
    pub user_id: UserId,
    pub device_id: String,
    pub error: String,
}

impl AuthResult {
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: error.into(),
            ..Default::default()
        }
    }
}

/// Answer for a session refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResult {
    pub success: bool,
    pub error: String,
}

/// Verdict of the upstream JWT check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JwtVerdict {
    pub valid: bool,
    pub user_id: UserId,
    pub device_id: String,
    pub error: String,
}

/// Verdict of the upstream session check; sessions carry no device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionVerdict {
    pub valid: bool,
    pub user_id: UserId,
    pub error: String,
}

/// What the gateway and its handlers consume
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Validate a handshake: a token wins over a session id
    async fn validate_token_or_session(
        &self,
        token: &str,
        session_id: &str,
        device_id: &str,
    ) -> GatewayResult<AuthResult>;

    async fn refresh_session(&self, session_id: &str) -> GatewayResult<RefreshResult>;
}

/// Raw upstream calls of one transport binding
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn verify_jwt(&self, token: &str) -> GatewayResult<JwtVerdict>;

    async fn verify_session(&self, session_id: &str) -> GatewayResult<SessionVerdict>;

    async fn refresh_session(&self, session_id: &str) -> GatewayResult<RefreshResult>;

    fn transport_name(&self) -> &'static str;
}

/// Error reported when a handshake carries no credential at all
pub const NO_CREDENTIALS: &str = "no token and session id provided";

/// [`AuthService`] over any [`AuthTransport`]
pub struct AuthClient<T> {
    transport: T,
}

impl<T: AuthTransport> AuthClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: AuthTransport> AuthService for AuthClient<T> {
    async fn validate_token_or_session(
        &self,
        token: &str,
        session_id: &str,
        device_id: &str,
    ) -> GatewayResult<AuthResult> {
        if !token.is_empty() {
            let verdict = self.transport.verify_jwt(token).await?;
            debug!(transport = self.transport.transport_name(), valid = verdict.valid, "JWT verified");
            return Ok(AuthResult {
                valid: verdict.valid,
                user_id: verdict.user_id,
                device_id: verdict.device_id,
                error: verdict.error,
            });
        }

        if !session_id.is_empty() {
            let verdict = self.transport.verify_session(session_id).await?;
            debug!(transport = self.transport.transport_name(), valid = verdict.valid, "Session verified");
            return Ok(AuthResult {
                valid: verdict.valid,
                user_id: verdict.user_id,
                device_id: device_id.to_string(),
                error: verdict.error,
            });
        }

        Ok(AuthResult::rejected(NO_CREDENTIALS))
    }

    async fn refresh_session(&self, session_id: &str) -> GatewayResult<RefreshResult> {
        self.transport.refresh_session(session_id).await
    }
}
