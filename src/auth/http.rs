//! HTTP+JSON binding of the auth collaborator.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::providers::{AuthTransport, JwtVerdict, RefreshResult, SessionVerdict};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::UserId;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyJwtBody<'a> {
    jwt_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody<'a> {
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyJwtReply {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    user_id: UserId,
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifySessionReply {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    user_id: UserId,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct RefreshSessionReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: String,
}

/// Talks to `{base}/gate/user-auth/*`
#[derive(Debug, Clone)]
pub struct HttpAuthTransport {
    base_url: String,
    client: Client,
}

impl HttpAuthTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn call<B, R>(&self, endpoint: &str, body: &B) -> GatewayResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/gate/user-auth/{}", self.base_url, endpoint);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::upstream(
                "auth-http",
                format!("{} answered HTTP {}", endpoint, status),
            ));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GatewayError::upstream("auth-http", format!("unreadable {} reply: {}", endpoint, e)))
    }
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    async fn verify_jwt(&self, token: &str) -> GatewayResult<JwtVerdict> {
        let reply: VerifyJwtReply = self.call("verify-jwt", &VerifyJwtBody { jwt_token: token }).await?;
        Ok(JwtVerdict {
            valid: reply.valid,
            user_id: reply.user_id,
            device_id: reply.device_id,
            error: reply.error,
        })
    }

    async fn verify_session(&self, session_id: &str) -> GatewayResult<SessionVerdict> {
        let reply: VerifySessionReply = self.call("verify-session", &SessionBody { session_id }).await?;
        Ok(SessionVerdict {
            valid: reply.valid,
            user_id: reply.user_id,
            error: reply.error,
        })
    }

    async fn refresh_session(&self, session_id: &str) -> GatewayResult<RefreshResult> {
        let reply: RefreshSessionReply = self.call("refresh-session", &SessionBody { session_id }).await?;
        Ok(RefreshResult {
            success: reply.success,
            error: reply.error,
        })
    }

    fn transport_name(&self) -> &'static str {
        "http"
    }
}
