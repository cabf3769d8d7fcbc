//! # Status Server Client
//!
//! HTTP client for a remote registry. The gateway uses it at startup to locate an auth
//! instance; backend services use it to register and heartbeat. Calls are never retried
//! here: callers inspect [`GatewayError::is_retryable`] and decide.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use super::api::{ApiResponse, DeregisterRequest, DiscoveryRequest, HeartbeatRequest, RegisterRequest};
use super::service_info::{ServiceInfo, ServiceStatus};
use crate::core::error::{GatewayError, GatewayResult};

const UPSTREAM_NAME: &str = "status-server";

#[derive(Debug, Clone)]
pub struct StatusClient {
    base_url: String,
    client: Client,
}

impl StatusClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> GatewayResult<ApiResponse> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();

        let reply: ApiResponse = response.json().await.map_err(|e| {
            GatewayError::upstream(
                UPSTREAM_NAME,
                format!("unreadable response from {} (HTTP {}): {}", url, status, e),
            )
        })?;
        debug!(url = %url, code = reply.code, "Status server replied");
        Ok(reply)
    }

    /// Register an instance, returning the id the server stored it under
    pub async fn register(&self, request: &RegisterRequest) -> GatewayResult<String> {
        let reply = self.post("/api/service/register", request).await?;
        match reply.code {
            200 => {
                let service_id = reply.service_id.ok_or_else(|| {
                    GatewayError::upstream(UPSTREAM_NAME, "registration reply carries no service_id")
                })?;
                info!(service_type = %request.service_type, service_id = %service_id, "Registered with status server");
                Ok(service_id)
            }
            409 => Err(GatewayError::service_exists(
                &request.service_type,
                reply.service_id.unwrap_or_default(),
            )),
            _ => Err(Self::failure(reply)),
        }
    }

    pub async fn deregister(&self, service_id: &str, service_type: Option<&str>) -> GatewayResult<()> {
        let request = DeregisterRequest {
            service_id: service_id.to_string(),
            service_type: service_type.map(str::to_string),
        };
        let reply = self.post("/api/service/deregister", &request).await?;
        match reply.code {
            200 => Ok(()),
            404 => Err(GatewayError::service_not_found(service_type.unwrap_or("*"), service_id)),
            _ => Err(Self::failure(reply)),
        }
    }

    pub async fn heartbeat(
        &self,
        service_id: &str,
        service_type: Option<&str>,
        status: Option<ServiceStatus>,
    ) -> GatewayResult<()> {
        let request = HeartbeatRequest {
            service_id: service_id.to_string(),
            service_type: service_type.map(str::to_string),
            status: status.map(|s| s.to_string()),
            timestamp: Some(chrono::Utc::now().timestamp()),
        };
        let reply = self.post("/api/service/heartbeat", &request).await?;
        match reply.code {
            200 => Ok(()),
            404 => Err(GatewayError::service_not_found(service_type.unwrap_or("*"), service_id)),
            _ => Err(Self::failure(reply)),
        }
    }

    /// Ask for one live instance of `service_type` chosen by `strategy`
    pub async fn discover(&self, service_type: &str, strategy: &str) -> GatewayResult<ServiceInfo> {
        let request = DiscoveryRequest {
            service_name: service_type.to_string(),
            strategy: strategy.to_string(),
            ..Default::default()
        };
        let reply = self.post("/api/discovery/by-tags", &request).await?;
        match (reply.code, reply.service) {
            (200, Some(service)) => Ok(service),
            (200, None) => Err(GatewayError::upstream(UPSTREAM_NAME, "discovery reply carries no service")),
            (404, _) => Err(GatewayError::service_not_found(service_type, "*")),
            (code, _) => Err(Self::failure(ApiResponse::new(code, reply.message))),
        }
    }

    fn failure(reply: ApiResponse) -> GatewayError {
        match reply.code {
            400 => GatewayError::validation("request", reply.message),
            code => GatewayError::upstream(UPSTREAM_NAME, format!("code {}: {}", code, reply.message)),
        }
    }
}
