//! Wire types of the registry HTTP surface, shared by the server and [`StatusClient`].
//!
//! [`StatusClient`]: super::client::StatusClient

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::service_info::{Address, ServiceInfo, ServiceStatus};

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub service_name: String,
    pub service_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default)]
    pub protocol: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_address: Option<Address>,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub idc: String,
}

impl RegisterRequest {
    /// Build the record to store; `service_id` must already be resolved
    pub fn into_service_info(self, service_id: String, default_ttl_secs: i64) -> ServiceInfo {
        let status = if self.enable {
            ServiceStatus::Active
        } else {
            ServiceStatus::Online
        };
        let service_name = if self.service_name.is_empty() {
            self.service_type.clone()
        } else {
            self.service_name
        };

        ServiceInfo {
            service_name,
            service_type: self.service_type,
            service_id,
            protocol: self.protocol,
            grpc_address: self.grpc_address,
            http_address: self.http_address,
            env: self.env,
            metadata: self.metadata,
            weight: self.weight,
            status,
            ttl_seconds: self.ttl.filter(|ttl| *ttl > 0).unwrap_or(default_ttl_secs),
            last_heartbeat: 0,
            idc: self.idc,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeregisterRequest {
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Service type to look up
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub strategy: String,
    /// Only instances carrying every listed metadata pair qualify
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Envelope of every registry HTTP response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceInfo>,
}

impl ApiResponse {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            service_id: None,
            service: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(200, message)
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_service(mut self, service: ServiceInfo) -> Self {
        self.service = Some(service);
        self
    }
}
