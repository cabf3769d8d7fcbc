//! Service record and the liveness predicate shared by both registry backends.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::core::error::{GatewayError, GatewayResult};

/// Longest lease a record may ask for
pub const MAX_TTL_SECONDS: i64 = 86_400;

/// Lifecycle status reported by a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Offline,
    #[default]
    Online,
    Active,
    Inactive,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Offline => "offline",
            ServiceStatus::Online => "online",
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offline" => Ok(ServiceStatus::Offline),
            "online" => Ok(ServiceStatus::Online),
            "active" => Ok(ServiceStatus::Active),
            "inactive" => Ok(ServiceStatus::Inactive),
            other => Err(GatewayError::validation(
                "status",
                format!("unknown service status '{}'", other),
            )),
        }
    }
}

/// Host/port pair of one protocol endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A discoverable service instance
///
/// `last_heartbeat` and `ttl_seconds` are unix seconds; the record is alive while
/// `now <= last_heartbeat + ttl_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(default)]
    pub service_name: String,
    pub service_type: String,
    pub service_id: String,
    #[serde(default)]
    pub protocol: Vec<String>,
    #[serde(default)]
    pub grpc_address: Option<Address>,
    #[serde(default)]
    pub http_address: Option<Address>,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub status: ServiceStatus,
    pub ttl_seconds: i64,
    #[serde(default)]
    pub last_heartbeat: i64,
    #[serde(default)]
    pub idc: String,
}

impl ServiceInfo {
    /// Minimal record, mostly useful for tests and static setups
    pub fn new(service_type: impl Into<String>, service_id: impl Into<String>, ttl_seconds: i64) -> Self {
        let service_type = service_type.into();
        Self {
            service_name: service_type.clone(),
            service_type,
            service_id: service_id.into(),
            protocol: Vec::new(),
            grpc_address: None,
            http_address: None,
            env: String::new(),
            metadata: HashMap::new(),
            weight: 1,
            status: ServiceStatus::Online,
            ttl_seconds,
            last_heartbeat: 0,
            idc: String::new(),
        }
    }

    pub fn with_grpc_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.grpc_address = Some(Address::new(host, port));
        if !self.protocol.iter().any(|p| p == "grpc") {
            self.protocol.push("grpc".to_string());
        }
        self
    }

    pub fn with_http_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.http_address = Some(Address::new(host, port));
        if !self.protocol.iter().any(|p| p == "http") {
            self.protocol.push("http".to_string());
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Composite `(type, id)` key used by the in-memory backend
    pub fn composite_key(&self) -> String {
        composite_key(&self.service_type, &self.service_id)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.last_heartbeat.saturating_add(self.ttl_seconds)
    }

    /// Checks applied by both backends before a record is stored
    ///
    /// Types and ids are key segments, so the type may not contain `:`.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.service_type.is_empty() {
            return Err(GatewayError::validation("service_type", "must not be empty"));
        }
        if self.service_type.contains(':') {
            return Err(GatewayError::validation("service_type", "must not contain ':'"));
        }
        if self.service_id.is_empty() {
            return Err(GatewayError::validation("service_id", "must not be empty"));
        }
        if !(1..=MAX_TTL_SECONDS).contains(&self.ttl_seconds) {
            return Err(GatewayError::validation(
                "ttl",
                format!("must be between 1 and {} seconds", MAX_TTL_SECONDS),
            ));
        }
        Ok(())
    }

    /// Reported load as a fraction of capacity, from `metadata.load` / `metadata.max_load`
    pub fn load_ratio(&self) -> Option<f64> {
        let load: f64 = self.metadata.get("load")?.parse().ok()?;
        let max_load: f64 = self.metadata.get("max_load")?.parse().ok()?;
        if max_load <= 0.0 {
            return None;
        }
        Some(load / max_load)
    }
}

pub fn composite_key(service_type: &str, service_id: &str) -> String {
    format!("{}:{}", service_type, service_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let mut info = ServiceInfo::new("verify", "v1", 60);
        info.last_heartbeat = 0;
        assert!(!info.is_expired(30));
        assert!(!info.is_expired(60));
        assert!(info.is_expired(61));
    }

    #[test]
    fn test_expiry_saturates_on_huge_ttl() {
        let mut info = ServiceInfo::new("verify", "v1", i64::MAX);
        info.last_heartbeat = 1_700_000_000;
        assert!(!info.is_expired(1_700_000_100));
        assert!(!info.is_expired(i64::MAX));
    }

    #[test]
    fn test_validate_rejects_bad_records() {
        assert!(ServiceInfo::new("verify", "v1", 60).validate().is_ok());
        assert!(ServiceInfo::new("verify", "v1", MAX_TTL_SECONDS).validate().is_ok());

        for bad in [
            ServiceInfo::new("verify", "v1", 0),
            ServiceInfo::new("verify", "v1", MAX_TTL_SECONDS + 1),
            ServiceInfo::new("verify", "v1", i64::MAX),
            ServiceInfo::new("verify:eu", "v1", 60),
            ServiceInfo::new("", "v1", 60),
            ServiceInfo::new("verify", "", 60),
        ] {
            assert!(matches!(bad.validate(), Err(GatewayError::Validation { .. })), "{:?}", bad);
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("ACTIVE".parse::<ServiceStatus>().unwrap(), ServiceStatus::Active);
        assert_eq!("offline".parse::<ServiceStatus>().unwrap(), ServiceStatus::Offline);
        assert!("sleeping".parse::<ServiceStatus>().is_err());
    }

    #[test]
    fn test_load_ratio() {
        let info = ServiceInfo::new("gate", "g1", 60)
            .with_metadata("load", "25")
            .with_metadata("max_load", "100");
        assert_eq!(info.load_ratio(), Some(0.25));

        let unbounded = ServiceInfo::new("gate", "g2", 60).with_metadata("load", "25");
        assert_eq!(unbounded.load_ratio(), None);
    }

    #[test]
    fn test_record_serializes_with_lowercase_status() {
        let info = ServiceInfo::new("verify", "v1", 60).with_grpc_address("10.0.0.5", 50051);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "online");
        assert_eq!(json["grpc_address"]["port"], 50051);
        assert_eq!(json["protocol"][0], "grpc");
    }
}
