//! # Configuration Module
//!
//! Configuration for the gateway process and the registry service.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Human readable durations (`"5s"`, `"1m 30s"`) through `humantime-serde`
//! - Environment variable overrides following `GATEWAY_<SECTION>_<FIELD>`
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};
use crate::discovery::MAX_TTL_SECONDS;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and identity of this gateway instance
    pub server: ServerConfig,

    /// Connection lifecycle timing and limits
    pub websocket: WebSocketConfig,

    /// Auth collaborator binding
    pub auth: AuthConfig,

    /// Service registry backend and HTTP surface
    pub registry: RegistryConfig,

    /// Redis connection used by the lease-backed registry and the lock
    pub redis: RedisConfig,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_json::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>
    /// For example: GATEWAY_SERVER_PORT=9000
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(gate_id) = env::var("GATEWAY_SERVER_GATE_ID") {
            self.server.gate_id = gate_id;
        }

        if let Ok(addr) = env::var("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(port) = env::var("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {}", e)))?;
        }

        if let Ok(timeout) = env::var("GATEWAY_WEBSOCKET_AUTH_TIMEOUT") {
            self.websocket.auth_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_WEBSOCKET_AUTH_TIMEOUT: {}", e))
            })?;
        }

        if let Ok(transport) = env::var("GATEWAY_AUTH_TRANSPORT") {
            self.auth.transport = match transport.to_ascii_lowercase().as_str() {
                "grpc" => AuthTransportKind::Grpc,
                "http" => AuthTransportKind::Http,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_AUTH_TRANSPORT: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(endpoint) = env::var("GATEWAY_AUTH_GRPC_ENDPOINT") {
            self.auth.grpc_endpoint = endpoint;
        }

        if let Ok(base_url) = env::var("GATEWAY_AUTH_HTTP_BASE_URL") {
            self.auth.http_base_url = base_url;
        }

        if let Ok(backend) = env::var("GATEWAY_REGISTRY_BACKEND") {
            self.registry.backend = match backend.to_ascii_lowercase().as_str() {
                "memory" => RegistryBackend::Memory,
                "lease" => RegistryBackend::Lease,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_REGISTRY_BACKEND: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(url) = env::var("GATEWAY_REGISTRY_STATUS_URL") {
            self.registry.status_url = Some(url);
        }

        if let Ok(url) = env::var("GATEWAY_REDIS_URL") {
            self.redis.url = url;
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.observability.log_format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(GatewayError::config(format!("Invalid GATEWAY_LOG_FORMAT: {}", other)))
                }
            };
        }

        if let Ok(enabled) = env::var("GATEWAY_METRICS_ENABLED") {
            self.observability.metrics_enabled = enabled
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_METRICS_ENABLED: {}", e)))?;
        }

        Ok(())
    }

    /// Validate the configuration, collecting every problem into one error
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.gate_id.is_empty() {
            errors.push("server.gate_id cannot be empty".to_string());
        }
        if self.server.gate_id.contains('#') {
            errors.push("server.gate_id cannot contain '#'".to_string());
        }
        if self.server.bind_address.is_empty() {
            errors.push("server.bind_address cannot be empty".to_string());
        }
        if !self.server.ws_path.starts_with('/') {
            errors.push("server.ws_path must start with '/'".to_string());
        }

        let ws = &self.websocket;
        if ws.auth_timeout.is_zero() {
            errors.push("websocket.auth_timeout must be greater than 0".to_string());
        }
        if ws.write_wait.is_zero() {
            errors.push("websocket.write_wait must be greater than 0".to_string());
        }
        if ws.ping_period >= ws.pong_wait {
            errors.push("websocket.ping_period must be shorter than websocket.pong_wait".to_string());
        }
        if ws.outbound_queue_size == 0 {
            errors.push("websocket.outbound_queue_size must be greater than 0".to_string());
        }
        if ws.max_message_size == 0 {
            errors.push("websocket.max_message_size must be greater than 0".to_string());
        }

        match self.auth.transport {
            AuthTransportKind::Grpc if self.auth.discovery.is_none() => {
                if let Err(e) = Url::parse(&self.auth.grpc_endpoint) {
                    errors.push(format!("auth.grpc_endpoint is not a valid URL: {}", e));
                }
            }
            AuthTransportKind::Http if self.auth.discovery.is_none() => {
                if let Err(e) = Url::parse(&self.auth.http_base_url) {
                    errors.push(format!("auth.http_base_url is not a valid URL: {}", e));
                }
            }
            _ => {}
        }
        if self.auth.discovery.is_some() && self.registry.status_url.is_none() {
            errors.push("auth.discovery requires registry.status_url".to_string());
        }

        if self.registry.cleanup_interval.is_zero() {
            errors.push("registry.cleanup_interval must be greater than 0".to_string());
        }
        if !(1..=MAX_TTL_SECONDS).contains(&self.registry.default_ttl_secs) {
            errors.push(format!(
                "registry.default_ttl_secs must be between 1 and {}",
                MAX_TTL_SECONDS
            ));
        }
        if self.registry.key_prefix.is_empty() || self.registry.key_prefix.contains(':') {
            errors.push("registry.key_prefix must be non-empty and must not contain ':'".to_string());
        }
        if let Some(url) = &self.registry.status_url {
            if let Err(e) = Url::parse(url) {
                errors.push(format!("registry.status_url is not a valid URL: {}", e));
            }
        }
        if self.registry.store == StoreKind::Redis {
            if let Err(e) = Url::parse(&self.redis.url) {
                errors.push(format!("redis.url is not a valid URL: {}", e));
            }
        }

        if !self.observability.metrics_path.starts_with('/') {
            errors.push("observability.metrics_path must start with '/'".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config(errors.join("; ")))
        }
    }
}

/// Gateway listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identifier of this gateway instance, used as connection-id prefix
    pub gate_id: String,

    /// Server bind address
    pub bind_address: String,

    /// Port of the WebSocket/HTTP listener
    pub port: u16,

    /// Upgrade path
    pub ws_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gate_id: "gate-1".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
        }
    }
}

/// Connection lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Deadline for the first (auth) frame and for the auth collaborator call
    #[serde(with = "humantime_serde")]
    pub auth_timeout: Duration,

    /// Rolling read deadline, pushed forward by every frame and pong
    #[serde(with = "humantime_serde")]
    pub pong_wait: Duration,

    /// Interval between liveness probes sent by the outbound pump
    #[serde(with = "humantime_serde")]
    pub ping_period: Duration,

    /// Per-write deadline
    #[serde(with = "humantime_serde")]
    pub write_wait: Duration,

    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,

    /// Capacity of each session's outbound queue
    pub outbound_queue_size: usize,

    /// Session TTL hint returned in the handshake acknowledgement
    pub session_ttl_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(5),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(25),
            write_wait: Duration::from_secs(5),
            max_message_size: 16 * 1024,
            outbound_queue_size: 256,
            session_ttl_secs: 300,
        }
    }
}

/// Which binding is used to reach the auth collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthTransportKind {
    Grpc,
    Http,
}

/// Auth collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub transport: AuthTransportKind,

    /// gRPC endpoint, e.g. `http://127.0.0.1:50051`
    pub grpc_endpoint: String,

    /// Base URL of the HTTP binding, e.g. `http://127.0.0.1:8081`
    pub http_base_url: String,

    /// Timeout applied to every auth call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Resolve the endpoint through the status server at startup
    pub discovery: Option<AuthDiscoveryConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            transport: AuthTransportKind::Grpc,
            grpc_endpoint: "http://127.0.0.1:50051".to_string(),
            http_base_url: "http://127.0.0.1:8081".to_string(),
            request_timeout: Duration::from_secs(10),
            discovery: None,
        }
    }
}

/// Locate the auth collaborator through the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthDiscoveryConfig {
    /// Service type registered by the auth collaborator
    pub service_type: String,

    /// Selection strategy name (`load`, `weighted`, `round_robin`, `first`)
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_strategy() -> String {
    "load".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    /// In-process map with a periodic sweep
    Memory,
    /// Records bound to leases in the coordination store
    Lease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Redis,
}

/// Service registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,

    /// Coordination store used by the lease backend
    pub store: StoreKind,

    /// Sweep interval of the in-memory backend
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// TTL applied when a registration does not carry one
    pub default_ttl_secs: i64,

    /// Prefix for every key written to the coordination store
    pub key_prefix: String,

    /// Serve the registry HTTP surface from this process
    pub serve_http: bool,

    pub bind_address: String,

    pub port: u16,

    /// Base URL of a remote status server, used as a client
    pub status_url: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Memory,
            store: StoreKind::Memory,
            cleanup_interval: Duration::from_secs(30),
            default_ttl_secs: 60,
            key_prefix: "service".to_string(),
            serve_http: false,
            bind_address: "0.0.0.0".to_string(),
            port: 8500,
            status_url: None,
        }
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub log_level: String,

    pub log_format: LogFormat,

    pub metrics_enabled: bool,

    pub metrics_path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "chat_gateway=info,tower_http=info".to_string(),
            log_format: LogFormat::Json,
            metrics_enabled: true,
            metrics_path: "/metrics".to_string(),
        }
    }
}
