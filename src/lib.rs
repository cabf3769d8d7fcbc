//! # Chat Gateway Library
//!
//! Connection gateway and service registry for a multi-service chat platform.
//!
//! Clients hold long-lived WebSocket connections to a gateway instance. The first frame
//! of every connection authenticates it against the auth service; afterwards JSON
//! envelopes are dispatched by type to registered handlers. Backend services announce
//! themselves in a TTL-based service registry that the gateway and its peers use for
//! discovery.
//!
//! ## Layout
//!
//! - `core`: error type, configuration, ids and clocks
//! - `gateway`: server, connection registry and per-connection sessions
//! - `protocols`: message envelope and the WebSocket connection state machine
//! - `routing`: message router and built-in handlers
//! - `auth`: auth service contract with gRPC and HTTP bindings
//! - `discovery`: service records, the in-memory and lease-backed registries, the
//!   registry HTTP surface and its client
//! - `load_balancing`: instance selection strategies used by discovery
//! - `coordination`: token-owned distributed lock
//! - `store`: key-value store with expiry (in-memory or Redis)
//! - `observability`: logging and Prometheus metrics

/// Error type, configuration and basic identifiers
pub mod core;

/// Gateway server, connection registry and sessions
pub mod gateway;

/// Wire envelope and WebSocket handling
pub mod protocols;

/// Message type dispatch
pub mod routing;

/// Auth service clients
pub mod auth;

/// Service registry backends and HTTP surface
pub mod discovery;

/// Instance selection for discovery
pub mod load_balancing;

/// Mutual exclusion over the shared store
pub mod coordination;

/// Key-value store abstraction
pub mod store;

/// Logging and metrics
pub mod observability;

pub use core::config::GatewayConfig;
pub use core::error::{GatewayError, GatewayResult};
pub use core::types::{ConnectionId, UserId};
pub use gateway::{ConnectionRegistry, GatewayServer, GatewaySession};
pub use routing::{MessageHandler, MessageRouter};
