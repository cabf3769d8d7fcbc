//! # Service Discovery Module
//!
//! Liveness-tracked service records, the two registry backends, the registry HTTP
//! surface and a client for a remote registry.

pub mod api;
pub mod client;
pub mod http;
pub mod lease;
pub mod memory;
pub mod service_discovery;
pub mod service_info;

pub use api::{ApiResponse, DeregisterRequest, DiscoveryRequest, HeartbeatRequest, RegisterRequest};
pub use client::StatusClient;
pub use http::{RegistryHttpRouter, RegistryHttpState};
pub use lease::LeaseRegistry;
pub use memory::MemoryRegistry;
pub use service_discovery::{find_by_id, ServiceRegistry, SharedRegistry};
pub use service_info::{Address, ServiceInfo, ServiceStatus, MAX_TTL_SECONDS};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::config::{GatewayConfig, RegistryBackend, StoreKind};
use crate::core::error::GatewayResult;
use crate::store::{KvStore, MemoryStore, RedisStore};

/// Build the coordination store selected by `registry.store`
pub async fn create_store(config: &GatewayConfig) -> GatewayResult<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match config.registry.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Redis => Arc::new(RedisStore::connect(&config.redis.url).await?),
    };
    Ok(store)
}

/// Build the registry backend selected by `registry.backend`
///
/// The in-memory backend's sweeper runs until `cancel` fires.
pub async fn create_registry(config: &GatewayConfig, cancel: &CancellationToken) -> GatewayResult<SharedRegistry> {
    let registry: SharedRegistry = match config.registry.backend {
        RegistryBackend::Memory => {
            let registry = MemoryRegistry::new();
            registry.start_sweeper(config.registry.cleanup_interval, cancel.child_token());
            Arc::new(registry)
        }
        RegistryBackend::Lease => {
            let store = create_store(config).await?;
            Arc::new(LeaseRegistry::new(store, config.registry.key_prefix.clone()))
        }
    };
    Ok(registry)
}
