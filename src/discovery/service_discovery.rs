//! # Service Registry Contract
//!
//! Both registry backends implement [`ServiceRegistry`]. The contract:
//!
//! - `(service_type, service_id)` identifies a record; registering an existing key fails
//!   with `ServiceAlreadyExists`
//! - a record is visible only while [`ServiceInfo::is_expired`] is false; nothing else is
//!   needed to garbage-collect it, so crashed instances disappear on their own
//! - `keep_alive` advances `last_heartbeat` and fails with `ServiceNotFound` once the
//!   record has been reaped
//!
//! ## Rust Concepts Used
//!
//! - `async_trait` for async methods in traits
//! - `Arc<dyn ServiceRegistry>` lets the HTTP surface stay agnostic of the backend

use async_trait::async_trait;
use std::sync::Arc;

use super::service_info::{ServiceInfo, ServiceStatus};
use crate::core::error::GatewayResult;

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Insert a record, stamping `last_heartbeat` with the current time
    async fn register_service(&self, info: ServiceInfo) -> GatewayResult<()>;

    async fn get_service(&self, service_type: &str, service_id: &str) -> GatewayResult<ServiceInfo>;

    /// Every live record of `service_type`
    async fn discover_services_by_type(&self, service_type: &str) -> GatewayResult<Vec<ServiceInfo>>;

    async fn get_all_services(&self) -> GatewayResult<Vec<ServiceInfo>>;

    async fn deregister_service(&self, service_type: &str, service_id: &str) -> GatewayResult<()>;

    async fn keep_alive(&self, service_type: &str, service_id: &str) -> GatewayResult<()>;

    /// Change the reported status of a live record
    async fn update_status(&self, service_type: &str, service_id: &str, status: ServiceStatus) -> GatewayResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Shared handle used by the HTTP surface and the gateway
pub type SharedRegistry = Arc<dyn ServiceRegistry>;

/// Look a record up by id alone, across every live type
pub async fn find_by_id(registry: &dyn ServiceRegistry, service_id: &str) -> GatewayResult<Option<ServiceInfo>> {
    Ok(registry
        .get_all_services()
        .await?
        .into_iter()
        .find(|info| info.service_id == service_id))
}
