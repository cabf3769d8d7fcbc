//! # In-Memory Service Registry
//!
//! Records live in a `HashMap` behind a reader/writer lock. Reads never wait for cleanup:
//! expired records met on a read pass are filtered out and their removal is handed to a
//! background task that re-checks expiry under the write lock, since a heartbeat may have
//! landed in between. A periodic sweep reaps whatever nobody read.

use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::service_discovery::ServiceRegistry;
use super::service_info::{composite_key, ServiceInfo, ServiceStatus};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Clock, SystemClock};
use crate::observability::metrics::SERVICES_EXPIRED_TOTAL;

type Records = Arc<RwLock<HashMap<String, ServiceInfo>>>;

/// Process-local registry backend
pub struct MemoryRegistry {
    records: Records,
    clock: Arc<dyn Clock>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Number of stored records, expired or not
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Remove every expired record, returning how many were removed
    pub fn sweep(&self) -> usize {
        Self::remove_expired(&self.records, self.clock.as_ref(), None)
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires
    pub fn start_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let records = self.records.clone();
        let clock = self.clock.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Registry sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = Self::remove_expired(&records, clock.as_ref(), None);
                        if removed > 0 {
                            info!(removed = removed, "Swept expired service records");
                        }
                    }
                }
            }
        })
    }

    /// Remove expired records, optionally limited to `keys`
    fn remove_expired(records: &Records, clock: &dyn Clock, keys: Option<&[String]>) -> usize {
        let now = clock.now();
        let mut records = records.write();
        let before = records.len();

        match keys {
            Some(keys) => {
                for key in keys {
                    if records.get(key).map(|r| r.is_expired(now)).unwrap_or(false) {
                        records.remove(key);
                    }
                }
            }
            None => records.retain(|_, record| !record.is_expired(now)),
        }

        let removed = before - records.len();
        if removed > 0 {
            counter!(SERVICES_EXPIRED_TOTAL).increment(removed as u64);
        }
        removed
    }

    fn schedule_removal(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        let records = self.records.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let removed = Self::remove_expired(&records, clock.as_ref(), Some(&keys));
            debug!(removed = removed, "Removed expired records found on read");
        });
    }

    fn live_records<F>(&self, filter: F) -> Vec<ServiceInfo>
    where
        F: Fn(&ServiceInfo) -> bool,
    {
        let now = self.clock.now();
        let mut expired = Vec::new();
        let mut live = Vec::new();
        {
            let records = self.records.read();
            for (key, record) in records.iter() {
                if !filter(record) {
                    continue;
                }
                if record.is_expired(now) {
                    expired.push(key.clone());
                } else {
                    live.push(record.clone());
                }
            }
        }
        self.schedule_removal(expired);
        live.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        live
    }

    fn with_live_record<T, F>(&self, service_type: &str, service_id: &str, update: F) -> GatewayResult<T>
    where
        F: FnOnce(&mut ServiceInfo, i64) -> T,
    {
        let now = self.clock.now();
        let key = composite_key(service_type, service_id);
        let mut records = self.records.write();

        match records.get_mut(&key) {
            Some(record) if !record.is_expired(now) => Ok(update(record, now)),
            Some(_) => {
                records.remove(&key);
                counter!(SERVICES_EXPIRED_TOTAL).increment(1);
                Err(GatewayError::service_not_found(service_type, service_id))
            }
            None => Err(GatewayError::service_not_found(service_type, service_id)),
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn register_service(&self, mut info: ServiceInfo) -> GatewayResult<()> {
        info.validate()?;
        let now = self.clock.now();
        let key = info.composite_key();
        let mut records = self.records.write();

        if let Some(existing) = records.get(&key) {
            if !existing.is_expired(now) {
                return Err(GatewayError::service_exists(&info.service_type, &info.service_id));
            }
        }

        info.last_heartbeat = now;
        info!(
            service_type = %info.service_type,
            service_id = %info.service_id,
            ttl_seconds = info.ttl_seconds,
            "Service registered"
        );
        records.insert(key, info);
        Ok(())
    }

    async fn get_service(&self, service_type: &str, service_id: &str) -> GatewayResult<ServiceInfo> {
        let now = self.clock.now();
        let key = composite_key(service_type, service_id);
        let found = self.records.read().get(&key).cloned();

        match found {
            Some(record) if !record.is_expired(now) => Ok(record),
            Some(_) => {
                self.schedule_removal(vec![key]);
                Err(GatewayError::service_not_found(service_type, service_id))
            }
            None => Err(GatewayError::service_not_found(service_type, service_id)),
        }
    }

    async fn discover_services_by_type(&self, service_type: &str) -> GatewayResult<Vec<ServiceInfo>> {
        Ok(self.live_records(|record| record.service_type == service_type))
    }

    async fn get_all_services(&self) -> GatewayResult<Vec<ServiceInfo>> {
        Ok(self.live_records(|_| true))
    }

    async fn deregister_service(&self, service_type: &str, service_id: &str) -> GatewayResult<()> {
        let key = composite_key(service_type, service_id);
        match self.records.write().remove(&key) {
            Some(_) => {
                info!(service_type = %service_type, service_id = %service_id, "Service deregistered");
                Ok(())
            }
            None => Err(GatewayError::service_not_found(service_type, service_id)),
        }
    }

    async fn keep_alive(&self, service_type: &str, service_id: &str) -> GatewayResult<()> {
        self.with_live_record(service_type, service_id, |record, now| {
            record.last_heartbeat = now;
        })
    }

    async fn update_status(&self, service_type: &str, service_id: &str, status: ServiceStatus) -> GatewayResult<()> {
        self.with_live_record(service_type, service_id, |record, _| {
            record.status = status;
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ManualClock;

    fn registry() -> (MemoryRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (MemoryRegistry::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let (registry, _) = registry();
        registry.register_service(ServiceInfo::new("verify", "v1", 60)).await.unwrap();

        let err = registry
            .register_service(ServiceInfo::new("verify", "v1", 60))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ServiceAlreadyExists { .. }));

        // same id under another type is a different record
        registry.register_service(ServiceInfo::new("gate", "v1", 60)).await.unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_liveness_expiry() {
        let (registry, clock) = registry();
        registry.register_service(ServiceInfo::new("verify", "v1", 60)).await.unwrap();

        clock.set(30);
        assert_eq!(registry.discover_services_by_type("verify").await.unwrap().len(), 1);

        clock.set(61);
        assert!(registry.discover_services_by_type("verify").await.unwrap().is_empty());
        assert!(registry.get_service("verify", "v1").await.is_err());
    }

    #[tokio::test]
    async fn test_keep_alive_extends_liveness() {
        let (registry, clock) = registry();
        registry.register_service(ServiceInfo::new("verify", "v1", 60)).await.unwrap();

        clock.set(50);
        registry.keep_alive("verify", "v1").await.unwrap();
        clock.set(100);
        let record = registry.get_service("verify", "v1").await.unwrap();
        assert_eq!(record.last_heartbeat, 50);

        clock.set(200);
        let err = registry.keep_alive("verify", "v1").await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceNotFound { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (registry, clock) = registry();
        registry.register_service(ServiceInfo::new("verify", "short", 10)).await.unwrap();
        registry.register_service(ServiceInfo::new("verify", "long", 100)).await.unwrap();

        clock.set(20);
        assert_eq!(registry.sweep(), 1);
        let all = registry.get_all_services().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].service_id, "long");
    }

    #[tokio::test]
    async fn test_expired_record_can_be_registered_again() {
        let (registry, clock) = registry();
        registry.register_service(ServiceInfo::new("verify", "v1", 10)).await.unwrap();
        clock.set(11);
        registry.register_service(ServiceInfo::new("verify", "v1", 10)).await.unwrap();
        assert_eq!(registry.get_service("verify", "v1").await.unwrap().last_heartbeat, 11);
    }

    #[tokio::test]
    async fn test_update_status_and_deregister() {
        let (registry, _) = registry();
        registry.register_service(ServiceInfo::new("verify", "v1", 60)).await.unwrap();
        registry
            .update_status("verify", "v1", ServiceStatus::Inactive)
            .await
            .unwrap();
        assert_eq!(
            registry.get_service("verify", "v1").await.unwrap().status,
            ServiceStatus::Inactive
        );

        registry.deregister_service("verify", "v1").await.unwrap();
        assert!(registry.deregister_service("verify", "v1").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper() {
        let (registry, clock) = registry();
        registry.register_service(ServiceInfo::new("verify", "v1", 5)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = registry.start_sweeper(Duration::from_secs(30), cancel.clone());

        clock.set(10);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(registry.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_never_panics_discovery() {
        let (registry, clock) = registry();
        let err = registry
            .register_service(ServiceInfo::new("verify", "v1", i64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
        assert!(registry.is_empty());

        // records that bypassed validation still evaluate without overflow
        let mut stored = ServiceInfo::new("verify", "v2", i64::MAX);
        stored.last_heartbeat = 10;
        registry.records.write().insert(stored.composite_key(), stored);
        clock.set(1_000_000);
        assert_eq!(registry.discover_services_by_type("verify").await.unwrap().len(), 1);
        assert_eq!(registry.sweep(), 0);
    }

    #[tokio::test]
    async fn test_type_with_separator_is_rejected() {
        let (registry, _) = registry();
        let err = registry
            .register_service(ServiceInfo::new("verify:eu", "v1", 60))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));

        registry.register_service(ServiceInfo::new("lock", "l1", 60)).await.unwrap();
        assert_eq!(registry.discover_services_by_type("lock").await.unwrap().len(), 1);
    }
}
