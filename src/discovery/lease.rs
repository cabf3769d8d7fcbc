//! # Lease-Backed Service Registry
//!
//! Each record is stored as JSON under `<prefix>:<type>:<id>` in the coordination store,
//! with a store-side expiry equal to the record's TTL. Per-record locks live under
//! `<prefix>-lock:<type>:<id>`, outside the record namespace. A renewal task per registration
//! republishes the record with a fresh `last_heartbeat` every `ttl / 3`; when the owning
//! process dies the key simply expires.
//!
//! The store is the source of truth. The local cache only saves round trips on
//! `get_service` and is re-validated against the liveness predicate on every hit.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service_discovery::ServiceRegistry;
use super::service_info::{ServiceInfo, ServiceStatus};
use crate::coordination::DistributedLock;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Clock, SystemClock};
use crate::store::KvStore;

const LOCK_DURATION: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(50);
const LOCK_WAIT: Duration = Duration::from_secs(2);
const MIN_RENEWAL_PERIOD: Duration = Duration::from_secs(1);

struct LeaseInner {
    store: Arc<dyn KvStore>,
    prefix: String,
    clock: Arc<dyn Clock>,
    cache: DashMap<String, ServiceInfo>,
    /// Renewal task per record key, tagged with a generation so a finished task never
    /// removes its successor's entry
    renewals: DashMap<String, (u64, CancellationToken)>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

/// Registry backend over an external coordination store
pub struct LeaseRegistry {
    inner: Arc<LeaseInner>,
}

impl LeaseRegistry {
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self::with_clock(store, prefix, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KvStore>, prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(LeaseInner {
                store,
                prefix: prefix.into(),
                clock,
                cache: DashMap::new(),
                renewals: DashMap::new(),
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Store key for a record
    pub fn record_key(&self, service_type: &str, service_id: &str) -> String {
        self.inner.record_key(service_type, service_id)
    }

    /// Number of registrations this instance is currently renewing
    pub fn active_renewals(&self) -> usize {
        self.inner.renewals.len()
    }

    /// Stop every renewal task; records then expire on their own
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.renewals.clear();
    }

    /// Renewal period for a TTL: a third of it, never below one second
    pub fn renewal_period(ttl_seconds: i64) -> Duration {
        let third = Duration::from_secs(ttl_seconds.max(0) as u64) / 3;
        third.max(MIN_RENEWAL_PERIOD)
    }

    fn start_renewal(&self, service_type: String, service_id: String, ttl_seconds: i64) {
        let cancel = self.inner.shutdown.child_token();
        let key = self.inner.record_key(&service_type, &service_id);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self.inner.renewals.insert(key.clone(), (generation, cancel.clone())) {
            previous.cancel();
        }

        let inner = self.inner.clone();
        let period = Self::renewal_period(ttl_seconds);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match inner.modify(&service_type, &service_id, |_| {}).await {
                            Ok(_) => debug!(service_type = %service_type, service_id = %service_id, "Lease renewed"),
                            Err(GatewayError::ServiceNotFound { .. }) => {
                                warn!(service_type = %service_type, service_id = %service_id, "Lease lost, stopping renewal");
                                inner.renewals.remove_if(&key, |_, (owner, _)| *owner == generation);
                                break;
                            }
                            Err(e) => warn!(
                                service_type = %service_type,
                                service_id = %service_id,
                                error = %e,
                                "Lease renewal failed, will retry"
                            ),
                        }
                    }
                }
            }
        });
    }
}

impl Drop for LeaseRegistry {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl LeaseInner {
    fn record_key(&self, service_type: &str, service_id: &str) -> String {
        format!("{}:{}:{}", self.prefix, service_type, service_id)
    }

    fn lock_key(&self, service_type: &str, service_id: &str) -> String {
        format!("{}-lock:{}:{}", self.prefix, service_type, service_id)
    }

    fn ttl(info: &ServiceInfo) -> Duration {
        Duration::from_secs(info.ttl_seconds.max(1) as u64)
    }

    fn decode(key: &str, raw: &str) -> Option<ServiceInfo> {
        match serde_json::from_str(raw) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping undecodable service record");
                None
            }
        }
    }

    /// Fetch a live record from the store, refreshing the cache
    async fn fetch(&self, service_type: &str, service_id: &str) -> GatewayResult<ServiceInfo> {
        let key = self.record_key(service_type, service_id);
        let raw = self.store.get(&key).await?;

        match raw.as_deref().and_then(|raw| Self::decode(&key, raw)) {
            Some(info) if !info.is_expired(self.clock.now()) => {
                self.cache.insert(key, info.clone());
                Ok(info)
            }
            _ => {
                self.cache.remove(&key);
                Err(GatewayError::service_not_found(service_type, service_id))
            }
        }
    }

    /// Read-modify-write a live record under its distributed lock, advancing
    /// `last_heartbeat` and resetting the lease
    async fn modify<F>(&self, service_type: &str, service_id: &str, update: F) -> GatewayResult<ServiceInfo>
    where
        F: FnOnce(&mut ServiceInfo),
    {
        let lock = DistributedLock::new(
            self.store.clone(),
            self.lock_key(service_type, service_id),
            LOCK_DURATION,
        );
        let cancel = CancellationToken::new();
        match tokio::time::timeout(LOCK_WAIT, lock.lock(LOCK_RETRY, &cancel)).await {
            Ok(result) => result?,
            Err(_) => {
                cancel.cancel();
                return Err(GatewayError::LockNotAcquired {
                    key: lock.key().to_string(),
                });
            }
        }

        let result = self.modify_locked(service_type, service_id, update).await;

        if let Err(e) = lock.unlock().await {
            warn!(lock_key = %lock.key(), error = %e, "Failed to release record lock");
        }
        result
    }

    async fn modify_locked<F>(&self, service_type: &str, service_id: &str, update: F) -> GatewayResult<ServiceInfo>
    where
        F: FnOnce(&mut ServiceInfo),
    {
        let key = self.record_key(service_type, service_id);
        let mut info = self.fetch(service_type, service_id).await?;

        update(&mut info);
        info.last_heartbeat = self.clock.now();

        let raw = serde_json::to_string(&info)?;
        if !self.store.set_xx(&key, &raw, Self::ttl(&info)).await? {
            self.cache.remove(&key);
            return Err(GatewayError::service_not_found(service_type, service_id));
        }

        self.cache.insert(key, info.clone());
        Ok(info)
    }

    /// Live records under `prefix`, limited to `service_type` when given
    async fn scan(&self, prefix: &str, service_type: Option<&str>) -> GatewayResult<Vec<ServiceInfo>> {
        let now = self.clock.now();
        let mut found = Vec::new();

        for (key, raw) in self.store.scan_prefix(prefix).await? {
            let Some(info) = Self::decode(&key, &raw) else {
                continue;
            };
            if service_type.is_some_and(|t| t != info.service_type) {
                continue;
            }
            if info.is_expired(now) {
                self.cache.remove(&key);
                continue;
            }
            self.cache.insert(key, info.clone());
            found.push(info);
        }

        found.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok(found)
    }
}

#[async_trait]
impl ServiceRegistry for LeaseRegistry {
    async fn register_service(&self, mut info: ServiceInfo) -> GatewayResult<()> {
        info.validate()?;
        let inner = &self.inner;
        let key = inner.record_key(&info.service_type, &info.service_id);
        info.last_heartbeat = inner.clock.now();

        let raw = serde_json::to_string(&info)?;
        if !inner.store.set_nx(&key, &raw, LeaseInner::ttl(&info)).await? {
            return Err(GatewayError::service_exists(&info.service_type, &info.service_id));
        }

        info!(
            service_type = %info.service_type,
            service_id = %info.service_id,
            ttl_seconds = info.ttl_seconds,
            "Service registered with lease"
        );
        inner.cache.insert(key, info.clone());
        self.start_renewal(info.service_type, info.service_id, info.ttl_seconds);
        Ok(())
    }

    async fn get_service(&self, service_type: &str, service_id: &str) -> GatewayResult<ServiceInfo> {
        let inner = &self.inner;
        let key = inner.record_key(service_type, service_id);
        let now = inner.clock.now();

        if let Some(cached) = inner.cache.get(&key).map(|entry| entry.value().clone()) {
            if !cached.is_expired(now) {
                return Ok(cached);
            }
            inner.cache.remove(&key);
        }

        inner.fetch(service_type, service_id).await
    }

    async fn discover_services_by_type(&self, service_type: &str) -> GatewayResult<Vec<ServiceInfo>> {
        let prefix = format!("{}:{}:", self.inner.prefix, service_type);
        self.inner.scan(&prefix, Some(service_type)).await
    }

    async fn get_all_services(&self) -> GatewayResult<Vec<ServiceInfo>> {
        let prefix = format!("{}:", self.inner.prefix);
        self.inner.scan(&prefix, None).await
    }

    async fn deregister_service(&self, service_type: &str, service_id: &str) -> GatewayResult<()> {
        let inner = &self.inner;
        let key = inner.record_key(service_type, service_id);

        if let Some((_, (_, token))) = inner.renewals.remove(&key) {
            token.cancel();
        }
        inner.cache.remove(&key);

        if inner.store.delete(&key).await? {
            info!(service_type = %service_type, service_id = %service_id, "Service deregistered");
            Ok(())
        } else {
            Err(GatewayError::service_not_found(service_type, service_id))
        }
    }

    async fn keep_alive(&self, service_type: &str, service_id: &str) -> GatewayResult<()> {
        self.inner.modify(service_type, service_id, |_| {}).await.map(|_| ())
    }

    async fn update_status(&self, service_type: &str, service_id: &str, status: ServiceStatus) -> GatewayResult<()> {
        self.inner
            .modify(service_type, service_id, |info| info.status = status)
            .await
            .map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        "lease"
    }
}
