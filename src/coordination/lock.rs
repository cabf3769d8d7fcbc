//! # Distributed Lock
//!
//! Lease-based mutual exclusion over a [`KvStore`]. Ownership is proven by the random
//! token stored under the key, never by the identity of the calling process, so a holder
//! whose lease expired cannot release a lock someone else has since acquired.

use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::store::KvStore;

/// Shortest auto-refresh period; shorter requests are raised to it
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// A single acquisition attempt's worth of lock state
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    key: String,
    token: String,
    duration: Duration,
}

impl DistributedLock {
    /// Create a lock handle with a fresh ownership token
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>, duration: Duration) -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);

        Self {
            store,
            key: key.into(),
            token: hex::encode(bytes),
            duration,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Take the lock without waiting
    pub async fn try_lock(&self) -> GatewayResult<()> {
        if self.store.set_nx(&self.key, &self.token, self.duration).await? {
            debug!(lock_key = %self.key, "Lock acquired");
            Ok(())
        } else {
            Err(GatewayError::LockNotAcquired { key: self.key.clone() })
        }
    }

    /// Retry [`try_lock`](Self::try_lock) every `retry_interval` until it succeeds or
    /// `cancel` fires
    ///
    /// A zero `retry_interval` is a validation error.
    pub async fn lock(&self, retry_interval: Duration, cancel: &CancellationToken) -> GatewayResult<()> {
        if retry_interval.is_zero() {
            return Err(GatewayError::validation("retry_interval", "must be greater than 0"));
        }
        let mut ticker = tokio::time::interval(retry_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(GatewayError::LockNotAcquired { key: self.key.clone() });
                }
                _ = ticker.tick() => {
                    match self.try_lock().await {
                        Ok(()) => return Ok(()),
                        Err(GatewayError::LockNotAcquired { .. }) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Release the lock if this handle still owns it
    pub async fn unlock(&self) -> GatewayResult<()> {
        if self.store.compare_and_delete(&self.key, &self.token).await? {
            debug!(lock_key = %self.key, "Lock released");
            Ok(())
        } else {
            Err(GatewayError::LockNotOwned { key: self.key.clone() })
        }
    }

    /// Extend the lock's expiry by its full duration, if still owned
    pub async fn refresh(&self) -> GatewayResult<()> {
        if self
            .store
            .compare_and_expire(&self.key, &self.token, self.duration)
            .await?
        {
            Ok(())
        } else {
            Err(GatewayError::LockNotOwned { key: self.key.clone() })
        }
    }

    /// Keep extending the lock every `interval` until `cancel` fires or ownership is lost
    ///
    /// `interval` is raised to [`MIN_REFRESH_INTERVAL`] if shorter.
    pub fn start_auto_refresh(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let lock = self.clone();
        if interval < MIN_REFRESH_INTERVAL {
            warn!(lock_key = %self.key, interval = ?interval, "Refresh interval too short, clamping");
        }
        let interval = interval.max(MIN_REFRESH_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match lock.refresh().await {
                            Ok(()) => debug!(lock_key = %lock.key, "Lock refreshed"),
                            Err(GatewayError::LockNotOwned { .. }) => {
                                warn!(lock_key = %lock.key, "Lock ownership lost, stopping refresh");
                                break;
                            }
                            Err(e) => warn!(lock_key = %lock.key, error = %e, "Failed to refresh lock"),
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("duration", &self.duration)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> Arc<dyn KvStore> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_token_is_random_hex() {
        let store = store();
        let a = DistributedLock::new(store.clone(), "k", Duration::from_secs(5));
        let b = DistributedLock::new(store, "k", Duration::from_secs(5));
        assert_eq!(a.token().len(), 32);
        assert_ne!(a.token(), b.token());
    }

    #[tokio::test]
    async fn test_only_one_concurrent_try_lock_succeeds() {
        let store = store();
        let a = DistributedLock::new(store.clone(), "job", Duration::from_secs(5));
        let b = DistributedLock::new(store.clone(), "job", Duration::from_secs(5));

        let (ra, rb) = tokio::join!(a.try_lock(), b.try_lock());
        assert!(ra.is_ok() ^ rb.is_ok());
    }

    #[tokio::test]
    async fn test_unlock_by_non_owner_keeps_key() {
        let store = store();
        let owner = DistributedLock::new(store.clone(), "job", Duration::from_secs(5));
        let other = DistributedLock::new(store.clone(), "job", Duration::from_secs(5));

        owner.try_lock().await.unwrap();
        assert!(matches!(other.unlock().await, Err(GatewayError::LockNotOwned { .. })));
        assert_eq!(store.get("job").await.unwrap().as_deref(), Some(owner.token()));

        owner.unlock().await.unwrap();
        assert!(store.get("job").await.unwrap().is_none());
        assert!(matches!(owner.unlock().await, Err(GatewayError::LockNotOwned { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_waits_for_release() {
        let store = store();
        let holder = DistributedLock::new(store.clone(), "job", Duration::from_secs(2));
        let waiter = DistributedLock::new(store.clone(), "job", Duration::from_secs(2));
        holder.try_lock().await.unwrap();

        let cancel = CancellationToken::new();
        let result = waiter.lock(Duration::from_millis(100), &cancel).await;
        assert!(result.is_ok());
        assert_eq!(store.get("job").await.unwrap().as_deref(), Some(waiter.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_stops_on_cancel() {
        let store = store();
        let holder = DistributedLock::new(store.clone(), "job", Duration::from_secs(60));
        let waiter = DistributedLock::new(store, "job", Duration::from_secs(60));
        holder.try_lock().await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = waiter.lock(Duration::from_millis(100), &cancel).await;
        assert!(matches!(result, Err(GatewayError::LockNotAcquired { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_keeps_lock_alive() {
        let store = store();
        let lock = DistributedLock::new(store.clone(), "job", Duration::from_secs(2));
        lock.try_lock().await.unwrap();

        let cancel = CancellationToken::new();
        let handle = lock.start_auto_refresh(Duration::from_secs(1), cancel.clone());

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(store.get("job").await.unwrap().as_deref(), Some(lock.token()));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_stops_when_ownership_lost() {
        let store = store();
        let lock = DistributedLock::new(store.clone(), "job", Duration::from_secs(5));
        lock.try_lock().await.unwrap();
        store.delete("job").await.unwrap();

        let handle = lock.start_auto_refresh(Duration::from_secs(1), CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("refresh task should stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_intervals_do_not_panic() {
        let store = store();
        let lock = DistributedLock::new(store.clone(), "job", Duration::from_secs(2));
        let cancel = CancellationToken::new();
        assert!(matches!(
            lock.lock(Duration::ZERO, &cancel).await,
            Err(GatewayError::Validation { .. })
        ));

        lock.try_lock().await.unwrap();
        let handle = lock.start_auto_refresh(Duration::ZERO, cancel.clone());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.get("job").await.unwrap().as_deref(), Some(lock.token()));

        cancel.cancel();
        handle.await.unwrap();
    }
}
