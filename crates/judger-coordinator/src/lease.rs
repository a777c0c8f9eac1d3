// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Distributed lease giving one coordinator exclusive ownership of a session.
//!
//! A lease is a single store entry whose value is the owner identity. It is
//! created with set-if-absent semantics and a TTL, kept alive by a
//! [`LeaseRefresher`], and removed with a compare-and-delete so an expired
//! lease that was re-acquired elsewhere is never released by the old owner.
//! If the owner dies, the entry simply expires.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::store::{LeaseStore, StoreError};
use crate::work_item::SessionId;

/// Prefix of lease keys.
pub const LEASE_PREFIX: &str = "judge:lock:";
/// Lease lifetime without refresh.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(360);
/// Refresh period, well inside the TTL.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(120);

/// Errors from lease operations.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// The lease entry vanished: it expired or was deleted.
    #[error("Lease {0} is no longer held")]
    Lost(String),

    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lease key guarding a session.
pub fn lease_key(id: &SessionId) -> String {
    format!("{}{}", LEASE_PREFIX, id)
}

/// Acquire/refresh/release primitives over a [`LeaseStore`].
#[derive(Clone)]
pub struct DistributedLease {
    store: Arc<dyn LeaseStore>,
}

impl DistributedLease {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }

    /// Take the lease for `owner` unless someone holds it.
    pub async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LeaseError> {
        Ok(self.store.set_if_absent(key, owner, ttl).await?)
    }

    /// Extend the lease TTL. Fails with [`LeaseError::Lost`] if the entry is gone.
    pub async fn refresh(&self, key: &str, ttl: Duration) -> Result<(), LeaseError> {
        if self.store.expire(key, ttl).await? {
            Ok(())
        } else {
            Err(LeaseError::Lost(key.to_string()))
        }
    }

    /// Remove the lease if `owner` still holds it. Returns whether it was removed.
    pub async fn release(&self, key: &str, owner: &str) -> Result<bool, LeaseError> {
        let released = self.store.delete_if_equals(key, owner).await?;
        if !released {
            debug!(key = %key, owner = %owner, "Lease not released, held by someone else");
        }
        Ok(released)
    }

    /// Non-authoritative existence check.
    pub async fn is_held(&self, key: &str) -> Result<bool, LeaseError> {
        Ok(self.store.exists(key).await?)
    }
}

/// Background task keeping a lease alive.
///
/// The refresher and its session form a cancellation-aware pair: the session
/// stops the refresher through [`stop`](Self::stop), and a failed refresh
/// cancels the token returned by [`lost_token`](Self::lost_token), which the
/// session watches.
pub struct LeaseRefresher {
    stop: CancellationToken,
    lost: CancellationToken,
    handle: JoinHandle<()>,
}

impl LeaseRefresher {
    /// Start refreshing `key` every `interval`.
    pub fn spawn(lease: DistributedLease, key: String, ttl: Duration, interval: Duration) -> Self {
        let stop = CancellationToken::new();
        let lost = CancellationToken::new();

        let stop_rx = stop.clone();
        let lost_tx = lost.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = stop_rx.cancelled() => {
                        debug!(key = %key, "Lease refresher stopped");
                        break;
                    }

                    _ = tokio::time::sleep(interval) => {
                        match lease.refresh(&key, ttl).await {
                            Ok(()) => debug!(key = %key, "Lease refreshed"),
                            Err(LeaseError::Lost(_)) => {
                                warn!(key = %key, "Lease lost");
                                lost_tx.cancel();
                                break;
                            }
                            Err(e) => {
                                warn!(key = %key, error = %e, "Failed to refresh lease");
                                lost_tx.cancel();
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self { stop, lost, handle }
    }

    /// Token cancelled when the lease can no longer be refreshed.
    pub fn lost_token(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Whether the lease has been lost.
    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Stop refreshing and wait for the task to exit.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            error!("Lease refresher task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const KEY: &str = "judge:lock:soln:s1:t1";

    fn lease() -> (Arc<MemoryStore>, DistributedLease) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), DistributedLease::new(store))
    }

    #[test]
    fn test_lease_key() {
        assert_eq!(lease_key(&SessionId::for_task("s1", "t1")), KEY);
    }

    #[tokio::test]
    async fn test_single_holder() {
        let (_, lease) = lease();
        let ttl = Duration::from_secs(60);

        assert!(lease.acquire(KEY, "a", ttl).await.unwrap());
        assert!(!lease.acquire(KEY, "b", ttl).await.unwrap());

        assert!(!lease.release(KEY, "b").await.unwrap());
        assert!(lease.is_held(KEY).await.unwrap());

        assert!(lease.release(KEY, "a").await.unwrap());
        assert!(!lease.is_held(KEY).await.unwrap());
        assert!(lease.acquire(KEY, "b", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_owner_cannot_release_reacquired_lease() {
        let (store, lease) = lease();
        let ttl = Duration::from_secs(10);

        assert!(lease.acquire(KEY, "a", ttl).await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(lease.acquire(KEY, "b", ttl).await.unwrap());

        assert!(!lease.release(KEY, "a").await.unwrap());
        assert_eq!(store.get(KEY).await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_refresh_missing_is_lost() {
        let (_, lease) = lease();
        assert!(matches!(
            lease.refresh(KEY, Duration::from_secs(10)).await,
            Err(LeaseError::Lost(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_keeps_lease_alive() {
        let (store, lease) = lease();
        let ttl = Duration::from_secs(30);
        assert!(lease.acquire(KEY, "a", ttl).await.unwrap());

        let refresher =
            LeaseRefresher::spawn(lease.clone(), KEY.to_string(), ttl, Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(store.exists(KEY).await.unwrap());
        assert!(!refresher.is_lost());

        refresher.stop().await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(!store.exists(KEY).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_signals_loss() {
        let (store, lease) = lease();
        let ttl = Duration::from_secs(30);
        assert!(lease.acquire(KEY, "a", ttl).await.unwrap());

        let refresher =
            LeaseRefresher::spawn(lease, KEY.to_string(), ttl, Duration::from_secs(10));
        let lost = refresher.lost_token();

        store.delete(KEY).await.unwrap();
        tokio::time::timeout(Duration::from_secs(11), lost.cancelled())
            .await
            .unwrap();

        assert!(refresher.is_lost());
        refresher.stop().await;
    }
}
