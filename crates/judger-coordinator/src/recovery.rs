// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Recovery scanner - adopts work items whose session died.
//!
//! A coordinator that crashes after persisting a work item leaves it in the
//! store without a lease once the lease TTL runs out. Every sweep lists the
//! persisted items and starts a session for each one nobody holds, so any
//! surviving replica eventually finishes the work. The lease check is only
//! a hint: if another replica takes the item first, the new session sees the
//! lease and skips.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::context::{CoordinatorContext, SpawnedSession};
use crate::lease::lease_key;
use crate::work_item::WorkItemError;

/// Configuration for the recovery scanner.
#[derive(Debug, Clone)]
pub struct RecoveryScannerConfig {
    /// Delay between sweeps.
    pub interval: Duration,
}

impl Default for RecoveryScannerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(480),
        }
    }
}

/// Background worker re-spawning orphaned sessions.
pub struct RecoveryScanner {
    ctx: Arc<CoordinatorContext>,
    config: RecoveryScannerConfig,
    shutdown: Arc<Notify>,
}

impl RecoveryScanner {
    pub fn new(ctx: Arc<CoordinatorContext>, config: RecoveryScannerConfig) -> Self {
        Self {
            ctx,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Sweep immediately, then every interval until shutdown.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Recovery scanner started"
        );

        loop {
            if let Err(e) = self.sweep().await {
                error!(error = %e, "Failed to find orphaned sessions");
            }

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Recovery scanner received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!("Recovery scanner stopped");
    }

    /// Spawn a session for every persisted, unleased work item.
    ///
    /// Each adopted item takes an admission slot first; the sweep stops early
    /// once the cap is reached and the rest wait for the next sweep.
    pub async fn sweep(&self) -> Result<Vec<SpawnedSession>, WorkItemError> {
        let ctx = &self.ctx;
        let mut spawned = Vec::new();

        for id in ctx.work_items.list().await? {
            match ctx.lease.is_held(&lease_key(&id)).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Failed to check lease");
                    continue;
                }
            }

            match ctx.admission.try_admit().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Admission cap reached, deferring recovery");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to request admission for recovery");
                    break;
                }
            }

            info!(session_id = %id, "Recovering orphaned session");
            spawned.push(ctx.spawn_session(id));
        }

        Ok(spawned)
    }
}
