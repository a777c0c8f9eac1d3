// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Poll loop - admits and starts new submissions.
//!
//! Each tick takes an admission slot, polls the work queue once, persists
//! the polled item and spawns its session. The slot is returned right away
//! when nothing was polled; otherwise the session returns it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::context::{CoordinatorContext, SpawnedSession};
use crate::queue::TaskReporter;

/// Reason reported upstream when a polled item cannot be persisted.
pub const ADMISSION_FAILURE_REASON: &str = "Failed to admit solution";

/// Configuration for the poll loop.
#[derive(Debug, Clone)]
pub struct PollLoopConfig {
    /// Delay between ticks.
    pub poll_interval: Duration,
}

impl Default for PollLoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// What one tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// The admission cap is reached.
    Denied,
    /// The admission counter could not be read.
    AdmissionFailed,
    /// Nothing queued.
    Empty,
    /// Polling failed.
    PollFailed,
    /// A submission was polled but could not be persisted; it was failed upstream.
    Rejected,
    /// A session was started.
    Spawned(SpawnedSession),
}

/// Background worker polling the work queue.
pub struct PollLoop {
    ctx: Arc<CoordinatorContext>,
    config: PollLoopConfig,
    shutdown: Arc<Notify>,
}

impl PollLoop {
    pub fn new(ctx: Arc<CoordinatorContext>, config: PollLoopConfig) -> Self {
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

    /// Run until shutdown is signalled. Sessions already spawned keep running.
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Poll loop started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Poll loop received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.tick().await;
                }
            }
        }

        info!("Poll loop stopped");
    }

    /// Run a single admission + poll cycle.
    pub async fn tick(&self) -> TickOutcome {
        let ctx = &self.ctx;

        match ctx.admission.try_admit().await {
            Ok(true) => {}
            Ok(false) => return TickOutcome::Denied,
            Err(e) => {
                error!(error = %e, "Failed to request admission");
                return TickOutcome::AdmissionFailed;
            }
        }

        let item = match ctx.queue.poll().await {
            Ok(Some(item)) => item,
            Ok(None) => {
                self.release_admission().await;
                return TickOutcome::Empty;
            }
            Err(e) => {
                error!(error = %e, "Failed to poll");
                self.release_admission().await;
                return TickOutcome::PollFailed;
            }
        };

        info!(
            solution_id = %item.solution_id,
            task_id = %item.task_id,
            "Received solution"
        );

        match ctx.work_items.store_item(&item).await {
            Ok(id) => TickOutcome::Spawned(ctx.spawn_session(id)),
            Err(e) => {
                error!(
                    solution_id = %item.solution_id,
                    task_id = %item.task_id,
                    error = %e,
                    "Failed to admit solution"
                );
                let reporter = TaskReporter::for_item(ctx.queue.clone(), &item);
                if let Err(e) = reporter.fail(ADMISSION_FAILURE_REASON).await {
                    error!(error = %e, "Failed to fail solution");
                }
                self.release_admission().await;
                TickOutcome::Rejected
            }
        }
    }

    async fn release_admission(&self) {
        if let Err(e) = self.ctx.admission.release().await {
            error!(error = %e, "Failed to release admission");
        } else {
            debug!("Admission released");
        }
    }
}
