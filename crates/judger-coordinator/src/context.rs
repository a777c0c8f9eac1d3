// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dependencies shared by the poll loop, the recovery scanner and sessions.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::admission::AdmissionController;
use crate::cluster::ClusterDriver;
use crate::lease::DistributedLease;
use crate::queue::WorkQueue;
use crate::session::{JudgeSession, SessionOutcome, SessionSettings};
use crate::store::LeaseStore;
use crate::templates::TemplateSet;
use crate::work_item::{SessionId, WorkItemRepository};

/// Client handles constructed once at startup.
pub struct CoordinatorContext {
    pub store: Arc<dyn LeaseStore>,
    pub cluster: Arc<dyn ClusterDriver>,
    pub queue: Arc<dyn WorkQueue>,
    pub templates: TemplateSet,
    /// Lease owner token of this coordinator.
    pub identity: String,
    pub settings: SessionSettings,
    pub admission: AdmissionController,
    pub lease: DistributedLease,
    pub work_items: WorkItemRepository,
}

/// A session running on its own task.
#[derive(Debug)]
pub struct SpawnedSession {
    pub id: SessionId,
    pub handle: JoinHandle<SessionOutcome>,
}

impl CoordinatorContext {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        cluster: Arc<dyn ClusterDriver>,
        queue: Arc<dyn WorkQueue>,
        templates: TemplateSet,
        identity: impl Into<String>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            admission: AdmissionController::new(store.clone()),
            lease: DistributedLease::new(store.clone()),
            work_items: WorkItemRepository::new(store.clone()),
            store,
            cluster,
            queue,
            templates,
            identity: identity.into(),
            settings,
        }
    }

    /// Run a session for `id` on a new task.
    ///
    /// The caller must hold an admission slot for it; the session releases it.
    pub fn spawn_session(self: &Arc<Self>, id: SessionId) -> SpawnedSession {
        debug!(session_id = %id, "Spawning session");
        let session = JudgeSession::new(self.clone(), id.clone());
        SpawnedSession {
            id,
            handle: tokio::spawn(session.run()),
        }
    }
}
