// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for judger-coordinator integration tests.
//!
//! Provides TestContext wiring an in-memory store, a mock cluster and a mock
//! queue into a coordinator context.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use judger_coordinator::cluster::MockCluster;
use judger_coordinator::context::CoordinatorContext;
use judger_coordinator::queue::MockQueue;
use judger_coordinator::session::{SessionOutcome, SessionSettings};
use judger_coordinator::store::MemoryStore;
use judger_coordinator::templates::TemplateSet;
use judger_coordinator::work_item::{SessionId, WorkItem};
use judger_upstream::{ProblemConfig, ProblemConfigJudge};

pub const IDENTITY: &str = "coordinator-test";
pub const RATE_LIMIT: u64 = 4;
pub const SOLUTION_URL: &str = "https://oss.example.com/solutions/s1.tar.gz";

/// Test context holding the doubles behind a coordinator context.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub cluster: Arc<MockCluster>,
    pub queue: Arc<MockQueue>,
    pub ctx: Arc<CoordinatorContext>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_cluster(MockCluster::new()).await
    }

    pub async fn with_cluster(cluster: MockCluster) -> Self {
        Self::build(cluster, MockQueue::new(), SessionSettings::default()).await
    }

    pub async fn build(cluster: MockCluster, queue: MockQueue, settings: SessionSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cluster = Arc::new(cluster);
        let queue = Arc::new(queue);

        let ctx = Arc::new(CoordinatorContext::new(
            store.clone(),
            cluster.clone(),
            queue.clone(),
            fixture_templates(),
            IDENTITY,
            settings,
        ));
        ctx.admission.init(RATE_LIMIT).await.unwrap();

        Self {
            store,
            cluster,
            queue,
            ctx,
        }
    }

    /// Persist a work item as the poll loop would.
    pub async fn persist(&self, item: &WorkItem) -> SessionId {
        self.ctx.work_items.store_item(item).await.unwrap()
    }

    /// Take an admission slot and run a session to completion.
    pub async fn run_session(&self, id: SessionId) -> SessionOutcome {
        assert!(self.ctx.admission.try_admit().await.unwrap());
        self.ctx.spawn_session(id).handle.await.unwrap()
    }

    pub async fn admitted(&self) -> u64 {
        self.ctx.admission.in_use().await.unwrap()
    }
}

/// Environment templates under `tests/fixtures/templates`.
pub fn fixture_templates() -> TemplateSet {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/templates");
    TemplateSet::load_dir(&dir).unwrap()
}

/// Judge job template used by test work items.
pub fn job_template() -> serde_json::Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {"name": "placeholder"},
        "spec": {
            "backoffLimit": 0,
            "template": {"spec": {
                "restartPolicy": "Never",
                "containers": [{"name": "judge", "image": "registry.example.com/judge:latest"}]
            }}
        }
    })
}

/// A polled submission with a complete judge configuration.
pub fn work_item(solution_id: &str, task_id: &str) -> WorkItem {
    work_item_with_config(
        solution_id,
        task_id,
        json!({"jobTemplate": job_template(), "variables": {"cpu": "2"}}),
    )
}

pub fn work_item_with_config(solution_id: &str, task_id: &str, config: serde_json::Value) -> WorkItem {
    WorkItem {
        task_id: task_id.to_string(),
        solution_id: solution_id.to_string(),
        user_id: "u1".to_string(),
        contest_id: "c1".to_string(),
        problem_config: ProblemConfig {
            label: "hpc".to_string(),
            judge: ProblemConfigJudge {
                adapter: "kube".to_string(),
                config,
            },
            ..ProblemConfig::default()
        },
        solution_data_url: SOLUTION_URL.to_string(),
        solution_data_hash: "sha256:abc".to_string(),
        ..WorkItem::default()
    }
}

/// Join protocol lines into a log, one per line.
pub fn log(lines: &[&str]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub const GREET: &str = r#"{"action":"greet"}"#;
pub const PATCH_50: &str = r#"{"action":"patch","body":{"score":50,"status":"Accepted","message":"ok"}}"#;
pub const COMPLETE: &str = r#"{"action":"complete"}"#;
pub const QUIT: &str = r#"{"action":"quit"}"#;
