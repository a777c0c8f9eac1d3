// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster driver trait definitions.
//!
//! Defines the abstract interface the coordinator uses to provision
//! execution environments, run the judge job and read its logs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;

/// Errors from cluster operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The named resource does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A cluster command exited unsuccessfully.
    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed {
        /// Command line that failed.
        command: String,
        /// Standard error output.
        stderr: String,
    },

    /// A manifest document could not be submitted as given.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// Several documents of a multi-document manifest failed.
    #[error("{} documents failed: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<ClusterError>),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn join_errors(errors: &[ClusterError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// What to do with a manifest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceVerb {
    Create,
    Apply,
    Update,
    Delete,
}

impl ResourceVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceVerb::Create => "create",
            ResourceVerb::Apply => "apply",
            ResourceVerb::Update => "update",
            ResourceVerb::Delete => "delete",
        }
    }
}

/// Split a multi-document manifest on `\n---`, dropping blank documents.
pub fn split_documents(manifest: &str) -> Vec<&str> {
    manifest
        .split("\n---")
        .filter(|doc| !doc.trim().is_empty())
        .collect()
}

/// Name of the cluster-wide access binding created alongside an environment.
pub fn access_binding_name(environment: &str) -> String {
    format!("{}-judge-binding", environment)
}

/// Replica counters of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub active: i32,
    #[serde(default)]
    pub ready: Option<i32>,
    #[serde(default)]
    pub succeeded: i32,
    #[serde(default)]
    pub failed: i32,
    #[serde(default)]
    pub terminating: Option<i32>,
}

impl JobStatus {
    /// Whether the job has a ready replica or has already produced pods
    /// that ran (ready, finished or terminating).
    pub fn is_started(&self) -> bool {
        let ready = self.ready.unwrap_or(0);
        let terminating = self.terminating.unwrap_or(0);

        (self.active > 0 && ready > 0)
            || self.succeeded > 0
            || self.failed > 0
            || ready + self.succeeded + self.failed + terminating > 0
    }
}

/// Kind of a watch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

impl WatchEventKind {
    /// Parse the `type` field of a Kubernetes watch event.
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "ADDED" => WatchEventKind::Added,
            "MODIFIED" => WatchEventKind::Modified,
            "DELETED" => WatchEventKind::Deleted,
            "BOOKMARK" => WatchEventKind::Bookmark,
            _ => WatchEventKind::Error,
        }
    }
}

/// One observed change of a watched job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub kind: WatchEventKind,
    /// Job status carried by the event, absent for error events.
    pub status: Option<JobStatus>,
}

/// Readable log of a pod, line-oriented.
pub type LogStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// Trait for cluster drivers.
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Driver name, for logging.
    fn driver_type(&self) -> &'static str;

    /// Submit a single manifest document.
    async fn submit_document(&self, verb: ResourceVerb, document: &str) -> Result<()>;

    /// Submit every document of a manifest in order.
    ///
    /// Stops at the first failure unless `continue_on_failure` is set, in
    /// which case all documents are attempted and the failures aggregated.
    async fn submit(
        &self,
        verb: ResourceVerb,
        manifest: &str,
        continue_on_failure: bool,
    ) -> Result<()> {
        let mut errors = Vec::new();
        for document in split_documents(manifest) {
            if let Err(e) = self.submit_document(verb, document).await {
                if !continue_on_failure {
                    return Err(e);
                }
                errors.push(e);
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ClusterError::Multiple(errors)),
        }
    }

    async fn create(&self, manifest: &str, continue_on_failure: bool) -> Result<()> {
        self.submit(ResourceVerb::Create, manifest, continue_on_failure)
            .await
    }

    async fn apply(&self, manifest: &str, continue_on_failure: bool) -> Result<()> {
        self.submit(ResourceVerb::Apply, manifest, continue_on_failure)
            .await
    }

    async fn update(&self, manifest: &str, continue_on_failure: bool) -> Result<()> {
        self.submit(ResourceVerb::Update, manifest, continue_on_failure)
            .await
    }

    async fn delete(&self, manifest: &str, continue_on_failure: bool) -> Result<()> {
        self.submit(ResourceVerb::Delete, manifest, continue_on_failure)
            .await
    }

    /// Whether an environment (namespace) exists.
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    /// Delete an environment, giving its pods `grace` to stop.
    async fn delete_namespace(&self, namespace: &str, grace: Duration) -> Result<()>;

    /// Delete a cluster-wide access binding. A missing binding is not an error.
    async fn delete_access_binding(&self, name: &str) -> Result<()>;

    /// Status of a job, or `None` if it does not exist.
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<JobStatus>>;

    /// Create a job from a JSON manifest.
    async fn create_job(&self, namespace: &str, job: &Value) -> Result<()>;

    /// Watch a single job by name. The channel closes when the watch ends.
    async fn watch_job(&self, namespace: &str, name: &str) -> Result<mpsc::Receiver<JobEvent>>;

    /// Names of the pods belonging to a job.
    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<String>>;

    /// Open a pod's log, optionally following it and skipping entries before `since`.
    async fn stream_pod_log(
        &self,
        namespace: &str,
        pod: &str,
        follow: bool,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogStream>;
}
