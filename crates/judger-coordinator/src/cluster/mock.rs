// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock cluster for testing.
//!
//! Keeps namespaces, jobs and pod logs in memory and records every call so
//! tests can assert on what a session did to the cluster.

use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncRead, BufReader, DuplexStream, ReadBuf};
use tokio::sync::{Mutex, mpsc};

use super::traits::*;

const LOG_PIPE_CAPACITY: usize = 64 * 1024;

/// A call observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterCall {
    Submit {
        verb: ResourceVerb,
        document: String,
    },
    DeleteNamespace(String),
    DeleteBinding(String),
    CreateJob {
        namespace: String,
        job: Value,
    },
    WatchJob {
        namespace: String,
        name: String,
    },
    StreamLog {
        namespace: String,
        pod: String,
        follow: bool,
        since: Option<DateTime<Utc>>,
    },
}

#[derive(Default)]
struct MockState {
    namespaces: HashSet<String>,
    jobs: HashMap<(String, String), JobStatus>,
    watchers: Vec<((String, String), mpsc::Sender<JobEvent>)>,
    logs: HashMap<String, String>,
    live_logs: HashMap<String, DuplexStream>,
    calls: Vec<ClusterCall>,
}

/// In-memory [`ClusterDriver`].
pub struct MockCluster {
    state: Mutex<MockState>,
    /// Status a job gets when created. Defaults to one ready replica.
    pub initial_job_status: JobStatus,
    /// Close watch channels as soon as they are opened.
    pub close_watches: bool,
    /// Documents containing this text fail to submit.
    pub fail_documents_containing: Option<String>,
    /// Namespace deletion fails.
    pub fail_namespace_delete: bool,
    /// Log streams fail on first read with this message.
    pub fail_log_stream: Option<String>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            initial_job_status: JobStatus {
                active: 1,
                ready: Some(1),
                ..JobStatus::default()
            },
            close_watches: false,
            fail_documents_containing: None,
            fail_namespace_delete: false,
            fail_log_stream: None,
        }
    }

    /// A cluster whose jobs never become ready on their own.
    pub fn never_ready() -> Self {
        Self {
            initial_job_status: JobStatus::default(),
            ..Self::new()
        }
    }

    /// Reject every document containing `needle`.
    pub fn failing_documents(mut self, needle: impl Into<String>) -> Self {
        self.fail_documents_containing = Some(needle.into());
        self
    }

    /// Fail namespace deletion.
    pub fn failing_namespace_delete(mut self) -> Self {
        self.fail_namespace_delete = true;
        self
    }

    /// Break every log stream, as a failed log process would.
    pub fn failing_log_stream(mut self, message: impl Into<String>) -> Self {
        self.fail_log_stream = Some(message.into());
        self
    }

    /// Close job watches immediately.
    pub fn closing_watches(mut self) -> Self {
        self.close_watches = true;
        self
    }

    /// Pre-create a namespace, as left behind by a crashed coordinator.
    pub async fn add_namespace(&self, namespace: &str) {
        self.state.lock().await.namespaces.insert(namespace.to_string());
    }

    /// Pre-create a job with the given status.
    pub async fn add_job(&self, namespace: &str, name: &str, status: JobStatus) {
        self.state
            .lock()
            .await
            .jobs
            .insert((namespace.to_string(), name.to_string()), status);
    }

    /// Set the complete log of the pod in `namespace`. Streams end after it.
    pub async fn set_log(&self, namespace: &str, log: impl Into<String>) {
        self.state
            .lock()
            .await
            .logs
            .insert(namespace.to_string(), log.into());
    }

    /// Attach a live log to the pod in `namespace`.
    ///
    /// Lines written to the returned handle reach the next log stream opened
    /// for that namespace; the stream ends when the handle is dropped.
    pub async fn attach_live_log(&self, namespace: &str) -> DuplexStream {
        let (writer, reader) = tokio::io::duplex(LOG_PIPE_CAPACITY);
        self.state
            .lock()
            .await
            .live_logs
            .insert(namespace.to_string(), reader);
        writer
    }

    /// Update a job's status and notify its watchers.
    pub async fn push_job_event(&self, namespace: &str, name: &str, kind: WatchEventKind, status: JobStatus) {
        let key = (namespace.to_string(), name.to_string());
        let senders: Vec<_> = {
            let mut state = self.state.lock().await;
            state.jobs.insert(key.clone(), status);
            state.watchers.retain(|(_, tx)| !tx.is_closed());
            state
                .watchers
                .iter()
                .filter(|(watched, _)| *watched == key)
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in senders {
            let _ = tx
                .send(JobEvent {
                    kind,
                    status: Some(status),
                })
                .await;
        }
    }

    /// All recorded calls, oldest first.
    pub async fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn namespace_present(&self, namespace: &str) -> bool {
        self.state.lock().await.namespaces.contains(namespace)
    }

    /// Namespaces deleted so far, in order.
    pub async fn deleted_namespaces(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                ClusterCall::DeleteNamespace(ns) => Some(ns.clone()),
                _ => None,
            })
            .collect()
    }

    /// Jobs created so far, as submitted.
    pub async fn created_jobs(&self) -> Vec<Value> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                ClusterCall::CreateJob { job, .. } => Some(job.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Name of the namespace a `kind: Namespace` YAML document declares.
fn declared_namespace(document: &str) -> Option<String> {
    let mut lines = document.lines().map(str::trim);
    if !lines.clone().any(|line| line == "kind: Namespace") {
        return None;
    }
    lines
        .find_map(|line| line.strip_prefix("name:"))
        .map(|name| name.trim().trim_matches('"').to_string())
}

#[async_trait]
impl ClusterDriver for MockCluster {
    fn driver_type(&self) -> &'static str {
        "mock"
    }

    async fn submit_document(&self, verb: ResourceVerb, document: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(ClusterCall::Submit {
            verb,
            document: document.to_string(),
        });

        if let Some(needle) = &self.fail_documents_containing
            && document.contains(needle.as_str())
        {
            return Err(ClusterError::CommandFailed {
                command: format!("mock {}", verb.as_str()),
                stderr: format!("rejected document containing {}", needle),
            });
        }

        if let Some(namespace) = declared_namespace(document) {
            match verb {
                ResourceVerb::Delete => {
                    state.namespaces.remove(&namespace);
                }
                _ => {
                    state.namespaces.insert(namespace);
                }
            }
        }
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(self.state.lock().await.namespaces.contains(namespace))
    }

    async fn delete_namespace(&self, namespace: &str, _grace: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(ClusterCall::DeleteNamespace(namespace.to_string()));
        if self.fail_namespace_delete {
            return Err(ClusterError::CommandFailed {
                command: "mock delete namespace".to_string(),
                stderr: "forbidden".to_string(),
            });
        }
        state.namespaces.remove(namespace);
        state.jobs.retain(|(ns, _), _| ns != namespace);
        Ok(())
    }

    async fn delete_access_binding(&self, name: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .calls
            .push(ClusterCall::DeleteBinding(name.to_string()));
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<JobStatus>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .get(&(namespace.to_string(), name.to_string()))
            .copied())
    }

    async fn create_job(&self, namespace: &str, job: &Value) -> Result<()> {
        let name = job
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| ClusterError::InvalidManifest("job has no name".to_string()))?
            .to_string();

        let mut state = self.state.lock().await;
        state.calls.push(ClusterCall::CreateJob {
            namespace: namespace.to_string(),
            job: job.clone(),
        });
        state
            .jobs
            .insert((namespace.to_string(), name), self.initial_job_status);
        Ok(())
    }

    async fn watch_job(&self, namespace: &str, name: &str) -> Result<mpsc::Receiver<JobEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let mut state = self.state.lock().await;
        state.calls.push(ClusterCall::WatchJob {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        if !self.close_watches {
            state
                .watchers
                .push(((namespace.to_string(), name.to_string()), tx));
        }
        Ok(rx)
    }

    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        if state
            .jobs
            .contains_key(&(namespace.to_string(), job_name.to_string()))
        {
            Ok(vec![format!("{}-0", job_name)])
        } else {
            Ok(Vec::new())
        }
    }

    async fn stream_pod_log(
        &self,
        namespace: &str,
        pod: &str,
        follow: bool,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogStream> {
        let mut state = self.state.lock().await;
        state.calls.push(ClusterCall::StreamLog {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            follow,
            since,
        });

        if let Some(message) = &self.fail_log_stream {
            return Ok(Box::new(BrokenLog(message.clone())));
        }
        if let Some(live) = state.live_logs.remove(namespace) {
            return Ok(Box::new(BufReader::new(live)));
        }
        let log = state.logs.get(namespace).cloned().unwrap_or_default();
        Ok(Box::new(Cursor::new(log.into_bytes())))
    }
}

/// Log stream whose every read fails.
struct BrokenLog(String);

impl AsyncRead for BrokenLog {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other(self.0.clone())))
    }
}

impl AsyncBufRead for BrokenLog {
    fn poll_fill_buf(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        Poll::Ready(Err(io::Error::other(self.0.clone())))
    }

    fn consume(self: Pin<&mut Self>, _amt: usize) {}
}
