// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Judge session - the lifecycle of one submission task.
//!
//! ```text
//! Created -> Leasing -> Provisioning -> AwaitingReady -> Streaming -> Finalizing -> Closed
//! ```
//!
//! A session holds the lease on its work item for its whole lifetime. Any
//! error after the lease is taken is reported upstream as a failed
//! submission, and the environment is torn down either way. If the lease is
//! lost the session stops at once and leaves everything except its admission
//! slot to whichever coordinator holds the lease now.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterError, WatchEventKind, access_binding_name};
use crate::context::CoordinatorContext;
use crate::interpreter::{Directive, InterpretError, interpret};
use crate::lease::{DEFAULT_LEASE_TTL, DEFAULT_REFRESH_INTERVAL, LeaseRefresher, lease_key};
use crate::queue::TaskReporter;
use crate::running_config::{JobTemplateError, RunningConfig};
use crate::templates::TemplateError;
use crate::work_item::{SessionId, WorkItem, WorkItemError};

/// Name of the judge job inside every environment.
pub const JOB_NAME: &str = "judge";
/// Prefix of environment (namespace) names.
pub const ENVIRONMENT_PREFIX: &str = "j-";
/// How long a job may take to start.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(600);
/// Grace period given to pods when an environment is deleted.
pub const DEFAULT_NAMESPACE_GRACE: Duration = Duration::from_secs(5);

/// Environment name of a submission task.
pub fn environment_name(task_id: &str) -> String {
    format!("{}{}", ENVIRONMENT_PREFIX, task_id)
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Leasing,
    Provisioning,
    AwaitingReady,
    Streaming,
    Finalizing,
    Closed,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Another coordinator holds the lease.
    Skipped,
    /// The session could not start; the work item is left for recovery.
    Abandoned(String),
    /// The judge ran to the end of its log or quit.
    Succeeded,
    /// The session failed and the failure was reported upstream.
    Failed(String),
    /// Ownership was lost mid-session.
    LeaseLost,
}

/// Errors that abort a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    JobTemplate(#[from] JobTemplateError),

    #[error("Invalid judge config: {0}")]
    InvalidConfig(#[source] serde_json::Error),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Failed to provision {template}: {source}")]
    Provision {
        template: String,
        #[source]
        source: ClusterError,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Timed out after {0:?} waiting for the job to start")]
    ReadinessTimeout(Duration),

    #[error("Job watch closed unexpectedly")]
    WatchClosed,

    #[error("Job not running: {0}")]
    JobNotRunning(String),

    #[error("No pod found for the job")]
    NoPod,

    #[error("Failed to read job log: {0}")]
    LogStream(#[source] std::io::Error),

    #[error(transparent)]
    Interpret(#[from] InterpretError),

    #[error(transparent)]
    Store(#[from] WorkItemError),

    #[error("Lease lost")]
    LeaseLost,
}

/// Timing knobs of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub lease_ttl: Duration,
    pub refresh_interval: Duration,
    pub readiness_timeout: Duration,
    pub namespace_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            lease_ttl: DEFAULT_LEASE_TTL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            namespace_grace: DEFAULT_NAMESPACE_GRACE,
        }
    }
}

/// One submission task being judged.
pub struct JudgeSession {
    id: SessionId,
    ctx: Arc<CoordinatorContext>,
    state: SessionState,
}

impl JudgeSession {
    pub fn new(ctx: Arc<CoordinatorContext>, id: SessionId) -> Self {
        Self {
            id,
            ctx,
            state: SessionState::Created,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    /// Run the session to completion. The admission slot held for this
    /// session is released on every path.
    pub async fn run(mut self) -> SessionOutcome {
        self.transition(SessionState::Leasing);
        let key = lease_key(&self.id);
        let settings = self.ctx.settings.clone();

        match self
            .ctx
            .lease
            .acquire(&key, &self.ctx.identity, settings.lease_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(session_id = %self.id, "Session leased elsewhere, skipping");
                self.release_admission().await;
                self.transition(SessionState::Closed);
                return SessionOutcome::Skipped;
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Failed to acquire lease");
                self.release_admission().await;
                self.transition(SessionState::Closed);
                return SessionOutcome::Abandoned(e.to_string());
            }
        }

        let item = match self.ctx.work_items.load(&self.id).await {
            Ok(item) => item,
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Failed to load work item");
                self.release_lease(&key).await;
                self.release_admission().await;
                self.transition(SessionState::Closed);
                return SessionOutcome::Abandoned(e.to_string());
            }
        };

        info!(
            session_id = %self.id,
            solution_id = %item.solution_id,
            task_id = %item.task_id,
            "Session started"
        );

        let refresher = LeaseRefresher::spawn(
            self.ctx.lease.clone(),
            key.clone(),
            settings.lease_ttl,
            settings.refresh_interval,
        );
        let lost = refresher.lost_token();
        let reporter = TaskReporter::for_item(self.ctx.queue.clone(), &item);
        let environment = environment_name(&item.task_id);

        let result = tokio::select! {
            biased;

            _ = lost.cancelled() => Err(SessionError::LeaseLost),
            result = self.execute(&item, &reporter, &environment) => result,
        };
        refresher.stop().await;

        let outcome = match result {
            Ok(()) => {
                info!(session_id = %self.id, "Session finished");
                SessionOutcome::Succeeded
            }
            Err(SessionError::LeaseLost) => {
                warn!(
                    session_id = %self.id,
                    environment = %environment,
                    "Lease lost, abandoning session to its new owner"
                );
                self.release_lease(&key).await;
                self.release_admission().await;
                self.transition(SessionState::Closed);
                return SessionOutcome::LeaseLost;
            }
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Session failed");
                let reason = format!("Failed to run session: {}", e);
                if let Err(report_err) = reporter.fail(&reason).await {
                    error!(session_id = %self.id, error = %report_err, "Failed to report session failure");
                }
                SessionOutcome::Failed(reason)
            }
        };

        self.finalize(&key, &environment).await;
        outcome
    }

    async fn execute(
        &mut self,
        item: &WorkItem,
        reporter: &TaskReporter,
        environment: &str,
    ) -> Result<(), SessionError> {
        let config = RunningConfig::from_judge_config(&item.problem_config.judge.config)
            .map_err(SessionError::InvalidConfig)?;

        self.transition(SessionState::Provisioning);
        self.ensure_environment(environment, &config).await?;
        self.ensure_job(environment, &config, &item.solution_data_url)
            .await?;

        self.transition(SessionState::AwaitingReady);
        self.wait_until_started(environment).await?;

        self.transition(SessionState::Streaming);
        self.stream_log(environment, reporter).await
    }

    /// Create the environment from the templates unless it already exists.
    async fn ensure_environment(
        &self,
        environment: &str,
        config: &RunningConfig,
    ) -> Result<(), SessionError> {
        let cluster = &self.ctx.cluster;
        if cluster.namespace_exists(environment).await? {
            info!(session_id = %self.id, environment = %environment, "Reusing existing environment");
            return Ok(());
        }

        for (template, manifest) in self.ctx.templates.render_all(environment, &config.variables)? {
            debug!(session_id = %self.id, template = %template, "Submitting environment template");
            cluster
                .create(&manifest, false)
                .await
                .map_err(|source| SessionError::Provision { template, source })?;
        }

        info!(session_id = %self.id, environment = %environment, "Created environment");
        Ok(())
    }

    async fn ensure_job(
        &self,
        environment: &str,
        config: &RunningConfig,
        solution_url: &str,
    ) -> Result<(), SessionError> {
        let cluster = &self.ctx.cluster;
        if cluster.get_job(environment, JOB_NAME).await?.is_some() {
            debug!(session_id = %self.id, environment = %environment, "Job already present");
            return Ok(());
        }

        let job = config.build_job(environment, JOB_NAME, solution_url)?;
        cluster.create_job(environment, &job).await?;
        info!(session_id = %self.id, environment = %environment, job = JOB_NAME, "Created job");
        Ok(())
    }

    /// Block until the job is running or has finished.
    ///
    /// The watch is opened before the status read so a transition between
    /// the two is not missed.
    async fn wait_until_started(&self, environment: &str) -> Result<(), SessionError> {
        let cluster = &self.ctx.cluster;
        let mut events = cluster.watch_job(environment, JOB_NAME).await?;

        let status = cluster
            .get_job(environment, JOB_NAME)
            .await?
            .ok_or_else(|| SessionError::JobNotRunning("job disappeared".to_string()))?;
        if status.is_started() {
            info!(session_id = %self.id, environment = %environment, "Job running");
            return Ok(());
        }
        info!(session_id = %self.id, environment = %environment, "Job not ready yet");

        let timeout = self.ctx.settings.readiness_timeout;
        let wait = async {
            loop {
                let Some(event) = events.recv().await else {
                    return Err(SessionError::WatchClosed);
                };
                match event.kind {
                    WatchEventKind::Bookmark => continue,
                    WatchEventKind::Error => {
                        return Err(SessionError::JobNotRunning(
                            "job watch reported an error".to_string(),
                        ));
                    }
                    kind => {
                        let status = event.status.unwrap_or_default();
                        if status.is_started() {
                            return Ok(());
                        }
                        if kind == WatchEventKind::Deleted {
                            return Err(SessionError::JobNotRunning(format!(
                                "job deleted with status {:?}",
                                status
                            )));
                        }
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SessionError::ReadinessTimeout(timeout))??;
        info!(session_id = %self.id, environment = %environment, "Job running");
        Ok(())
    }

    /// Follow the judge log from the watermark and apply each line.
    async fn stream_log(
        &self,
        environment: &str,
        reporter: &TaskReporter,
    ) -> Result<(), SessionError> {
        let work_items = &self.ctx.work_items;
        let since = work_items.watermark(&self.id).await?;

        let pod = self
            .ctx
            .cluster
            .list_job_pods(environment, JOB_NAME)
            .await?
            .into_iter()
            .next()
            .ok_or(SessionError::NoPod)?;
        debug!(session_id = %self.id, pod = %pod, since = ?since, "Streaming job log");

        let log = self
            .ctx
            .cluster
            .stream_pod_log(environment, &pod, true, since)
            .await?;
        let mut lines = log.lines();
        let mut completed = false;

        while let Some(line) = lines.next_line().await.map_err(SessionError::LogStream)? {
            if line.trim().is_empty() {
                continue;
            }

            let directive = interpret(&line, reporter, environment).await?;
            work_items.set_watermark(&self.id, Utc::now()).await?;

            match directive {
                Directive::Continue => {}
                Directive::Completed => completed = true,
                Directive::Quit => {
                    info!(session_id = %self.id, environment = %environment, "Judge quit");
                    break;
                }
            }
        }

        // A judge may exit without reporting completion. A replay from an
        // older watermark still repeats an explicit complete upstream.
        if !completed && let Err(e) = reporter.complete().await {
            warn!(session_id = %self.id, error = %e, "Failed to complete submission");
        }
        Ok(())
    }

    /// Tear down and release everything the session holds. Failures are
    /// logged and never stop the remaining steps.
    async fn finalize(&mut self, key: &str, environment: &str) {
        self.transition(SessionState::Finalizing);
        let ctx = &self.ctx;

        if let Err(e) = ctx
            .cluster
            .delete_namespace(environment, ctx.settings.namespace_grace)
            .await
        {
            warn!(session_id = %self.id, environment = %environment, error = %e, "Failed to delete environment");
        }
        let binding = access_binding_name(environment);
        if let Err(e) = ctx.cluster.delete_access_binding(&binding).await {
            warn!(session_id = %self.id, binding = %binding, error = %e, "Failed to delete access binding");
        }

        if let Err(e) = ctx.work_items.delete_watermark(&self.id).await {
            warn!(session_id = %self.id, error = %e, "Failed to delete watermark");
        }
        if let Err(e) = ctx.work_items.delete(&self.id).await {
            warn!(session_id = %self.id, error = %e, "Failed to delete work item");
        }

        self.release_lease(key).await;
        self.release_admission().await;
        self.transition(SessionState::Closed);
    }

    async fn release_lease(&self, key: &str) {
        if let Err(e) = self.ctx.lease.release(key, &self.ctx.identity).await {
            warn!(session_id = %self.id, error = %e, "Failed to release lease");
        }
    }

    async fn release_admission(&self) {
        if let Err(e) = self.ctx.admission.release().await {
            warn!(session_id = %self.id, error = %e, "Failed to release admission");
        }
    }
}
