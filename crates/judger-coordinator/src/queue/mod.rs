// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work queue - where submissions come from and where outcomes go.

pub mod mock;

use async_trait::async_trait;
use judger_protocol::{SolutionDetails, SolutionInfo};
use judger_upstream::{UpstreamClient, UpstreamError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::work_item::WorkItem;

pub use mock::{MockQueue, QueueCall};

/// Errors from the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The contest platform rejected or failed the request.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The queue cannot be reached.
    #[error("Work queue unavailable: {0}")]
    Unavailable(String),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Source of submissions and sink of their outcomes.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Next queued submission, if any.
    async fn poll(&self) -> Result<Option<WorkItem>>;

    /// Report partial status.
    async fn patch(&self, solution_id: &str, task_id: &str, info: &SolutionInfo) -> Result<()>;

    /// Upload the result breakdown.
    async fn save_details(
        &self,
        solution_id: &str,
        task_id: &str,
        details: &SolutionDetails,
    ) -> Result<()>;

    /// Mark the task finished. Safe to call more than once.
    async fn complete(&self, solution_id: &str, task_id: &str) -> Result<()>;
}

#[async_trait]
impl WorkQueue for UpstreamClient {
    async fn poll(&self) -> Result<Option<WorkItem>> {
        Ok(UpstreamClient::poll(self).await?)
    }

    async fn patch(&self, solution_id: &str, task_id: &str, info: &SolutionInfo) -> Result<()> {
        Ok(UpstreamClient::patch(self, solution_id, task_id, info).await?)
    }

    async fn save_details(
        &self,
        solution_id: &str,
        task_id: &str,
        details: &SolutionDetails,
    ) -> Result<()> {
        Ok(UpstreamClient::save_details(self, solution_id, task_id, details).await?)
    }

    async fn complete(&self, solution_id: &str, task_id: &str) -> Result<()> {
        Ok(UpstreamClient::complete(self, solution_id, task_id).await?)
    }
}

/// Queue handle bound to one submission task.
#[derive(Clone)]
pub struct TaskReporter {
    queue: Arc<dyn WorkQueue>,
    solution_id: String,
    task_id: String,
}

impl TaskReporter {
    pub fn new(queue: Arc<dyn WorkQueue>, solution_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            queue,
            solution_id: solution_id.into(),
            task_id: task_id.into(),
        }
    }

    /// Reporter for a polled work item.
    pub fn for_item(queue: Arc<dyn WorkQueue>, item: &WorkItem) -> Self {
        Self::new(queue, item.solution_id.clone(), item.task_id.clone())
    }

    pub fn solution_id(&self) -> &str {
        &self.solution_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn patch(&self, info: &SolutionInfo) -> Result<()> {
        self.queue
            .patch(&self.solution_id, &self.task_id, info)
            .await
    }

    pub async fn save_details(&self, details: &SolutionDetails) -> Result<()> {
        self.queue
            .save_details(&self.solution_id, &self.task_id, details)
            .await
    }

    pub async fn complete(&self) -> Result<()> {
        self.queue.complete(&self.solution_id, &self.task_id).await
    }

    /// Report a terminal failure: an error patch, a summary-only detail
    /// upload and completion.
    ///
    /// A failed patch is only logged; the upload and completion still run.
    pub async fn fail(&self, reason: &str) -> Result<()> {
        info!(
            solution_id = %self.solution_id,
            task_id = %self.task_id,
            reason = %reason,
            "Reporting failed submission"
        );

        if let Err(e) = self.patch(&SolutionInfo::error(reason)).await {
            error!(
                solution_id = %self.solution_id,
                task_id = %self.task_id,
                error = %e,
                "Failed to patch failed submission"
            );
        }

        self.save_details(&SolutionDetails::summary_only(reason))
            .await?;
        self.complete().await
    }
}
