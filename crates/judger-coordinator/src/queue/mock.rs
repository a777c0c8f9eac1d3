// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock work queue for testing.

use std::collections::VecDeque;

use async_trait::async_trait;
use judger_protocol::{SolutionDetails, SolutionInfo};
use tokio::sync::Mutex;

use super::{QueueError, Result, WorkQueue};
use crate::work_item::WorkItem;

/// An outcome call received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueCall {
    Patch {
        solution_id: String,
        task_id: String,
        info: SolutionInfo,
    },
    SaveDetails {
        solution_id: String,
        task_id: String,
        details: SolutionDetails,
    },
    Complete {
        solution_id: String,
        task_id: String,
    },
}

/// In-memory [`WorkQueue`] handing out pre-loaded items.
pub struct MockQueue {
    items: Mutex<VecDeque<WorkItem>>,
    calls: Mutex<Vec<QueueCall>>,
    polls: Mutex<usize>,
    fail_polls: bool,
    fail_patches: bool,
    fail_uploads: bool,
}

impl Default for MockQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MockQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            polls: Mutex::new(0),
            fail_polls: false,
            fail_patches: false,
            fail_uploads: false,
        }
    }

    /// Every poll fails.
    pub fn failing_polls(mut self) -> Self {
        self.fail_polls = true;
        self
    }

    /// Every patch fails.
    pub fn failing_patches(mut self) -> Self {
        self.fail_patches = true;
        self
    }

    /// Every detail upload fails.
    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    /// Queue an item for the next poll.
    pub async fn push(&self, item: WorkItem) {
        self.items.lock().await.push_back(item);
    }

    /// Number of polls served.
    pub async fn poll_count(&self) -> usize {
        *self.polls.lock().await
    }

    pub async fn calls(&self) -> Vec<QueueCall> {
        self.calls.lock().await.clone()
    }

    /// Calls concerning one task.
    pub async fn calls_for(&self, solution: &str, task: &str) -> Vec<QueueCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| {
                let (s, t) = match call {
                    QueueCall::Patch { solution_id, task_id, .. }
                    | QueueCall::SaveDetails { solution_id, task_id, .. }
                    | QueueCall::Complete { solution_id, task_id } => (solution_id, task_id),
                };
                s == solution && t == task
            })
            .cloned()
            .collect()
    }

    /// Patches received for one task.
    pub async fn patches(&self, solution: &str, task: &str) -> Vec<SolutionInfo> {
        self.calls_for(solution, task)
            .await
            .into_iter()
            .filter_map(|call| match call {
                QueueCall::Patch { info, .. } => Some(info),
                _ => None,
            })
            .collect()
    }

    /// Number of completions received for one task.
    pub async fn completions(&self, solution: &str, task: &str) -> usize {
        self.calls_for(solution, task)
            .await
            .iter()
            .filter(|call| matches!(call, QueueCall::Complete { .. }))
            .count()
    }

    async fn record(&self, call: QueueCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl WorkQueue for MockQueue {
    async fn poll(&self) -> Result<Option<WorkItem>> {
        *self.polls.lock().await += 1;
        if self.fail_polls {
            return Err(QueueError::Unavailable("mock poll failure".to_string()));
        }
        Ok(self.items.lock().await.pop_front())
    }

    async fn patch(&self, solution_id: &str, task_id: &str, info: &SolutionInfo) -> Result<()> {
        self.record(QueueCall::Patch {
            solution_id: solution_id.to_string(),
            task_id: task_id.to_string(),
            info: info.clone(),
        })
        .await;
        if self.fail_patches {
            return Err(QueueError::Unavailable("mock patch failure".to_string()));
        }
        Ok(())
    }

    async fn save_details(
        &self,
        solution_id: &str,
        task_id: &str,
        details: &SolutionDetails,
    ) -> Result<()> {
        self.record(QueueCall::SaveDetails {
            solution_id: solution_id.to_string(),
            task_id: task_id.to_string(),
            details: details.clone(),
        })
        .await;
        if self.fail_uploads {
            return Err(QueueError::Unavailable("mock upload failure".to_string()));
        }
        Ok(())
    }

    async fn complete(&self, solution_id: &str, task_id: &str) -> Result<()> {
        self.record(QueueCall::Complete {
            solution_id: solution_id.to_string(),
            task_id: task_id.to_string(),
        })
        .await;
        Ok(())
    }
}
