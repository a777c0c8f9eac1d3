// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Result model shared by the protocol and the contest platform API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Well-known submission status strings understood by the contest platform.
pub mod status {
    /// Judging infrastructure failed.
    pub const ERROR: &str = "Error";
    /// Generic success.
    pub const SUCCESS: &str = "Success";
    /// Solution accepted.
    pub const ACCEPTED: &str = "Accepted";
    /// Output did not match.
    pub const WRONG_ANSWER: &str = "Wrong Answer";
    /// Ran out of time.
    pub const TIME_LIMIT_EXCEEDED: &str = "Time Limit Exceeded";
    /// Ran out of memory.
    pub const MEMORY_LIMIT_EXCEEDED: &str = "Memory Limit Exceeded";
    /// Crashed at runtime.
    pub const RUNTIME_ERROR: &str = "Runtime Error";
    /// Failed to build.
    pub const COMPILE_ERROR: &str = "Compile Error";
    /// Judge-side bug.
    pub const INTERNAL_ERROR: &str = "Internal Error";
}

/// Score/status patch applied to a submission task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionInfo {
    /// Score awarded so far.
    pub score: f64,
    /// Optional named metrics (e.g. runtime, speedup).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<HashMap<String, f64>>,
    /// Status string, see [`status`].
    pub status: String,
    /// User-visible message.
    pub message: String,
}

impl SolutionInfo {
    /// A zero-score [`status::ERROR`] patch carrying `reason` as its message.
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            metrics: None,
            status: status::ERROR.to_string(),
            message: reason.into(),
        }
    }
}

/// One test case inside a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionDetailsTest {
    pub name: String,
    pub score: f64,
    pub score_scale: f64,
    pub status: String,
    #[serde(default)]
    pub summary: String,
}

/// One judged job (a group of tests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionDetailsJob {
    pub name: String,
    pub score: f64,
    pub score_scale: f64,
    pub status: String,
    #[serde(default)]
    pub tests: Vec<SolutionDetailsTest>,
    #[serde(default)]
    pub summary: String,
}

/// Full result breakdown uploaded once per submission task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionDetails {
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub jobs: Vec<SolutionDetailsJob>,
    #[serde(default)]
    pub summary: String,
}

impl SolutionDetails {
    /// Details with no jobs and only a summary line.
    pub fn summary_only(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }
}
