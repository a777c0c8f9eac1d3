// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request and response types of the runner API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Judge section of a problem configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemConfigJudge {
    /// Adapter name chosen by the problem author.
    #[serde(default)]
    pub adapter: String,
    /// Adapter-specific payload, interpreted by the coordinator.
    #[serde(default)]
    pub config: Value,
}

/// Problem configuration attached to a polled submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemConfig {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub solution: Value,
    #[serde(default)]
    pub judge: ProblemConfigJudge,
    #[serde(default)]
    pub submit: Value,
}

/// A submission task handed out by `poll`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionPoll {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub solution_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub contest_id: String,
    #[serde(default)]
    pub problem_config: ProblemConfig,
    #[serde(default)]
    pub problem_data_url: String,
    #[serde(default)]
    pub problem_data_hash: String,
    #[serde(default)]
    pub solution_data_url: String,
    #[serde(default)]
    pub solution_data_hash: String,
    #[serde(default)]
    pub err_msg: String,
}

impl SolutionPoll {
    /// An empty poll answer carries no solution or task id.
    pub fn is_empty(&self) -> bool {
        self.solution_id.is_empty() || self.task_id.is_empty()
    }
}

/// Body of `POST /api/runner/register`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub labels: Vec<String>,
    pub version: String,
    pub registration_token: String,
}

/// Credentials returned by `register`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub runner_id: String,
    pub runner_key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UrlResponse {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_poll() {
        let poll: SolutionPoll = serde_json::from_str("{}").unwrap();
        assert!(poll.is_empty());
    }

    #[test]
    fn test_poll_keeps_judge_config_opaque() {
        let poll: SolutionPoll = serde_json::from_value(serde_json::json!({
            "taskId": "t1",
            "solutionId": "s1",
            "problemConfig": {
                "label": "hpc",
                "judge": {"adapter": "k8s", "config": {"jobTemplate": {"kind": "Job"}}}
            },
            "solutionDataUrl": "https://oss/s1"
        }))
        .unwrap();

        assert!(!poll.is_empty());
        assert_eq!(poll.problem_config.judge.adapter, "k8s");
        assert_eq!(poll.problem_config.judge.config["jobTemplate"]["kind"], "Job");
        assert_eq!(poll.solution_data_url, "https://oss/s1");
    }
}
