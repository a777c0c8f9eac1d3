// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the upstream client.

use std::time::Duration;

use crate::error::{Result, UpstreamError};

const DEFAULT_ENDPOINT: &str = "https://hpcgame.pku.edu.cn";

/// Runner credentials issued by `register`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCredentials {
    pub runner_id: String,
    pub runner_key: String,
}

/// Configuration for the [`UpstreamClient`](crate::UpstreamClient).
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the contest platform.
    pub endpoint: String,
    /// Runner identity; required for everything except `register`.
    pub credentials: Option<RunnerCredentials>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            credentials: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl UpstreamConfig {
    /// Create a configuration pointing at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `JUDGER_ENDPOINT` (or `ENDPOINT`): platform base URL (default: "https://hpcgame.pku.edu.cn")
    /// - `RUNNER_ID` / `RUNNER_KEY`: runner credentials, both or neither
    /// - `JUDGER_REQUEST_TIMEOUT_MS`: request timeout in milliseconds (default: 30000)
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("JUDGER_ENDPOINT")
            .or_else(|_| std::env::var("ENDPOINT"))
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let runner_id = std::env::var("RUNNER_ID").ok().filter(|v| !v.is_empty());
        let runner_key = std::env::var("RUNNER_KEY").ok().filter(|v| !v.is_empty());
        let credentials = match (runner_id, runner_key) {
            (Some(runner_id), Some(runner_key)) => Some(RunnerCredentials {
                runner_id,
                runner_key,
            }),
            (None, None) => None,
            _ => {
                return Err(UpstreamError::Config(
                    "RUNNER_ID and RUNNER_KEY must be set together".to_string(),
                ));
            }
        };

        let request_timeout_ms: u64 = std::env::var("JUDGER_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .map_err(|e| UpstreamError::Config(format!("invalid JUDGER_REQUEST_TIMEOUT_MS: {}", e)))?;

        Ok(Self {
            endpoint,
            credentials,
            request_timeout: Duration::from_millis(request_timeout_ms),
        })
    }

    /// Set the runner credentials.
    pub fn with_credentials(
        mut self,
        runner_id: impl Into<String>,
        runner_key: impl Into<String>,
    ) -> Self {
        self.credentials = Some(RunnerCredentials {
            runner_id: runner_id.into(),
            runner_key: runner_key.into(),
        });
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
