// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the contest platform's runner API.

use judger_protocol::{SolutionDetails, SolutionInfo};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::config::UpstreamConfig;
use crate::error::{Result, UpstreamError};
use crate::types::{RegisterRequest, RegisterResponse, SolutionPoll, UrlResponse};

const RUNNER_ID_HEADER: &str = "X-AOI-Runner-Id";
const RUNNER_KEY_HEADER: &str = "X-AOI-Runner-Key";

/// Client for the runner endpoints of the contest platform.
///
/// Authenticated with the runner id/key pair from [`UpstreamConfig`]. Result
/// detail blobs are uploaded through a second, unauthenticated client because
/// the one-time upload URL points at object storage, not at the platform.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    api: Client,
    storage: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Create a new client with the given configuration.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(creds) = &config.credentials {
            headers.insert(RUNNER_ID_HEADER, header_value(&creds.runner_id)?);
            headers.insert(RUNNER_KEY_HEADER, header_value(&creds.runner_key)?);
        }

        let api = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;
        let storage = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            api,
            storage,
            config,
        })
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(UpstreamConfig::from_env()?)
    }

    /// Get the client configuration.
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Ask the platform for the next submission task.
    ///
    /// Returns `None` when the platform has nothing queued.
    #[instrument(skip(self))]
    pub async fn poll(&self) -> Result<Option<SolutionPoll>> {
        let request = self
            .request(Method::POST, "/api/runner/solution/poll")
            .json(&serde_json::json!({}));
        let poll: SolutionPoll = decode(send(request).await?).await?;

        if poll.is_empty() {
            debug!("No submission queued");
            return Ok(None);
        }
        Ok(Some(poll))
    }

    /// Report partial status for a task.
    #[instrument(skip(self, info), fields(score = info.score, status = %info.status))]
    pub async fn patch(&self, solution_id: &str, task_id: &str, info: &SolutionInfo) -> Result<()> {
        let path = task_path(solution_id, task_id, "");
        send(self.request(Method::PATCH, &path).json(info)).await?;
        Ok(())
    }

    /// Upload the full result breakdown of a task.
    #[instrument(skip(self, details), fields(jobs = details.jobs.len()))]
    pub async fn save_details(
        &self,
        solution_id: &str,
        task_id: &str,
        details: &SolutionDetails,
    ) -> Result<()> {
        let path = task_path(solution_id, task_id, "/details/upload");
        let upload: UrlResponse = decode(send(self.request(Method::GET, &path)).await?).await?;

        let blob = serde_json::to_vec(details)?;
        send(self.storage.put(&upload.url).body(blob)).await?;
        debug!("Uploaded result details");
        Ok(())
    }

    /// Mark a task as finished.
    #[instrument(skip(self))]
    pub async fn complete(&self, solution_id: &str, task_id: &str) -> Result<()> {
        let path = task_path(solution_id, task_id, "/complete");
        send(self.request(Method::POST, &path)).await?;
        Ok(())
    }

    /// Register this runner with a one-time registration token.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        let request = self
            .request(Method::POST, "/api/runner/register")
            .json(request);
        decode(send(request).await?).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.config.endpoint.trim_end_matches('/'), path);
        self.api.request(method, url)
    }
}

fn task_path(solution_id: &str, task_id: &str, suffix: &str) -> String {
    format!("/api/runner/solution/task/{}/{}{}", solution_id, task_id, suffix)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| UpstreamError::Config(format!("invalid header value: {}", e)))
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(UpstreamError::Server {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_path() {
        assert_eq!(
            task_path("s1", "t1", "/complete"),
            "/api/runner/solution/task/s1/t1/complete"
        );
        assert_eq!(task_path("s1", "t1", ""), "/api/runner/solution/task/s1/t1");
    }

    #[test]
    fn test_rejects_unprintable_credentials() {
        let config = UpstreamConfig::new("http://localhost").with_credentials("id", "bad\nkey");
        assert!(matches!(
            UpstreamClient::new(config),
            Err(UpstreamError::Config(_))
        ));
    }
}
