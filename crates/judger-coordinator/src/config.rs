// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for judger-coordinator.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use judger_upstream::UpstreamConfig;

/// Coordinator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis URL of the shared store
    pub redis_url: String,
    /// Contest platform base URL
    pub endpoint: String,
    pub runner_id: String,
    pub runner_key: String,
    /// Fleet-wide cap on concurrently running sessions
    pub rate_limit: u64,
    /// Directory holding the environment manifest templates
    pub template_path: PathBuf,
    /// kubectl binary
    pub kubectl: String,
    /// Explicit kubeconfig, in-cluster config when unset
    pub kubeconfig: Option<PathBuf>,
    pub poll_interval: Duration,
    pub recovery_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let runner_id = var("RUNNER_ID").ok_or(ConfigError::MissingEnvVar("RUNNER_ID"))?;
        let runner_key = var("RUNNER_KEY").ok_or(ConfigError::MissingEnvVar("RUNNER_KEY"))?;

        let redis_url =
            var("JUDGER_REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1/".to_string());
        let endpoint = var("JUDGER_ENDPOINT")
            .or_else(|| var("ENDPOINT"))
            .unwrap_or_else(|| UpstreamConfig::default().endpoint);

        let rate_limit = parse_or(&var, "JUDGER_RATE_LIMIT", 64u64)?;
        let poll_interval_ms = parse_or(&var, "JUDGER_POLL_INTERVAL_MS", 250u64)?;
        let recovery_interval_secs = parse_or(&var, "JUDGER_RECOVERY_INTERVAL_SECS", 480u64)?;

        Ok(Self {
            redis_url,
            endpoint,
            runner_id,
            runner_key,
            rate_limit,
            template_path: PathBuf::from(
                var("JUDGER_TEMPLATE_PATH").unwrap_or_else(|| "/templates".to_string()),
            ),
            kubectl: var("JUDGER_KUBECTL").unwrap_or_else(|| "kubectl".to_string()),
            kubeconfig: var("JUDGER_KUBECONFIG").map(PathBuf::from),
            poll_interval: Duration::from_millis(poll_interval_ms),
            recovery_interval: Duration::from_secs(recovery_interval_secs),
        })
    }

    /// Upstream client configuration with this coordinator's credentials.
    pub fn upstream(&self) -> UpstreamConfig {
        UpstreamConfig::new(&self.endpoint).with_credentials(&self.runner_id, &self.runner_key)
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable does not parse.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}
