// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for judger-coordinator.
//!
//! [`CoordinatorRuntime`] wires the client handles into one shared
//! [`CoordinatorContext`], publishes the admission cap and starts the poll
//! loop and the recovery scanner as background tasks.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use judger_coordinator::runtime::CoordinatorRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = CoordinatorRuntime::builder()
//!         .store(Arc::new(RedisStore::connect("redis://127.0.0.1/").await?))
//!         .cluster(Arc::new(KubectlDriver::new(KubectlConfig::default())))
//!         .queue(Arc::new(UpstreamClient::from_env()?))
//!         .templates(TemplateSet::load_dir("/templates".as_ref())?)
//!         .rate_limit(16)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use judger_upstream::UpstreamClient;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cluster::{ClusterDriver, KubectlConfig, KubectlDriver};
use crate::config::Config;
use crate::context::CoordinatorContext;
use crate::identity;
use crate::poll_loop::{PollLoop, PollLoopConfig};
use crate::queue::WorkQueue;
use crate::recovery::{RecoveryScanner, RecoveryScannerConfig};
use crate::session::SessionSettings;
use crate::store::{LeaseStore, RedisStore};
use crate::templates::TemplateSet;

/// Builder for creating a [`CoordinatorRuntime`].
pub struct CoordinatorRuntimeBuilder {
    store: Option<Arc<dyn LeaseStore>>,
    cluster: Option<Arc<dyn ClusterDriver>>,
    queue: Option<Arc<dyn WorkQueue>>,
    templates: TemplateSet,
    identity: Option<String>,
    rate_limit: u64,
    poll_interval: Duration,
    recovery_interval: Duration,
    settings: SessionSettings,
}

impl Default for CoordinatorRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            cluster: None,
            queue: None,
            templates: TemplateSet::default(),
            identity: None,
            rate_limit: 64,
            poll_interval: PollLoopConfig::default().poll_interval,
            recovery_interval: RecoveryScannerConfig::default().interval,
            settings: SessionSettings::default(),
        }
    }
}

impl CoordinatorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder for a production deployment: Redis store, kubectl driver and
    /// the contest platform client, as described by `config`.
    pub async fn from_config(config: &Config) -> crate::Result<Self> {
        let store = RedisStore::connect(&config.redis_url).await?;
        info!(redis_url = %config.redis_url, "Connected to store");

        let cluster = KubectlDriver::new(KubectlConfig {
            binary: config.kubectl.clone(),
            kubeconfig: config.kubeconfig.clone(),
        });
        let queue = UpstreamClient::new(config.upstream())?;
        let templates = TemplateSet::load_dir(&config.template_path)?;
        info!(
            path = %config.template_path.display(),
            count = templates.len(),
            "Loaded environment templates"
        );

        Ok(Self::new()
            .store(Arc::new(store))
            .cluster(Arc::new(cluster))
            .queue(Arc::new(queue))
            .templates(templates)
            .rate_limit(config.rate_limit)
            .poll_interval(config.poll_interval)
            .recovery_interval(config.recovery_interval))
    }

    /// Set the shared store (required).
    pub fn store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the cluster driver (required).
    pub fn cluster(mut self, cluster: Arc<dyn ClusterDriver>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Set the work queue (required).
    pub fn queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the environment templates.
    ///
    /// Default: empty
    pub fn templates(mut self, templates: TemplateSet) -> Self {
        self.templates = templates;
        self
    }

    /// Set the lease owner token.
    ///
    /// Default: generated from the hostname
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Set the fleet-wide admission cap published at start.
    ///
    /// Default: 64
    pub fn rate_limit(mut self, rate_limit: u64) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Default: 250 milliseconds
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Default: 8 minutes
    pub fn recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    /// Default: 6 minutes
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.settings.lease_ttl = ttl;
        self
    }

    /// Default: 2 minutes
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.settings.refresh_interval = interval;
        self
    }

    /// Default: 10 minutes
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.settings.readiness_timeout = timeout;
        self
    }

    /// Default: 5 seconds
    pub fn namespace_grace(mut self, grace: Duration) -> Self {
        self.settings.namespace_grace = grace;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<CoordinatorRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("cluster is required"))?;
        let queue = self
            .queue
            .ok_or_else(|| anyhow::anyhow!("queue is required"))?;
        if self.settings.refresh_interval >= self.settings.lease_ttl {
            anyhow::bail!("refresh interval must be shorter than the lease TTL");
        }

        let identity = self.identity.unwrap_or_else(identity::generate);
        let context = CoordinatorContext::new(
            store,
            cluster,
            queue,
            self.templates,
            identity,
            self.settings,
        );

        Ok(CoordinatorRuntimeConfig {
            context: Arc::new(context),
            rate_limit: self.rate_limit,
            poll_interval: self.poll_interval,
            recovery_interval: self.recovery_interval,
        })
    }
}

/// Configuration for a [`CoordinatorRuntime`].
pub struct CoordinatorRuntimeConfig {
    context: Arc<CoordinatorContext>,
    rate_limit: u64,
    poll_interval: Duration,
    recovery_interval: Duration,
}

impl CoordinatorRuntimeConfig {
    /// Shared context the runtime will run with.
    pub fn context(&self) -> &Arc<CoordinatorContext> {
        &self.context
    }

    /// Publish the admission cap and spawn the poll loop and recovery scanner.
    pub async fn start(self) -> Result<CoordinatorRuntime> {
        let ctx = self.context;
        ctx.admission.init(self.rate_limit).await?;

        let poll_loop = PollLoop::new(
            ctx.clone(),
            PollLoopConfig {
                poll_interval: self.poll_interval,
            },
        );
        let poll_shutdown = poll_loop.shutdown_handle();
        let poll_handle = tokio::spawn(async move {
            poll_loop.run().await;
        });

        let recovery = RecoveryScanner::new(
            ctx.clone(),
            RecoveryScannerConfig {
                interval: self.recovery_interval,
            },
        );
        let recovery_shutdown = recovery.shutdown_handle();
        let recovery_handle = tokio::spawn(async move {
            recovery.run().await;
        });

        info!(
            identity = %ctx.identity,
            store = ctx.store.store_type(),
            cluster = ctx.cluster.driver_type(),
            rate_limit = self.rate_limit,
            templates = ctx.templates.len(),
            "CoordinatorRuntime started"
        );

        Ok(CoordinatorRuntime {
            context: ctx,
            poll_handle,
            recovery_handle,
            poll_shutdown,
            recovery_shutdown,
        })
    }
}

/// A running coordinator that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) to stop polling and recovery. Sessions
/// already running are not interrupted; their leases expire if the process
/// exits, and another replica adopts the work.
pub struct CoordinatorRuntime {
    context: Arc<CoordinatorContext>,
    poll_handle: JoinHandle<()>,
    recovery_handle: JoinHandle<()>,
    poll_shutdown: Arc<Notify>,
    recovery_shutdown: Arc<Notify>,
}

impl CoordinatorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> CoordinatorRuntimeBuilder {
        CoordinatorRuntimeBuilder::new()
    }

    /// Get a reference to the shared context.
    pub fn context(&self) -> &Arc<CoordinatorContext> {
        &self.context
    }

    /// Stop the poll loop and the recovery scanner and wait for them.
    pub async fn shutdown(self) -> Result<()> {
        info!("CoordinatorRuntime shutting down...");

        self.poll_shutdown.notify_one();
        self.recovery_shutdown.notify_one();

        if let Err(e) = self.poll_handle.await {
            error!("Poll loop task panicked: {}", e);
        }
        if let Err(e) = self.recovery_handle.await {
            error!("Recovery scanner task panicked: {}", e);
        }

        info!("CoordinatorRuntime shutdown complete");
        Ok(())
    }
}
