// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Judger Coordinator - runs submissions from the contest platform on the cluster.

use tracing::{info, warn};

use judger_coordinator::config::Config;
use judger_coordinator::runtime::CoordinatorRuntimeBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "judger_coordinator=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        endpoint = %config.endpoint,
        rate_limit = config.rate_limit,
        template_path = %config.template_path.display(),
        "Starting Judger Coordinator"
    );

    let runtime = CoordinatorRuntimeBuilder::from_config(&config)
        .await?
        .build()?
        .start()
        .await?;

    info!(identity = %runtime.context().identity, "Coordinator ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Judger Coordinator shut down");

    Ok(())
}
