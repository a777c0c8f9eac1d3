// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for judger-coordinator.

use thiserror::Error;

/// Coordinator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Shared store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Work item persistence failed.
    #[error("Work item error: {0}")]
    WorkItem(#[from] crate::work_item::WorkItemError),

    /// Cluster operation failed.
    #[error("Cluster error: {0}")]
    Cluster(#[from] crate::cluster::ClusterError),

    /// Environment templates could not be loaded.
    #[error("Template error: {0}")]
    Template(#[from] crate::templates::TemplateError),

    /// Upstream client setup or request failed.
    #[error("Upstream error: {0}")]
    Upstream(#[from] judger_upstream::UpstreamError),
}

/// Result type using the coordinator Error.
pub type Result<T> = std::result::Result<T, Error>;
