// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for judger-upstream.

use thiserror::Error;

/// Result type using UpstreamError.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Errors that can occur when talking to the contest platform.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Platform answered with a non-success status.
    #[error("server error [{status}]: {message}")]
    Server { status: u16, message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
