// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for judger-protocol.

use thiserror::Error;

/// Result type using ProtocolError.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding a protocol line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line is not a `{action, body}` JSON object.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The action field holds a value this coordinator does not understand.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The body does not match the shape required by its action.
    #[error("invalid body for action '{action}': {source}")]
    InvalidBody {
        /// Action whose body failed to decode.
        action: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}
