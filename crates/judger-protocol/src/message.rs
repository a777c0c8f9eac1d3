// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protocol messages and typed bodies.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::details::{SolutionDetails, SolutionInfo};
use crate::error::{ProtocolError, Result};

/// Body of an `error` action: the failure text.
pub type ErrorBody = String;
/// Body of a `log` action: free-form text.
pub type LogBody = String;
/// Body of a `patch` action.
pub type PatchBody = SolutionInfo;
/// Body of a `detail` action.
pub type DetailBody = SolutionDetails;

/// Recognised protocol actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Error,
    Log,
    Complete,
    Quit,
    Patch,
    Detail,
    Noop,
    Greet,
}

impl Action {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Error => "error",
            Action::Log => "log",
            Action::Complete => "complete",
            Action::Quit => "quit",
            Action::Patch => "patch",
            Action::Detail => "detail",
            Action::Noop => "noop",
            Action::Greet => "greet",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(Action::Error),
            "log" => Ok(Action::Log),
            "complete" => Ok(Action::Complete),
            "quit" => Ok(Action::Quit),
            "patch" => Ok(Action::Patch),
            "detail" => Ok(Action::Detail),
            "noop" => Ok(Action::Noop),
            "greet" => Ok(Action::Greet),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// Undecoded line shape; the action stays a string so unknown values can be reported.
#[derive(Deserialize)]
struct RawMessage {
    action: String,
    #[serde(default)]
    body: Value,
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub action: Action,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl Message {
    /// Message without a body.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            body: Value::Null,
        }
    }

    /// Message with a serialisable body.
    pub fn with_body<T: Serialize>(action: Action, body: &T) -> Result<Self> {
        let body = serde_json::to_value(body).map_err(|source| ProtocolError::InvalidBody {
            action: action.to_string(),
            source,
        })?;
        Ok(Self { action, body })
    }

    /// Parse one line of judge output.
    ///
    /// Surrounding whitespace (including the trailing newline) is ignored.
    pub fn parse(line: &str) -> Result<Self> {
        let raw: RawMessage =
            serde_json::from_str(line.trim()).map_err(ProtocolError::Malformed)?;
        let action = raw.action.parse()?;
        Ok(Self {
            action,
            body: raw.body,
        })
    }

    /// Decode the body into the type expected by this message's action.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.body).map_err(|source| ProtocolError::InvalidBody {
            action: self.action.to_string(),
            source,
        })
    }

    /// Encode as a single protocol line, without the trailing newline.
    pub fn to_line(&self) -> String {
        // Serialising a Value-backed struct cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
