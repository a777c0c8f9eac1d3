// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protocol interpreter - applies one judge output line to the work queue.
//!
//! Interpretation is stateless: the same line always produces the same queue
//! call, so replaying a log from an older watermark repeats calls rather
//! than inventing new ones.

use judger_protocol::{Action, DetailBody, ErrorBody, LogBody, Message, PatchBody, ProtocolError};
use thiserror::Error;
use tracing::{debug, info};

use crate::queue::{QueueError, TaskReporter};

/// Errors interpreting a line.
#[derive(Debug, Error)]
pub enum InterpretError {
    /// The line is not a valid protocol message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The judge reported an error.
    #[error("Judge reported an error: {0}")]
    Reported(String),

    /// Forwarding the action upstream failed.
    #[error("Failed to forward {action}: {source}")]
    Upstream {
        action: Action,
        #[source]
        source: QueueError,
    },
}

/// What the session should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Keep reading.
    Continue,
    /// Completion was reported upstream; keep reading.
    Completed,
    /// Stop reading and tear the environment down.
    Quit,
}

/// Interpret one log line for the task behind `reporter`.
///
/// `environment` only labels log output.
pub async fn interpret(
    line: &str,
    reporter: &TaskReporter,
    environment: &str,
) -> Result<Directive, InterpretError> {
    let message = Message::parse(line)?;
    debug!(environment = %environment, action = %message.action, "Interpreting action");

    let upstream = |action| move |source| InterpretError::Upstream { action, source };

    match message.action {
        Action::Error => {
            let body: ErrorBody = message.decode_body()?;
            Err(InterpretError::Reported(body))
        }
        Action::Log => {
            let body: LogBody = message.decode_body()?;
            info!(environment = %environment, "Judge log: {}", body);
            Ok(Directive::Continue)
        }
        Action::Complete => {
            reporter
                .complete()
                .await
                .map_err(upstream(Action::Complete))?;
            Ok(Directive::Completed)
        }
        Action::Quit => Ok(Directive::Quit),
        Action::Patch => {
            let body: PatchBody = message.decode_body()?;
            reporter
                .patch(&body)
                .await
                .map_err(upstream(Action::Patch))?;
            Ok(Directive::Continue)
        }
        Action::Detail => {
            let body: DetailBody = message.decode_body()?;
            reporter
                .save_details(&body)
                .await
                .map_err(upstream(Action::Detail))?;
            Ok(Directive::Continue)
        }
        Action::Noop => Ok(Directive::Continue),
        Action::Greet => {
            info!(environment = %environment, "Judge greeted");
            Ok(Directive::Continue)
        }
    }
}
