// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Judger Protocol - the action stream between judges and the coordinator
//!
//! A judge running inside the cluster reports progress by writing one JSON
//! object per line to its standard output. The coordinator follows the pod
//! log and interprets each line independently, in the order received.
//!
//! # Wire Format
//!
//! ```text
//! {"action":"greet"}
//! {"action":"log","body":"compiling solution"}
//! {"action":"patch","body":{"score":50,"status":"Running","message":"1/2 tests"}}
//! {"action":"detail","body":{"version":1,"jobs":[...],"summary":"..."}}
//! {"action":"complete"}
//! ```
//!
//! # Actions
//!
//! | Action | Body | Meaning |
//! |--------|------|---------|
//! | `error` | string | Judge failed; the submission is marked as errored |
//! | `log` | string | Free-form diagnostic text |
//! | `complete` | - | Judging finished |
//! | `quit` | - | Tear the environment down now |
//! | `patch` | [`SolutionInfo`] | Partial or final score/status |
//! | `detail` | [`SolutionDetails`] | Full per-job/per-test breakdown |
//! | `noop` | - | Keep-alive |
//! | `greet` | - | Handshake |
//!
//! Any other action value is rejected by [`Message::parse`].

mod details;
mod error;
mod message;

pub use details::{
    SolutionDetails, SolutionDetailsJob, SolutionDetailsTest, SolutionInfo, status,
};
pub use error::{ProtocolError, Result};
pub use message::{Action, DetailBody, ErrorBody, LogBody, Message, PatchBody};
