// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Judger Upstream
//!
//! Client for the contest platform's runner API. The coordinator consumes it
//! as its work queue; operators use it through the `judger-ctl` binary.
//!
//! | Endpoint | Method |
//! |---|---|
//! | `POST /api/runner/solution/poll` | [`UpstreamClient::poll`] |
//! | `PATCH /api/runner/solution/task/{sid}/{tid}` | [`UpstreamClient::patch`] |
//! | `GET .../details/upload` then `PUT <url>` | [`UpstreamClient::save_details`] |
//! | `POST .../complete` | [`UpstreamClient::complete`] |
//! | `POST /api/runner/register` | [`UpstreamClient::register`] |
//!
//! # Example
//!
//! ```no_run
//! use judger_upstream::UpstreamClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = UpstreamClient::from_env()?;
//! if let Some(task) = client.poll().await? {
//!     println!("solution {} task {}", task.solution_id, task.task_id);
//!     client.complete(&task.solution_id, &task.task_id).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod types;

pub use client::UpstreamClient;
pub use config::{RunnerCredentials, UpstreamConfig};
pub use error::{Result, UpstreamError};
pub use types::{ProblemConfig, ProblemConfigJudge, RegisterRequest, RegisterResponse, SolutionPoll};
