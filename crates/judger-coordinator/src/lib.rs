// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Judger Coordinator - leased judging sessions on a container cluster
//!
//! The coordinator pulls submissions from the contest platform, runs each one
//! as a judge job in its own cluster namespace, follows the job's log and
//! relays the judge's protocol actions back to the platform. Any number of
//! coordinator replicas can run side by side; they cooperate only through
//! the shared store.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐         ┌────────────────────────────────────┐
//! │   Contest platform    │◄────────│          judger-coordinator        │
//! │ poll/patch/details/   │  HTTP   │  ┌───────────┐   ┌──────────────┐  │
//! │ complete              │────────►│  │ Poll Loop │   │   Recovery   │  │
//! └───────────────────────┘         │  └─────┬─────┘   │   Scanner    │  │
//!                                   │        │ spawn   └──────┬───────┘  │
//!                                   │        ▼                │ spawn    │
//!                                   │  ┌──────────────────────▼───────┐  │
//!                                   │  │  Judge Session (per task)    │  │
//!                                   │  │  lease, provision, watch,    │  │
//!                                   │  │  stream log, interpret       │  │
//!                                   │  └──────┬───────────────┬───────┘  │
//!                                   └─────────┼───────────────┼──────────┘
//!                                             │               │
//!                                             ▼               ▼
//!                                   ┌──────────────────┐  ┌────────────────┐
//!                                   │      Redis       │  │   Kubernetes   │
//!                                   │ leases, admission│  │ namespace j-*, │
//!                                   │ items, watermarks│  │ job "judge"    │
//!                                   └──────────────────┘  └────────────────┘
//! ```
//!
//! # Store Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `soln:<solution>:<task>` | Polled work item (JSON); also the session id |
//! | `judge:lock:<session>` | Lease owner identity, with TTL |
//! | `judge:processed:<session>` | Watermark of the last applied log line (RFC 3339) |
//! | `ratelimit` | Sessions currently admitted |
//! | `ratelimit:total` | Admission cap |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `RUNNER_ID` / `RUNNER_KEY` | Yes | - | Runner credentials |
//! | `JUDGER_REDIS_URL` | No | `redis://127.0.0.1/` | Shared store |
//! | `JUDGER_ENDPOINT` | No | `https://hpcgame.pku.edu.cn` | Contest platform |
//! | `JUDGER_RATE_LIMIT` | No | `64` | Admission cap |
//! | `JUDGER_TEMPLATE_PATH` | No | `/templates` | Environment templates |
//! | `JUDGER_KUBECTL` | No | `kubectl` | kubectl binary |
//! | `JUDGER_KUBECONFIG` | No | - | kubeconfig file |
//! | `JUDGER_POLL_INTERVAL_MS` | No | `250` | Poll loop tick |
//! | `JUDGER_RECOVERY_INTERVAL_SECS` | No | `480` | Recovery sweep interval |

/// Fleet-wide admission cap.
pub mod admission;

/// Cluster drivers (kubectl, mock).
pub mod cluster;

/// Configuration loaded from environment variables.
pub mod config;

/// Shared client handles.
pub mod context;

/// Crate-level error type.
pub mod error;

/// Lease owner identity.
pub mod identity;

/// Judge protocol interpreter.
pub mod interpreter;

/// Distributed lease and its refresher.
pub mod lease;

/// Poll loop.
pub mod poll_loop;

/// Work queue abstraction over the contest platform.
pub mod queue;

/// Recovery of orphaned work items.
pub mod recovery;

/// Judge job configuration.
pub mod running_config;

/// Embeddable runtime.
pub mod runtime;

/// Per-submission session.
pub mod session;

/// Shared key/value store backends.
pub mod store;

/// Environment manifest templates.
pub mod templates;

/// Work item persistence and watermarks.
pub mod work_item;

pub use error::{Error, Result};
