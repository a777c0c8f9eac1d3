// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster module - execution environment backends.

pub mod kubectl;
pub mod mock;
mod traits;

pub use kubectl::{KubectlConfig, KubectlDriver};
pub use mock::{ClusterCall, MockCluster};
pub use traits::*;
