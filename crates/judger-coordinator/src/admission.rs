// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleet-wide cap on concurrently running sessions.

use std::sync::Arc;

use tracing::{debug, info};

use crate::store::{LeaseStore, Result};

/// Key holding the number of admitted sessions.
pub const CURRENT_KEY: &str = "ratelimit";
/// Key holding the configured cap.
pub const TOTAL_KEY: &str = "ratelimit:total";

/// Admission counter shared by all coordinator replicas through the store.
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn LeaseStore>,
    current_key: String,
    total_key: String,
}

impl AdmissionController {
    /// Controller using the default counter keys.
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self::with_keys(store, CURRENT_KEY, TOTAL_KEY)
    }

    /// Controller using custom counter keys.
    pub fn with_keys(
        store: Arc<dyn LeaseStore>,
        current_key: impl Into<String>,
        total_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            current_key: current_key.into(),
            total_key: total_key.into(),
        }
    }

    /// Publish the cap. Last writer wins.
    pub async fn init(&self, total: u64) -> Result<()> {
        self.store.set(&self.total_key, &total.to_string()).await?;
        info!(total, "Admission cap set");
        Ok(())
    }

    /// Take a slot if one is free.
    pub async fn try_admit(&self) -> Result<bool> {
        let admitted = self
            .store
            .increment_below(&self.current_key, &self.total_key)
            .await?;
        if !admitted {
            debug!("Admission denied, cap reached");
        }
        Ok(admitted)
    }

    /// Give a slot back. Releasing at zero is a no-op.
    pub async fn release(&self) -> Result<()> {
        if !self.store.decrement_floor_zero(&self.current_key).await? {
            debug!("Admission release at zero ignored");
        }
        Ok(())
    }

    /// Number of slots currently taken.
    pub async fn in_use(&self) -> Result<u64> {
        let value = self.store.get(&self.current_key).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }
}
