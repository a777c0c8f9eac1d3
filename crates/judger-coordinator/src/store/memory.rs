// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process store for tests.
//!
//! Honours TTLs against the tokio clock, so tests running with paused time
//! can expire leases deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{LeaseStore, Result, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Single-process [`LeaseStore`] with the same atomicity as the Redis backend.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining TTL of a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
        entries.get(key).filter(|e| e.is_live(Instant::now()))
    }

    fn counter(entries: &HashMap<String, Entry>, key: &str) -> i64 {
        Self::live(entries, key)
            .and_then(|e| e.value.parse().ok())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(Self::live(&entries, key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        let entries = self.entries.lock().await;
        Ok(Self::live(&entries, key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.check()?;
        let entries = self.entries.lock().await;
        let now = Instant::now();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        if Self::live(&entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        if Self::live(&entries, key).is_some_and(|e| e.value == value) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn increment_below(&self, counter_key: &str, cap_key: &str) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let current = Self::counter(&entries, counter_key);
        let cap = Self::counter(&entries, cap_key);
        if current >= cap {
            return Ok(false);
        }
        entries.insert(
            counter_key.to_string(),
            Entry {
                value: (current + 1).to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }

    async fn decrement_floor_zero(&self, counter_key: &str) -> Result<bool> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let current = Self::counter(&entries, counter_key);
        if current <= 0 {
            return Ok(false);
        }
        entries.insert(
            counter_key.to_string(),
            Entry {
                value: (current - 1).to_string(),
                expires_at: None,
            },
        );
        Ok(true)
    }
}
