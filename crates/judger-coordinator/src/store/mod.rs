// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared key/value store backing leases, admission counters, work items
//! and watermarks.
//!
//! Every operation that must hold across coordinator replicas is a single
//! store-side primitive (set-if-absent, compare-and-delete, capped
//! increment), never a read followed by a write.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors from store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Redis command or connection failed.
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// A script returned something other than the expected reply.
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Atomic key/value primitives shared by every coordinator replica.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Backend name, for logging.
    fn store_type(&self) -> &'static str;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value without expiry.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a key currently exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Set `key` to `value` with a TTL only if it does not exist yet.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Reset the TTL of an existing key. Returns false if the key is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if its value equals `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    /// Increment `counter_key` if it is below the value at `cap_key`.
    ///
    /// A missing counter counts as zero, a missing cap denies.
    async fn increment_below(&self, counter_key: &str, cap_key: &str) -> Result<bool>;

    /// Decrement `counter_key` unless it is already zero or missing.
    async fn decrement_floor_zero(&self, counter_key: &str) -> Result<bool>;
}
