// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Redis-backed store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::debug;

use super::{LeaseStore, Result, StoreError};

const SCAN_BATCH: usize = 100;

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const INCREMENT_BELOW: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local total = tonumber(redis.call('GET', KEYS[2]) or '0')
if current < total then
    redis.call('INCR', KEYS[1])
    return 1
end
return 0
"#;

const DECREMENT_FLOOR_ZERO: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current <= 0 then
    return 0
end
redis.call('DECR', KEYS[1])
return 1
"#;

/// Store backed by a Redis server through a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    compare_and_delete: Script,
    increment_below: Script,
    decrement_floor_zero: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url = %url, "Connected to Redis");

        Ok(Self {
            conn,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            increment_below: Script::new(INCREMENT_BELOW),
            decrement_floor_zero: Script::new(DECREMENT_FLOOR_ZERO),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn as_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis.
    (ttl.as_millis() as u64).max(1)
}

fn script_flag(reply: i64) -> Result<bool> {
    match reply {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::UnexpectedReply(other.to_string())),
    }
}

#[async_trait]
impl LeaseStore for RedisStore {
    fn store_type(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(as_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn();
        let reply: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(as_millis(ttl))
            .query_async(&mut conn)
            .await?;
        script_flag(reply)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn();
        let reply: i64 = self
            .compare_and_delete
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        script_flag(reply)
    }

    async fn increment_below(&self, counter_key: &str, cap_key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let reply: i64 = self
            .increment_below
            .key(counter_key)
            .key(cap_key)
            .invoke_async(&mut conn)
            .await?;
        script_flag(reply)
    }

    async fn decrement_floor_zero(&self, counter_key: &str) -> Result<bool> {
        let mut conn = self.conn();
        let reply: i64 = self
            .decrement_floor_zero
            .key(counter_key)
            .invoke_async(&mut conn)
            .await?;
        script_flag(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_never_rounds_to_zero() {
        assert_eq!(as_millis(Duration::from_micros(10)), 1);
        assert_eq!(as_millis(Duration::from_secs(360)), 360_000);
    }

    #[test]
    fn test_script_flag() {
        assert!(script_flag(1).unwrap());
        assert!(!script_flag(0).unwrap());
        assert!(matches!(
            script_flag(7),
            Err(StoreError::UnexpectedReply(_))
        ));
    }
}
