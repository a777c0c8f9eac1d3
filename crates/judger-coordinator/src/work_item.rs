// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted work items and per-session processed watermarks.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::store::{LeaseStore, StoreError};

/// A polled submission, persisted verbatim until its session finishes.
pub type WorkItem = judger_upstream::SolutionPoll;

/// Prefix of work item keys.
pub const WORK_ITEM_PREFIX: &str = "soln:";
/// Prefix of processed-watermark keys.
pub const WATERMARK_PREFIX: &str = "judge:processed:";

/// Errors from work item persistence.
#[derive(Debug, Error)]
pub enum WorkItemError {
    /// No work item stored under the session key.
    #[error("Work item not found: {0}")]
    NotFound(String),

    /// The payload is not a valid work item.
    #[error("Invalid work item payload at {key}: {source}")]
    Payload {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stored watermark is not an RFC 3339 timestamp.
    #[error("Invalid watermark {value:?} at {key}: {source}")]
    InvalidWatermark {
        key: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for work item operations.
pub type Result<T> = std::result::Result<T, WorkItemError>;

/// Identifier of a session: the store key of its work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Session id for a submission task, `soln:<solution>:<task>`.
    pub fn for_task(solution_id: &str, task_id: &str) -> Self {
        Self(format!("{}{}:{}", WORK_ITEM_PREFIX, solution_id, task_id))
    }

    /// Wrap a work item key found in the store.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The work item key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of this session's processed watermark.
    pub fn watermark_key(&self) -> String {
        format!("{}{}", WATERMARK_PREFIX, self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Work item and watermark persistence on top of a [`LeaseStore`].
#[derive(Clone)]
pub struct WorkItemRepository {
    store: Arc<dyn LeaseStore>,
}

impl WorkItemRepository {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }

    /// Persist a freshly polled item and return its session id.
    pub async fn store_item(&self, item: &WorkItem) -> Result<SessionId> {
        let id = SessionId::for_task(&item.solution_id, &item.task_id);
        let payload = serde_json::to_string(item).map_err(|source| WorkItemError::Payload {
            key: id.to_string(),
            source,
        })?;
        self.store.set(id.as_str(), &payload).await?;
        Ok(id)
    }

    pub async fn load(&self, id: &SessionId) -> Result<WorkItem> {
        let payload = self
            .store
            .get(id.as_str())
            .await?
            .ok_or_else(|| WorkItemError::NotFound(id.to_string()))?;
        serde_json::from_str(&payload).map_err(|source| WorkItemError::Payload {
            key: id.to_string(),
            source,
        })
    }

    pub async fn delete(&self, id: &SessionId) -> Result<()> {
        Ok(self.store.delete(id.as_str()).await?)
    }

    /// Ids of every persisted work item.
    pub async fn list(&self) -> Result<Vec<SessionId>> {
        let keys = self.store.scan_prefix(WORK_ITEM_PREFIX).await?;
        Ok(keys.into_iter().map(SessionId::from_key).collect())
    }

    /// Time of the last successfully applied log line, if any.
    pub async fn watermark(&self, id: &SessionId) -> Result<Option<DateTime<Utc>>> {
        let key = id.watermark_key();
        let Some(value) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(&value).map_err(|source| {
            WorkItemError::InvalidWatermark {
                key,
                value: value.clone(),
                source,
            }
        })?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    /// Record a watermark, truncated to whole seconds.
    pub async fn set_watermark(&self, id: &SessionId, at: DateTime<Utc>) -> Result<()> {
        let value = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        Ok(self.store.set(&id.watermark_key(), &value).await?)
    }

    pub async fn delete_watermark(&self, id: &SessionId) -> Result<()> {
        Ok(self.store.delete(&id.watermark_key()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn repo() -> (Arc<MemoryStore>, WorkItemRepository) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), WorkItemRepository::new(store))
    }

    #[test]
    fn test_session_id_layout() {
        let id = SessionId::for_task("s1", "t1");
        assert_eq!(id.as_str(), "soln:s1:t1");
        assert_eq!(id.watermark_key(), "judge:processed:soln:s1:t1");
    }

    #[tokio::test]
    async fn test_store_load_list_delete() {
        let (_, repo) = repo();
        let item = WorkItem {
            solution_id: "s1".to_string(),
            task_id: "t1".to_string(),
            solution_data_url: "https://oss/s1".to_string(),
            ..WorkItem::default()
        };

        let id = repo.store_item(&item).await.unwrap();
        assert_eq!(repo.load(&id).await.unwrap(), item);
        assert_eq!(repo.list().await.unwrap(), vec![id.clone()]);

        repo.delete(&id).await.unwrap();
        assert!(matches!(
            repo.load(&id).await,
            Err(WorkItemError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_item() {
        let (store, repo) = repo();
        store.set("soln:s1:t1", "not json").await.unwrap();
        let err = repo.load(&SessionId::for_task("s1", "t1")).await.unwrap_err();
        assert!(matches!(err, WorkItemError::Payload { .. }));
    }

    #[tokio::test]
    async fn test_watermark_round_trip_in_seconds() {
        let (store, repo) = repo();
        let id = SessionId::for_task("s1", "t1");
        assert!(repo.watermark(&id).await.unwrap().is_none());

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap()
            + chrono::Duration::milliseconds(750);
        repo.set_watermark(&id, at).await.unwrap();

        assert_eq!(
            store.get(&id.watermark_key()).await.unwrap().as_deref(),
            Some("2025-03-01T12:30:05Z")
        );
        assert_eq!(
            repo.watermark(&id).await.unwrap(),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap())
        );

        repo.delete_watermark(&id).await.unwrap();
        assert!(repo.watermark(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_watermark() {
        let (store, repo) = repo();
        let id = SessionId::for_task("s1", "t1");
        store.set(&id.watermark_key(), "yesterday").await.unwrap();
        assert!(matches!(
            repo.watermark(&id).await,
            Err(WorkItemError::InvalidWatermark { .. })
        ));
    }
}
