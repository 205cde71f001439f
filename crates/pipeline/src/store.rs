//! Durable key-value store port.
//!
//! Progress records and rate-limit records share one store. Every item carries
//! a store-enforced expiry; expired items are invisible to reads even if the
//! backend has not physically removed them yet.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Timestamp;

/// Secondary-index entry: a partition value plus a numeric sort value.
///
/// The rate limiter indexes its records by client address (partition) and
/// acceptance time (sort) so it can count requests inside a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    /// Partition value (e.g. the client address).
    pub partition: String,
    /// Sort value (e.g. Unix seconds).
    pub sort: i64,
}

/// One stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    /// Primary key.
    pub key: String,
    /// Optional secondary-index entry.
    pub index: Option<IndexKey>,
    /// Item body.
    pub body: serde_json::Value,
    /// Instant after which the item no longer exists.
    pub expires_at: Timestamp,
}

impl StoredItem {
    /// Returns `true` if the item is still alive at `now`.
    pub fn is_live_at(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }
}

/// Errors produced by a [`KeyValueStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored body could not be (de)serialised.
    #[error("store serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Put/get by primary key plus an index range query.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Writes `item`, fully replacing any item with the same key.
    async fn put(&self, item: StoredItem) -> Result<(), StoreError>;

    /// Reads the live item stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StoreError>;

    /// Returns live items whose index partition equals `partition` and whose
    /// sort value is `>= since`.
    async fn query_index(&self, partition: &str, since: i64)
        -> Result<Vec<StoredItem>, StoreError>;
}
