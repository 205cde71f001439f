use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline::store::{KeyValueStore, StoreError, StoredItem};
use pipeline::{Clock, SystemClock};
use tokio::sync::RwLock;

/// In-process [`KeyValueStore`].
pub struct MemoryStore {
    items: RwLock<HashMap<String, StoredItem>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store that reads expiry against the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store that reads expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, item: StoredItem) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut items = self.items.write().await;
        items.retain(|_, existing| existing.is_live_at(now));
        items.insert(item.key.clone(), item);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .items
            .read()
            .await
            .get(key)
            .filter(|item| item.is_live_at(now))
            .cloned())
    }

    async fn query_index(
        &self,
        partition: &str,
        since: i64,
    ) -> Result<Vec<StoredItem>, StoreError> {
        let now = self.clock.now();
        let items = self.items.read().await;
        let mut matching: Vec<StoredItem> = items
            .values()
            .filter(|item| item.is_live_at(now))
            .filter(|item| {
                item.index
                    .as_ref()
                    .is_some_and(|index| index.partition == partition && index.sort >= since)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|item| item.index.as_ref().map(|index| index.sort));
        Ok(matching)
    }
}
