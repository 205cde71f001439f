use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline::store::{IndexKey, KeyValueStore, StoreError, StoredItem};
use pipeline::{Clock, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// [`KeyValueStore`] backed by one SQLite table.
///
/// Expired rows are filtered on every read and purged on every write.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    table: String,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and ensures `table` exists.
    ///
    /// `table` may contain ASCII letters, digits, `_` and `-` only.
    pub async fn open(
        path: &Path,
        table: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| {
                    StoreError::Backend(format!("cannot create {}: {e}", parent.display()))
                })?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        let store = Self::with_connection(conn, table, clock)?;
        info!(path = %path.display(), table, "status store opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(table: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::with_connection(conn, table, clock)
    }

    fn with_connection(
        conn: Connection,
        table: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(StoreError::Backend(format!("invalid table name: {table:?}")));
        }
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             CREATE TABLE IF NOT EXISTS \"{table}\" (
                 key             TEXT PRIMARY KEY,
                 index_partition TEXT,
                 index_sort      INTEGER,
                 body            TEXT NOT NULL,
                 expires_at      INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS \"idx_{table}_partition\"
                 ON \"{table}\"(index_partition, index_sort);"
        ))
        .map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
            clock,
        })
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

type RawItem = (String, Option<String>, Option<i64>, String, i64);

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<RawItem> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode((key, partition, sort, body, expires_at): RawItem) -> Result<StoredItem, StoreError> {
    Ok(StoredItem {
        key,
        index: partition.zip(sort).map(|(partition, sort)| IndexKey { partition, sort }),
        body: serde_json::from_str(&body)?,
        expires_at: Timestamp::from_unix_seconds(expires_at),
    })
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn put(&self, item: StoredItem) -> Result<(), StoreError> {
        let body = serde_json::to_string(&item.body)?;
        let now = self.clock.now().unix_seconds();
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO \"{}\"
                 (key, index_partition, index_sort, body, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                self.table
            ),
            params![
                item.key,
                item.index.as_ref().map(|i| i.partition.as_str()),
                item.index.as_ref().map(|i| i.sort),
                body,
                item.expires_at.unix_seconds(),
            ],
        )
        .map_err(backend)?;

        let purged = conn
            .execute(
                &format!("DELETE FROM \"{}\" WHERE expires_at <= ?1", self.table),
                params![now],
            )
            .map_err(backend)?;
        if purged > 0 {
            debug!(purged, "expired records purged");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StoreError> {
        let now = self.clock.now().unix_seconds();
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!(
                    "SELECT key, index_partition, index_sort, body, expires_at
                     FROM \"{}\" WHERE key = ?1 AND expires_at > ?2",
                    self.table
                ),
                params![key, now],
                item_from_row,
            )
            .optional()
            .map_err(backend)?;
        row.map(decode).transpose()
    }

    async fn query_index(
        &self,
        partition: &str,
        since: i64,
    ) -> Result<Vec<StoredItem>, StoreError> {
        let now = self.clock.now().unix_seconds();
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT key, index_partition, index_sort, body, expires_at
                 FROM \"{}\"
                 WHERE index_partition = ?1 AND index_sort >= ?2 AND expires_at > ?3
                 ORDER BY index_sort ASC",
                self.table
            ))
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![partition, since, now], item_from_row)
            .map_err(backend)?;
        let items = rows
            .map(|row| row.map_err(backend).and_then(decode))
            .collect::<Result<Vec<_>, _>>();
        items
    }
}
