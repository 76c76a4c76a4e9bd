use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqliteCacheStoreError {
    #[error("sqlite cache store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("sqlite cache store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A translation result as persisted on disk. `timestamp` is the insertion
/// time in milliseconds, used to decide staleness on load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntry {
    pub value: String,
    pub timestamp: u64,
}

/// Durable backing for the text cache. Every call opens a fresh connection
/// inside `spawn_blocking`, so the store is cheap to clone and safe to share
/// across tasks without pooling.
#[derive(Clone, Debug)]
pub struct SqliteCacheStore {
    path: PathBuf,
}

impl SqliteCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates the schema if it does not exist yet. Calling this is optional;
    /// every other method initializes the schema on its own connection.
    pub async fn init(&self) -> Result<(), SqliteCacheStoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SqliteCacheStoreError> {
            open_connection(&path)?;
            Ok(())
        })
        .await?
    }

    pub async fn load(&self, id: &str) -> Result<Option<StoredEntry>, SqliteCacheStoreError> {
        let path = self.path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<StoredEntry>, SqliteCacheStoreError> {
            let conn = open_connection(&path)?;
            let row = conn
                .query_row(
                    "SELECT value, timestamp FROM cache_entries WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        let value: String = row.get(0)?;
                        let timestamp: i64 = row.get(1)?;
                        Ok(StoredEntry {
                            value,
                            timestamp: timestamp.max(0) as u64,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await?
    }

    pub async fn save(
        &self,
        id: &str,
        value: &str,
        timestamp: u64,
    ) -> Result<(), SqliteCacheStoreError> {
        let path = self.path.clone();
        let id = id.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), SqliteCacheStoreError> {
            let conn = open_connection(&path)?;
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries (id, value, timestamp) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, value, clamp_millis(timestamp)],
            )?;
            Ok(())
        })
        .await?
    }

    /// Deletes every entry stored strictly before `cutoff_ms`.
    pub async fn purge_older_than(&self, cutoff_ms: u64) -> Result<usize, SqliteCacheStoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<usize, SqliteCacheStoreError> {
            let conn = open_connection(&path)?;
            let removed = conn.execute(
                "DELETE FROM cache_entries WHERE timestamp < ?1",
                rusqlite::params![clamp_millis(cutoff_ms)],
            )?;
            Ok(removed)
        })
        .await?
    }

    pub async fn clear(&self) -> Result<(), SqliteCacheStoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SqliteCacheStoreError> {
            let conn = open_connection(&path)?;
            conn.execute("DELETE FROM cache_entries", [])?;
            Ok(())
        })
        .await?
    }
}

fn open_connection(path: &Path) -> Result<Connection, SqliteCacheStoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), SqliteCacheStoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cache_entries (
            id TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn clamp_millis(millis: u64) -> i64 {
    millis.min(i64::MAX as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SqliteCacheStore {
        SqliteCacheStore::new(dir.path().join("cache.db"))
    }

    #[tokio::test]
    async fn round_trips_an_entry() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = store_in(&dir);
        store.init().await.expect("init schema");

        store.save("tr:fr:hello", "bonjour", 1_000).await.expect("save");
        let entry = store.load("tr:fr:hello").await.expect("load");
        assert_eq!(
            entry,
            Some(StoredEntry {
                value: "bonjour".to_string(),
                timestamp: 1_000,
            })
        );
    }

    #[tokio::test]
    async fn load_miss_returns_none() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = store_in(&dir);
        assert_eq!(store.load("absent").await.expect("load"), None);
    }

    #[tokio::test]
    async fn save_overwrites_existing_id() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = store_in(&dir);

        store.save("k", "old", 1).await.expect("save");
        store.save("k", "new", 2).await.expect("save");
        let entry = store.load("k").await.expect("load").expect("entry");
        assert_eq!(entry.value, "new");
        assert_eq!(entry.timestamp, 2);
    }

    #[tokio::test]
    async fn purge_removes_only_older_entries() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = store_in(&dir);

        store.save("stale", "a", 100).await.expect("save");
        store.save("boundary", "b", 500).await.expect("save");
        store.save("fresh", "c", 900).await.expect("save");

        let removed = store.purge_older_than(500).await.expect("purge");
        assert_eq!(removed, 1);
        assert_eq!(store.load("stale").await.expect("load"), None);
        assert!(store.load("boundary").await.expect("load").is_some());
        assert!(store.load("fresh").await.expect("load").is_some());
    }

    #[tokio::test]
    async fn clear_empties_the_table() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = store_in(&dir);

        store.save("a", "1", 1).await.expect("save");
        store.save("b", "2", 2).await.expect("save");
        store.clear().await.expect("clear");
        assert_eq!(store.load("a").await.expect("load"), None);
        assert_eq!(store.load("b").await.expect("load"), None);
    }
}
