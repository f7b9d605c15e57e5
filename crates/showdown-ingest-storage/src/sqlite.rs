// SQLite-backed replay store.
//
// rusqlite is synchronous, so every statement runs on the blocking pool
// behind a shared connection. Writes for one batch share a transaction.

use crate::error::{Result, StorageError};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use showdown_ingest_core::{KnownIdSet, ReplayRecord};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS replays (
    id TEXT PRIMARY KEY,
    format TEXT NOT NULL,
    players TEXT NOT NULL,
    log TEXT NOT NULL,
    uploadtime INTEGER NOT NULL,
    rating INTEGER
)";

const INSERT_SQL: &str = "INSERT OR IGNORE INTO replays (id, format, players, log, uploadtime, rating)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the replay database. Cheap to clone.
#[derive(Clone)]
pub struct ReplayStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl std::fmt::Debug for ReplayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayStore")
            .field("location", &self.location)
            .finish()
    }
}

impl ReplayStore {
    /// Open (or create) the database at `path` and make sure the replay
    /// table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let location = path.display().to_string();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::open(location.clone(), e.to_string()))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StorageError::open(location.clone(), e.to_string()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StorageError::open(location.clone(), e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StorageError::open(location.clone(), e.to_string()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| StorageError::open(location.clone(), e.to_string()))?;

        let store = Self::from_connection(conn, location)?;
        info!(database = %store.location, "Opened replay store");
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::open(":memory:".to_string(), e.to_string()))?;
        Self::from_connection(conn, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, location: String) -> Result<Self> {
        conn.execute(CREATE_TABLE_SQL, [])
            .map_err(|e| StorageError::schema(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Every replay id already persisted.
    pub async fn known_ids(&self) -> Result<KnownIdSet> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn
                .prepare("SELECT id FROM replays")
                .map_err(|e| StorageError::read(e.to_string()))?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| StorageError::read(e.to_string()))?
                .collect::<rusqlite::Result<KnownIdSet>>()
                .map_err(|e| StorageError::read(e.to_string()))?;
            Ok(ids)
        })
        .await
    }

    /// Insert `records` in a single transaction. Ids that are already
    /// present are ignored. Returns the number of newly inserted rows.
    pub async fn insert_batch(&self, records: Vec<ReplayRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let conn = Arc::clone(&self.conn);
        let rows = records.len();
        let inserted = run_blocking(move || {
            let mut conn = conn.lock();
            insert_blocking(&mut conn, &records)
                .map_err(|e| StorageError::write_failure(rows, e.to_string()))
        })
        .await?;

        debug!(rows, inserted, "Committed replay batch");
        Ok(inserted)
    }

    /// Number of stored replays.
    pub async fn count(&self) -> Result<usize> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let conn = conn.lock();
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM replays", [], |row| row.get(0))
                .map_err(|e| StorageError::read(e.to_string()))?;
            Ok(count as usize)
        })
        .await
    }

    /// Look up a single stored replay.
    pub async fn get(&self, id: &str) -> Result<Option<ReplayRecord>> {
        let conn = Arc::clone(&self.conn);
        let id = id.to_string();
        run_blocking(move || {
            let conn = conn.lock();
            conn.query_row(
                "SELECT id, format, players, log, uploadtime, rating FROM replays WHERE id = ?1",
                params![id],
                |row| {
                    let players: String = row.get(2)?;
                    Ok(ReplayRecord {
                        id: row.get(0)?,
                        format: row.get(1)?,
                        players: split_players(&players),
                        log: row.get(3)?,
                        uploadtime: row.get(4)?,
                        rating: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| StorageError::read(e.to_string()))
        })
        .await
    }
}

fn insert_blocking(conn: &mut Connection, records: &[ReplayRecord]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare_cached(INSERT_SQL)?;
        for record in records {
            inserted += stmt.execute(params![
                record.id,
                record.format,
                record.players_column(),
                record.log,
                record.uploadtime,
                record.rating,
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

fn split_players(column: &str) -> Vec<String> {
    column
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StorageError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, rating: Option<i64>) -> ReplayRecord {
        ReplayRecord {
            id: id.to_string(),
            format: "gen9vgc2024regh".to_string(),
            players: vec!["alice".to_string(), "bob".to_string()],
            log: "|j|alice\n|j|bob\n|win|alice".to_string(),
            uploadtime: 1_730_456_000,
            rating,
        }
    }

    #[tokio::test]
    async fn insert_batch_ignores_existing_ids() {
        let store = ReplayStore::open_in_memory().unwrap();

        let first = store
            .insert_batch(vec![record("r1", Some(1500)), record("r2", None)])
            .await
            .unwrap();
        assert_eq!(first, 2);

        let second = store
            .insert_batch(vec![record("r2", Some(1700)), record("r3", None)])
            .await
            .unwrap();
        assert_eq!(second, 1);
        assert_eq!(store.count().await.unwrap(), 3);

        // The first write wins.
        let r2 = store.get("r2").await.unwrap().unwrap();
        assert_eq!(r2.rating, None);
    }

    #[tokio::test]
    async fn stored_row_matches_record() {
        let store = ReplayStore::open_in_memory().unwrap();
        store.insert_batch(vec![record("r1", Some(1432))]).await.unwrap();

        let stored = store.get("r1").await.unwrap().unwrap();
        assert_eq!(stored, record("r1", Some(1432)));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn known_ids_reflect_table_contents() {
        let store = ReplayStore::open_in_memory().unwrap();
        assert!(store.known_ids().await.unwrap().is_empty());

        store
            .insert_batch(vec![record("a", None), record("b", None)])
            .await
            .unwrap();
        let known = store.known_ids().await.unwrap();
        assert_eq!(known.len(), 2);
        assert!(known.contains("a"));
        assert!(known.contains("b"));
    }

    #[tokio::test]
    async fn reopening_a_file_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("replays.db");

        {
            let store = ReplayStore::open(&path).unwrap();
            store.insert_batch(vec![record("r1", None)]).await.unwrap();
        }

        let reopened = ReplayStore::open(&path).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        assert!(reopened.known_ids().await.unwrap().contains("r1"));
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = ReplayStore::open_in_memory().unwrap();
        assert_eq!(store.insert_batch(Vec::new()).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
