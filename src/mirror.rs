//! Persistent local mirror of series data.
//!
//! Series are stored as JSON arrays in a single DuckDB table keyed by the
//! series key string (`kind::coin::range`). The database file lives in the
//! cache directory and survives restarts; an in-memory variant exists for
//! ephemeral sessions and tests.

use duckdb::{params, Connection as DuckDbConnection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config;
use crate::error::{MirrorError, Result};
use crate::models::{Series, SeriesKey, TimePoint};

/// Storage backend for mirrored series.
///
/// Implementations are synchronous; async callers go through [`run_blocking`].
pub trait SeriesStore: Send + Sync {
    /// Replace the whole stored series for `key`. The caller guarantees order.
    fn save(&self, key: &SeriesKey, series: &Series) -> Result<()>;

    /// Last saved series for `key`, or `None` on a cache miss.
    fn load(&self, key: &SeriesKey) -> Result<Option<Series>>;

    /// Merge `points` into the stored series by timestamp and persist the result.
    fn append(&self, key: &SeriesKey, points: Vec<TimePoint>) -> Result<()>;

    /// Drop every entry.
    fn clear(&self) -> Result<()>;
}

/// DuckDB-backed [`SeriesStore`].
pub struct Mirror {
    conn: Mutex<DuckDbConnection>,
    path: Option<PathBuf>,
}

impl Mirror {
    /// Open (or create) the mirror database inside `cache_dir`.
    ///
    /// If `cache_dir` is `None`, uses the platform-appropriate default cache directory.
    /// Any failure to create the directory or open the database is reported as
    /// [`MirrorError::StorageUnavailable`].
    pub fn open(cache_dir: Option<PathBuf>) -> Result<Self> {
        let dir = cache_dir.unwrap_or_else(config::default_cache_dir);
        fs::create_dir_all(&dir).map_err(|e| {
            MirrorError::StorageUnavailable(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(config::MIRROR_DB_FILE);
        let conn = DuckDbConnection::open(&path).map_err(|e| {
            MirrorError::StorageUnavailable(format!("cannot open {}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), "opened market mirror");
        Self::init(conn, Some(path))
    }

    /// Open a mirror that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = DuckDbConnection::open_in_memory()
            .map_err(|e| MirrorError::StorageUnavailable(e.to_string()))?;
        Self::init(conn, None)
    }

    fn init(conn: DuckDbConnection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\
               key VARCHAR PRIMARY KEY, \
               payload VARCHAR NOT NULL, \
               updated_at BIGINT NOT NULL\
             )",
            config::MIRROR_TABLE
        ))
        .map_err(|e| MirrorError::StorageUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file backing this mirror, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Every stored key, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT key FROM {} ORDER BY key",
            config::MIRROR_TABLE
        ))?;
        let mut rows = stmt.query([])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(row.get::<_, String>(0)?);
        }
        Ok(keys)
    }

    fn lock(&self) -> Result<MutexGuard<'_, DuckDbConnection>> {
        self.conn
            .lock()
            .map_err(|_| MirrorError::StorageUnavailable("mirror lock poisoned".into()))
    }

    /// Read a payload. A payload that no longer parses is removed and
    /// reported as a miss, so the next full fetch rewrites it.
    fn read(conn: &DuckDbConnection, key: &str) -> Result<Option<Series>> {
        let payload: Option<String> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT payload FROM {} WHERE key = ?",
                config::MIRROR_TABLE
            ))?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };

        let Some(payload) = payload else {
            return Ok(None);
        };

        match serde_json::from_str::<Series>(&payload) {
            Ok(series) => Ok(Some(series)),
            Err(e) => {
                tracing::warn!(key, error = %e, "corrupt mirror entry, removing");
                conn.execute(
                    &format!("DELETE FROM {} WHERE key = ?", config::MIRROR_TABLE),
                    params![key],
                )?;
                Ok(None)
            }
        }
    }

    fn write(conn: &DuckDbConnection, key: &str, series: &Series) -> Result<()> {
        let payload = serde_json::to_string(series)?;
        let updated_at = chrono::Utc::now().timestamp_millis();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, payload, updated_at) VALUES (?, ?, ?)",
                config::MIRROR_TABLE
            ),
            params![key, payload, updated_at],
        )?;
        Ok(())
    }
}

impl SeriesStore for Mirror {
    fn save(&self, key: &SeriesKey, series: &Series) -> Result<()> {
        let conn = self.lock()?;
        Self::write(&conn, &key.storage_key(), series)
    }

    fn load(&self, key: &SeriesKey) -> Result<Option<Series>> {
        let conn = self.lock()?;
        Self::read(&conn, &key.storage_key())
    }

    fn append(&self, key: &SeriesKey, points: Vec<TimePoint>) -> Result<()> {
        let storage_key = key.storage_key();
        // Held across read-merge-write so two appends cannot interleave.
        let conn = self.lock()?;
        let mut series = Self::read(&conn, &storage_key)?.unwrap_or_default();
        series.merge(points);
        Self::write(&conn, &storage_key, &series)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!("DELETE FROM {}", config::MIRROR_TABLE))?;
        tracing::info!("market mirror cleared");
        Ok(())
    }
}

/// Run a store operation on the blocking thread pool.
///
/// DuckDB calls are synchronous; this keeps them off the async event loop.
pub async fn run_blocking<F, T>(store: Arc<dyn SeriesStore>, f: F) -> Result<T>
where
    F: FnOnce(&dyn SeriesStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| MirrorError::StorageUnavailable(format!("Task join error: {e}")))?
}
