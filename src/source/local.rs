//! Document source backed by an in-process DuckDB table.
//!
//! Exported collections (newline-delimited JSON, one document per line) are
//! loaded into a single `(collection, time, doc)` table and answered with the
//! SQL rendering of [`SeriesQuery`]. Used for offline replay and fixtures.

use async_trait::async_trait;
use duckdb::{params, Connection as DuckDbConnection};
use serde_json::Value;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config;
use crate::error::{MirrorError, Result};
use crate::normalize::parse_time;
use crate::query::{canonical_time, SeriesQuery};
use crate::source::DocumentSource;

const TABLE: &str = "documents";

pub struct LocalDocumentSource {
    conn: Arc<Mutex<DuckDbConnection>>,
}

impl LocalDocumentSource {
    /// Open an empty in-memory document table.
    pub fn new() -> Result<Self> {
        let conn = DuckDbConnection::open_in_memory()?;
        conn.execute_batch(&format!(
            "CREATE TABLE {} (collection VARCHAR NOT NULL, \"{}\" VARCHAR, doc VARCHAR NOT NULL)",
            TABLE,
            config::TIME_FIELD
        ))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert documents under `collection_path` (e.g. `crypto_prices/BTCUSDT/history_yahoo`).
    ///
    /// The time column is stored in canonical form so string comparison
    /// matches time order; documents without a parseable time get `NULL`
    /// and only show up in unbounded queries.
    pub fn insert_documents(&self, collection_path: &str, docs: &[Value]) -> Result<usize> {
        let conn = self.lock()?;
        for doc in docs {
            let time = doc
                .get(config::TIME_FIELD)
                .and_then(parse_time)
                .map(canonical_time);
            conn.execute(
                &format!("INSERT INTO {} VALUES (?, ?, ?)", TABLE),
                params![collection_path, time, doc.to_string()],
            )?;
        }
        Ok(docs.len())
    }

    /// Load a newline-delimited JSON export into `collection_path`.
    pub fn load_ndjson<P: AsRef<Path>>(&self, collection_path: &str, path: P) -> Result<usize> {
        let reader = BufReader::new(fs::File::open(path.as_ref())?);
        let mut docs = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            docs.push(serde_json::from_str::<Value>(&line)?);
        }
        let count = self.insert_documents(collection_path, &docs)?;
        tracing::info!(
            collection = collection_path,
            documents = count,
            path = %path.as_ref().display(),
            "loaded ndjson export"
        );
        Ok(count)
    }

    /// Number of documents stored under `collection_path`.
    pub fn count(&self, collection_path: &str) -> Result<usize> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT COUNT(*) FROM {} WHERE collection = ?",
            TABLE
        ))?;
        let mut rows = stmt.query(params![collection_path])?;
        match rows.next()? {
            Some(row) => Ok(row.get::<_, i64>(0)? as usize),
            None => Ok(0),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DuckDbConnection>> {
        self.conn
            .lock()
            .map_err(|_| MirrorError::InvalidArgument("document table lock poisoned".into()))
    }
}

fn run_query(conn: &DuckDbConnection, query: &SeriesQuery) -> Result<Vec<Value>> {
    let (sql, params) = query.build_sql(TABLE);
    let mut stmt = conn.prepare(&sql)?;
    let param_values: Vec<&dyn duckdb::ToSql> =
        params.iter().map(|p| p as &dyn duckdb::ToSql).collect();

    let mut rows = stmt.query(param_values.as_slice())?;
    let mut docs = Vec::new();
    while let Some(row) = rows.next()? {
        let raw: String = row.get(0)?;
        docs.push(serde_json::from_str(&raw)?);
    }
    Ok(docs)
}

#[async_trait]
impl DocumentSource for LocalDocumentSource {
    async fn fetch(&self, query: &SeriesQuery) -> Result<Vec<Value>> {
        let conn = self.conn.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| MirrorError::InvalidArgument("document table lock poisoned".into()))?;
            run_query(&guard, &query)
        })
        .await
        .map_err(|e| MirrorError::RemoteFetch(format!("Task join error: {e}")))?
    }
}
