#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local persistence is not available; callers fall back to remote-only.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Remote fetch failed: {0}")]
    RemoteFetch(String),

    #[error("Malformed point: {0}")]
    MalformedPoint(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl MirrorError {
    /// True for failures of the local store itself (as opposed to bad data).
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, MirrorError::StorageUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
