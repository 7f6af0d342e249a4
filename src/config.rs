use std::path::PathBuf;
use std::time::Duration;

pub const FIRESTORE_BASE: &str = "https://firestore.googleapis.com/v1";
pub const COINGECKO_BASE: &str = "https://api.coingecko.com/api/v3";

/// File name of the persistent mirror inside the cache directory.
pub const MIRROR_DB_FILE: &str = "market_cache.duckdb";
pub const MIRROR_TABLE: &str = "market_data";
pub const KEY_SEPARATOR: &str = "::";

// Remote collection layout: crypto_prices/{coin}/{subcollection}/{doc}
pub const ROOT_COLLECTION: &str = "crypto_prices";
pub const HISTORY_COLLECTION: &str = "history_yahoo";
pub const INDICATOR_COLLECTION: &str = "indicatori";

/// Indexed timestamp field every series document carries.
pub const TIME_FIELD: &str = "time";

pub const MAX_RECORDED_ERRORS: usize = 100;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_HIDDEN_THRESHOLD: Duration = Duration::from_secs(60);
pub const DEFAULT_INCREMENTAL_BATCH: usize = 50;

/// Timing and sizing knobs for the refresh controller.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Period of the incremental tail-fetch timer.
    pub poll_interval: Duration,
    /// Period of the authoritative full resync timer.
    pub resync_interval: Duration,
    /// Hidden time after which becoming visible forces a full resync.
    pub hidden_threshold: Duration,
    /// Maximum number of points requested per incremental fetch.
    pub incremental_batch: usize,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            hidden_threshold: DEFAULT_HIDDEN_THRESHOLD,
            incremental_batch: DEFAULT_INCREMENTAL_BATCH,
        }
    }
}

pub fn default_cache_dir() -> PathBuf {
    if let Some(cache) = dirs::cache_dir() {
        cache.join("market-mirror")
    } else {
        PathBuf::from(".market-mirror-cache")
    }
}
