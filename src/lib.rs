//! Local-first market data mirror for Rust.
//!
//! Keeps price history and technical-indicator series for a set of coins in
//! a local DuckDB mirror, serves them to views immediately, and keeps them
//! current against a remote document store with incremental tail fetches
//! and periodic full resyncs.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use market_mirror::{FirestoreSource, MarketMirror, RangeId, SeriesKey};
//!
//! # async fn run() -> market_mirror::Result<()> {
//! let source = FirestoreSource::new("my-project", Duration::from_secs(30))?;
//! let mirror = MarketMirror::builder().source(Arc::new(source)).build()?;
//!
//! let mut view = mirror.view();
//! let mut updates = view.subscribe();
//! view.activate(SeriesKey::history("BTCUSDT", RangeId::Hour24));
//!
//! while updates.changed().await.is_ok() {
//!     let state = updates.borrow().clone();
//!     println!("{} points, loading={}", state.data.len(), state.loading);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod mirror;
pub mod models;
pub mod normalize;
pub mod provider;
pub mod query;
pub mod source;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RefreshSettings;
pub use controller::{
    ControllerDeps, FetchMode, FetchOutcome, Pending, SeriesController, SeriesView, SkipReason,
    ViewState,
};
pub use error::{MirrorError, Result};
pub use metrics::{MetricsSink, Monitor, MonitorSnapshot, NoopMetrics};
pub use mirror::{Mirror, SeriesStore};
pub use models::{Change, RangeId, Series, SeriesKey, SeriesKind, TimePoint};
pub use provider::CoinGeckoClient;
pub use query::SeriesQuery;
pub use source::{DocumentSource, FirestoreSource, LocalDocumentSource};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// MarketMirrorBuilder
// ---------------------------------------------------------------------------

/// Builder for configuring and constructing a [`MarketMirror`].
///
/// Use [`MarketMirror::builder()`] to obtain a builder, chain configuration
/// methods, and call [`build()`](MarketMirrorBuilder::build).
pub struct MarketMirrorBuilder {
    cache_dir: Option<PathBuf>,
    ephemeral: bool,
    no_cache: bool,
    settings: RefreshSettings,
    source: Option<Arc<dyn DocumentSource>>,
    monitor: Option<Arc<Monitor>>,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for MarketMirrorBuilder {
    fn default() -> Self {
        Self {
            cache_dir: None,
            ephemeral: false,
            no_cache: false,
            settings: RefreshSettings::default(),
            source: None,
            monitor: None,
            clock: None,
        }
    }
}

impl MarketMirrorBuilder {
    /// Set the directory holding the mirror database.
    ///
    /// If not set, the platform cache directory is used
    /// (e.g. `~/.cache/market-mirror` on Linux).
    pub fn cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Keep the mirror in memory only. Defaults to `false`.
    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// Run without a local mirror at all. Defaults to `false`.
    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn settings(mut self, settings: RefreshSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Remote document store. Required.
    pub fn source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Share an existing monitor instead of creating a fresh one.
    pub fn monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Override the wall clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the mirror, opening the local database.
    ///
    /// If the database cannot be opened the mirror is built remote-only and
    /// a warning is logged; only configuration errors fail the build.
    pub fn build(self) -> Result<MarketMirror> {
        let source = self
            .source
            .ok_or_else(|| MirrorError::InvalidArgument("a document source is required".into()))?;
        validate(&self.settings)?;

        let store = if self.no_cache {
            None
        } else {
            let opened = if self.ephemeral {
                Mirror::open_in_memory()
            } else {
                Mirror::open(self.cache_dir)
            };
            match opened {
                Ok(mirror) => Some(Arc::new(mirror)),
                Err(e) if e.is_storage_unavailable() => {
                    tracing::warn!(error = %e, "local mirror unavailable, running remote-only");
                    None
                }
                Err(e) => return Err(e),
            }
        };

        Ok(MarketMirror {
            store,
            source,
            monitor: self.monitor.unwrap_or_default(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            settings: self.settings,
        })
    }
}

fn validate(settings: &RefreshSettings) -> Result<()> {
    if settings.poll_interval.is_zero() || settings.resync_interval.is_zero() {
        return Err(MirrorError::InvalidArgument(
            "refresh intervals must be non-zero".into(),
        ));
    }
    if settings.incremental_batch == 0 {
        return Err(MirrorError::InvalidArgument(
            "incremental batch must be at least 1".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MarketMirror
// ---------------------------------------------------------------------------

/// Top-level handle: owns the local mirror, the remote source, the monitor,
/// and hands out [`SeriesView`] slots.
///
/// Created via [`MarketMirror::builder()`].
pub struct MarketMirror {
    store: Option<Arc<Mirror>>,
    source: Arc<dyn DocumentSource>,
    monitor: Arc<Monitor>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
}

impl MarketMirror {
    pub fn builder() -> MarketMirrorBuilder {
        MarketMirrorBuilder::default()
    }

    /// Collaborators handed to every controller.
    pub fn deps(&self) -> ControllerDeps {
        ControllerDeps {
            store: self.store.clone().map(|m| m as Arc<dyn SeriesStore>),
            source: self.source.clone(),
            metrics: self.monitor.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
        }
    }

    /// A new, empty view slot. Activate a key on it to start refreshing.
    pub fn view(&self) -> SeriesView {
        SeriesView::new(self.deps())
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// The local mirror, `None` when running remote-only.
    pub fn mirror(&self) -> Option<&Mirror> {
        self.store.as_deref()
    }

    pub fn is_remote_only(&self) -> bool {
        self.store.is_none()
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Remove every series from the local mirror.
    ///
    /// Views already showing data keep it until their next full resync.
    pub fn clear_cache(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.clear()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for MarketMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = match &self.store {
            Some(mirror) => match mirror.path() {
                Some(path) => path.display().to_string(),
                None => "memory".to_string(),
            },
            None => "none".to_string(),
        };
        write!(
            f,
            "MarketMirror(store={}, poll={:?}, resync={:?})",
            location, self.settings.poll_interval, self.settings.resync_interval
        )
    }
}
