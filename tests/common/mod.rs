//! Shared test fixtures for the market-mirror integration tests.
//!
//! Provides a scripted [`MockSource`] (recorded queries, optional gate so a
//! test can hold a fetch open), a [`BrokenStore`] that always reports storage
//! as unavailable, and helpers for building documents, points and controller
//! dependencies around a [`ManualClock`].

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use market_mirror::config::RefreshSettings;
use market_mirror::controller::{ControllerDeps, ViewState};
use market_mirror::query::canonical_time;
use market_mirror::{
    DocumentSource, ManualClock, MetricsSink, MirrorError, Monitor, Result, Series, SeriesKey,
    SeriesQuery, SeriesStore, TimePoint,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// 2024-01-01T12:00:00Z, the reference "now" for most tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// `t0()` shifted by `secs` seconds (negative for the past).
pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + ChronoDuration::seconds(secs)
}

pub fn point(secs: i64, value: f64) -> TimePoint {
    TimePoint::new(at(secs), value).unwrap()
}

pub fn series(points: &[(i64, f64)]) -> Series {
    Series::from_unsorted(points.iter().map(|(s, v)| point(*s, *v)).collect())
}

/// A history document as the remote store returns it.
pub fn history_doc(secs: i64, close: f64) -> Value {
    json!({ "time": canonical_time(at(secs)), "close": close })
}

pub fn values(series: &Series) -> Vec<f64> {
    series.points().iter().map(|p| p.value).collect()
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

pub enum Reply {
    Docs(Vec<Value>),
    Fail(String),
}

/// Scripted document source.
///
/// Each fetch records its query and pops the next scripted reply (an empty
/// result once the script runs out). A gated source then waits for a permit
/// released through [`MockSource::release`] before answering.
pub struct MockSource {
    replies: Mutex<VecDeque<Reply>>,
    queries: Mutex<Vec<SeriesQuery>>,
    gate: Option<Semaphore>,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn reply(&self, docs: Vec<Value>) {
        self.replies.lock().unwrap().push_back(Reply::Docs(docs));
    }

    pub fn fail(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Fail(message.to_string()));
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn queries(&self) -> Vec<SeriesQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentSource for MockSource {
    async fn fetch(&self, query: &SeriesQuery) -> Result<Vec<Value>> {
        self.queries.lock().unwrap().push(query.clone());
        let reply = self.replies.lock().unwrap().pop_front();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        match reply {
            Some(Reply::Docs(docs)) => Ok(docs),
            Some(Reply::Fail(message)) => Err(MirrorError::RemoteFetch(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// Wait until `source` has seen at least `n` queries.
pub async fn wait_for_queries(source: &MockSource, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while source.query_count() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("timed out waiting for queries");
}

// ---------------------------------------------------------------------------
// BrokenStore
// ---------------------------------------------------------------------------

/// Store whose every operation fails as if the database were gone.
pub struct BrokenStore;

impl SeriesStore for BrokenStore {
    fn save(&self, _key: &SeriesKey, _series: &Series) -> Result<()> {
        Err(MirrorError::StorageUnavailable("disk gone".into()))
    }

    fn load(&self, _key: &SeriesKey) -> Result<Option<Series>> {
        Err(MirrorError::StorageUnavailable("disk gone".into()))
    }

    fn append(&self, _key: &SeriesKey, _points: Vec<TimePoint>) -> Result<()> {
        Err(MirrorError::StorageUnavailable("disk gone".into()))
    }

    fn clear(&self) -> Result<()> {
        Err(MirrorError::StorageUnavailable("disk gone".into()))
    }
}

// ---------------------------------------------------------------------------
// Controller wiring
// ---------------------------------------------------------------------------

/// Settings whose timers never fire within a real-time test.
pub fn quiet_settings() -> RefreshSettings {
    RefreshSettings {
        poll_interval: Duration::from_secs(3600),
        resync_interval: Duration::from_secs(86_400),
        ..RefreshSettings::default()
    }
}

pub struct Harness {
    pub deps: ControllerDeps,
    pub source: Arc<MockSource>,
    pub clock: Arc<ManualClock>,
    pub monitor: Arc<Monitor>,
}

pub fn harness(
    store: Option<Arc<dyn SeriesStore>>,
    source: MockSource,
    settings: RefreshSettings,
) -> Harness {
    let source = Arc::new(source);
    let clock = Arc::new(ManualClock::new(t0()));
    let monitor = Arc::new(Monitor::new());
    let metrics: Arc<dyn MetricsSink> = monitor.clone();
    let deps = ControllerDeps {
        store,
        source: source.clone(),
        metrics,
        clock: clock.clone(),
        settings,
    };
    Harness {
        deps,
        source,
        clock,
        monitor,
    }
}

/// Wait for a published state matching `pred` and return a copy of it.
pub async fn wait_for_view(
    rx: &mut watch::Receiver<ViewState>,
    pred: impl Fn(&ViewState) -> bool,
) -> ViewState {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let current = rx.borrow_and_update();
                if pred(&current) {
                    return current.clone();
                }
            }
            rx.changed().await.expect("view sender dropped");
        }
    })
    .await
    .expect("timed out waiting for view state")
}
