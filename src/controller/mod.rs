//! Refresh controller for one series at a time.
//!
//! A [`SeriesController`] owns the lifecycle of a single [`SeriesKey`]:
//! it seeds the view from the local mirror, catches up from the document
//! source, then keeps the view current with two timers (incremental tail
//! fetches and periodic full resyncs). At most one fetch runs per
//! controller; a trigger that arrives while one is running is skipped.
//!
//! [`SeriesView`] is the slot a UI binds to. Switching series tears the old
//! controller down and starts a new one while subscribers keep the same
//! receiver.

pub mod machine;
pub mod state;

pub use machine::{transition, Action, Event, FetchMode, Phase, Resume};
pub use state::{RefreshState, ViewState};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::bucket;
use crate::clock::Clock;
use crate::config::RefreshSettings;
use crate::error::MirrorError;
use crate::metrics::MetricsSink;
use crate::mirror::{run_blocking, SeriesStore};
use crate::models::{Series, SeriesKey, SeriesKind, TimePoint};
use crate::normalize::{normalize_documents, Normalized};
use crate::query::SeriesQuery;
use crate::source::DocumentSource;

/// Why a trigger did not start a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another fetch for this controller was still running.
    InFlight,
    /// The view is hidden.
    Hidden,
    /// The controller has been deactivated.
    TornDown,
    /// The current phase calls for no fetch.
    NotDue,
    /// The key can never be refreshed: a malformed coin, or an indicator
    /// series for a range that has no indicators.
    Unsupported,
}

/// How a triggered piece of work ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// New data was published; `points` is the size of the applied result.
    Applied { points: usize },
    /// The fetch succeeded but returned nothing.
    Empty,
    Skipped(SkipReason),
    /// The fetch failed; existing data was kept.
    Failed(String),
    /// The controller was torn down before the result could be applied.
    Discarded,
}

/// Handle to work started by a trigger.
///
/// Dropping it does not cancel the work.
#[derive(Debug)]
pub struct Pending {
    handle: Option<JoinHandle<FetchOutcome>>,
    skipped: SkipReason,
}

impl Pending {
    fn spawned(handle: JoinHandle<FetchOutcome>) -> Self {
        Self {
            handle: Some(handle),
            skipped: SkipReason::NotDue,
        }
    }

    fn skipped(reason: SkipReason) -> Self {
        Self {
            handle: None,
            skipped: reason,
        }
    }

    /// Whether the trigger started any work.
    pub fn is_scheduled(&self) -> bool {
        self.handle.is_some()
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.handle {
            Some(_) => None,
            None => Some(self.skipped),
        }
    }

    /// Wait for the work to finish.
    pub async fn outcome(self) -> FetchOutcome {
        match self.handle {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => FetchOutcome::Discarded,
                Err(e) => FetchOutcome::Failed(format!("fetch task panicked: {e}")),
            },
            None => FetchOutcome::Skipped(self.skipped),
        }
    }
}

/// Collaborators shared by every controller a view creates.
#[derive(Clone)]
pub struct ControllerDeps {
    /// Local mirror; `None` runs remote-only.
    pub store: Option<Arc<dyn SeriesStore>>,
    pub source: Arc<dyn DocumentSource>,
    pub metrics: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
    pub settings: RefreshSettings,
}

struct Shared {
    key: SeriesKey,
    source: Arc<dyn DocumentSource>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
    store: Mutex<Option<Arc<dyn SeriesStore>>>,
    state: Mutex<RefreshState>,
    cancelled: AtomicBool,
    view: Arc<watch::Sender<ViewState>>,
}

/// Clears `in_flight` when the owning task finishes or is aborted.
struct FlightGuard(Arc<Shared>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.state().in_flight = false;
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RefreshState> {
        // RefreshState holds plain values; a panic mid-update leaves nothing half-written.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self) -> Option<Arc<dyn SeriesStore>> {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Feed `event` to the transition table without any gating.
    fn apply(&self, event: Event) -> Option<Action> {
        let mut state = self.state();
        let (next, action) = machine::transition(state.phase, &event, self.settings.hidden_threshold);
        if next != state.phase {
            tracing::debug!(key = %self.key, from = ?state.phase, to = ?next, ?event, "phase change");
        }
        state.phase = next;
        action
    }

    /// Apply `update` to the view unless the controller is torn down.
    ///
    /// The cancellation check runs under the channel's write lock, and
    /// teardown sets the flag under the same lock, so a stale write can never
    /// land after the view has moved on to another controller.
    fn publish(&self, update: impl FnOnce(&mut ViewState)) -> bool {
        self.view.send_if_modified(|view| {
            if self.is_cancelled() {
                return false;
            }
            update(view);
            true
        })
    }

    /// Set the cancellation flag; returns whether it was already set.
    fn cancel(&self) -> bool {
        let mut already = false;
        self.view.send_if_modified(|_| {
            already = self.cancelled.swap(true, Ordering::SeqCst);
            false
        });
        already
    }

    fn storage_failed(&self, err: MirrorError) {
        let message = err.to_string();
        self.metrics.record_storage_error(&message);
        if err.is_storage_unavailable() {
            tracing::warn!(key = %self.key, error = %message, "local storage unavailable, continuing remote-only");
            *self.store.lock().unwrap_or_else(|e| e.into_inner()) = None;
        } else {
            tracing::warn!(key = %self.key, error = %message, "local storage operation failed");
        }
    }

    fn build_query(&self, mode: FetchMode, now: DateTime<Utc>, last_known: Option<DateTime<Utc>>) -> SeriesQuery {
        let range = self.key.range;
        let width = chrono::Duration::from_std(range.duration()).unwrap_or_else(|_| chrono::Duration::zero());
        let window_start = now - width;
        let query = SeriesQuery::for_key(&self.key);
        match mode {
            FetchMode::Full => query.since(window_start).limit(bucket::fetch_limit(range)),
            FetchMode::Incremental => {
                let query = match last_known {
                    Some(time) => query.after(time),
                    None => query.since(window_start),
                };
                query.limit(self.settings.incremental_batch)
            }
        }
    }

    async fn execute(self: Arc<Self>, action: Action) -> FetchOutcome {
        let _flight = FlightGuard(self.clone());
        match action {
            Action::LoadCache => self.initial_load().await,
            Action::Fetch(mode) => self.fetch(mode).await,
        }
    }

    async fn initial_load(&self) -> FetchOutcome {
        let cached = match self.store() {
            Some(store) => {
                let key = self.key.clone();
                match run_blocking(store, move |s| s.load(&key)).await {
                    Ok(cached) => {
                        self.metrics.record_cache_read();
                        cached
                    }
                    Err(e) => {
                        self.storage_failed(e);
                        None
                    }
                }
            }
            None => None,
        };
        if self.is_cancelled() {
            return FetchOutcome::Discarded;
        }

        let event = match cached.filter(|series| !series.is_empty()) {
            Some(series) => {
                tracing::info!(key = %self.key, points = series.len(), "seeded from local mirror");
                self.state().last_known = series.last_time();
                let shown = self.publish(|view| {
                    view.data = series;
                    view.loading = false;
                    view.error = None;
                });
                if !shown {
                    return FetchOutcome::Discarded;
                }
                Event::CacheHit
            }
            None => {
                tracing::info!(key = %self.key, "no local copy, loading full window");
                Event::CacheMiss
            }
        };

        match self.apply(event) {
            Some(Action::Fetch(mode)) => self.fetch(mode).await,
            _ => FetchOutcome::Skipped(SkipReason::NotDue),
        }
    }

    async fn fetch(&self, mode: FetchMode) -> FetchOutcome {
        let now = self.clock.now();
        let last_known = self.state().last_known;
        let query = self.build_query(mode, now, last_known);
        tracing::debug!(key = %self.key, ?mode, bound = ?query.bound(), limit = ?query.limit_value(), "fetching");

        let result = self.source.fetch(&query).await;
        if self.is_cancelled() {
            tracing::debug!(key = %self.key, ?mode, "discarding result after teardown");
            return FetchOutcome::Discarded;
        }

        let docs = match result {
            Ok(docs) => docs,
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(key = %self.key, ?mode, error = %message, "fetch failed");
                self.metrics.record_remote_error(&message);
                let shown = message.clone();
                self.publish(|view| {
                    view.loading = false;
                    view.error = Some(shown);
                });
                self.apply(Event::FetchFailed);
                return FetchOutcome::Failed(message);
            }
        };
        self.metrics.record_remote_read(docs.len());

        let Normalized { series, malformed } = normalize_documents(self.key.kind, &docs);
        if malformed > 0 {
            tracing::warn!(key = %self.key, malformed, "dropped malformed documents");
            self.metrics.record_malformed(malformed);
        }

        match mode {
            FetchMode::Full => self.apply_full(series, now).await,
            FetchMode::Incremental => self.apply_incremental(series.into_points(), now).await,
        }
    }

    async fn apply_full(&self, series: Series, now: DateTime<Utc>) -> FetchOutcome {
        if let Some(store) = self.store() {
            let key = self.key.clone();
            let snapshot = series.clone();
            match run_blocking(store, move |s| s.save(&key, &snapshot)).await {
                Ok(()) => self.metrics.record_cache_write(),
                Err(e) => self.storage_failed(e),
            }
        }
        if self.is_cancelled() {
            return FetchOutcome::Discarded;
        }

        let points = series.len();
        let newest = series.last_time();
        let shown = self.publish(|view| {
            view.data = series;
            view.loading = false;
            view.error = None;
        });
        if !shown {
            return FetchOutcome::Discarded;
        }
        {
            let mut state = self.state();
            state.last_known = newest;
            state.last_full_sync_at = Some(now);
        }
        self.apply(Event::FullSynced);
        self.metrics.record_full_fetch(now);
        tracing::info!(key = %self.key, points, "full sync applied");

        if points == 0 {
            FetchOutcome::Empty
        } else {
            FetchOutcome::Applied { points }
        }
    }

    async fn apply_incremental(&self, points: Vec<TimePoint>, now: DateTime<Utc>) -> FetchOutcome {
        self.metrics.record_incremental_fetch(now);
        if points.is_empty() {
            return FetchOutcome::Empty;
        }

        if let Some(store) = self.store() {
            let key = self.key.clone();
            let batch = points.clone();
            match run_blocking(store, move |s| s.append(&key, batch)).await {
                Ok(()) => self.metrics.record_cache_write(),
                Err(e) => self.storage_failed(e),
            }
        }
        if self.is_cancelled() {
            return FetchOutcome::Discarded;
        }

        let count = points.len();
        let mut newest = None;
        let shown = self.publish(|view| {
            view.data.merge(points);
            view.loading = false;
            view.error = None;
            newest = view.data.last_time();
        });
        if !shown {
            return FetchOutcome::Discarded;
        }
        {
            let mut state = self.state();
            if newest > state.last_known {
                state.last_known = newest;
            }
        }
        tracing::debug!(key = %self.key, points = count, "incremental batch merged");
        FetchOutcome::Applied { points: count }
    }
}

/// Run `event` through the transition table and start the resulting action.
///
/// The skip decision and the `in_flight` claim happen under one lock, so two
/// triggers can never both start a fetch.
fn dispatch(shared: &Arc<Shared>, event: Event) -> Pending {
    if shared.is_cancelled() {
        return Pending::skipped(SkipReason::TornDown);
    }
    let action = {
        let mut state = shared.state();
        let (next, action) = machine::transition(state.phase, &event, shared.settings.hidden_threshold);
        state.phase = next;
        match action {
            None if !state.visible => return Pending::skipped(SkipReason::Hidden),
            None => return Pending::skipped(SkipReason::NotDue),
            Some(Action::Fetch(_)) if !state.visible => return Pending::skipped(SkipReason::Hidden),
            Some(_) if state.in_flight => return Pending::skipped(SkipReason::InFlight),
            Some(action) => {
                state.in_flight = true;
                action
            }
        }
    };
    tracing::debug!(key = %shared.key, ?event, ?action, "dispatching");
    Pending::spawned(tokio::spawn(shared.clone().execute(action)))
}

fn unsupported(key: &SeriesKey) -> Option<String> {
    if let Err(e) = key.validate() {
        return Some(e.to_string());
    }
    if key.kind == SeriesKind::Indicators && !bucket::indicators_available(key.range) {
        return Some(format!("Indicators are not available for range {}", key.range));
    }
    None
}

async fn run_timers(shared: Arc<Shared>) {
    let poll = shared.settings.poll_interval.max(Duration::from_millis(1));
    let resync = shared.settings.resync_interval.max(Duration::from_millis(1));
    let mut incremental = interval_at(Instant::now() + poll, poll);
    incremental.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut full = interval_at(Instant::now() + resync, resync);
    full.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let event = tokio::select! {
            _ = incremental.tick() => Event::IncrementalDue,
            _ = full.tick() => Event::ResyncDue,
        };
        if shared.is_cancelled() {
            break;
        }
        shared.metrics.record_polling_event();
        let pending = dispatch(&shared, event);
        if let Some(reason) = pending.skip_reason() {
            tracing::trace!(key = %shared.key, ?event, ?reason, "timer tick skipped");
        }
    }
}

/// Lifecycle owner for one series key.
pub struct SeriesController {
    shared: Arc<Shared>,
    timers: Option<JoinHandle<()>>,
}

impl SeriesController {
    /// Activate a controller for `key`, publishing into `view`.
    ///
    /// Must be called from within a Tokio runtime. The returned [`Pending`]
    /// tracks the initial load (cache read plus first fetch).
    ///
    /// A key that can never be refreshed publishes an error, starts no timers
    /// and issues no fetch; the returned [`Pending`] is skipped with
    /// [`SkipReason::Unsupported`].
    pub fn spawn(key: SeriesKey, deps: ControllerDeps, view: Arc<watch::Sender<ViewState>>) -> (Self, Pending) {
        let shared = Arc::new(Shared {
            key,
            source: deps.source,
            metrics: deps.metrics,
            clock: deps.clock,
            settings: deps.settings,
            store: Mutex::new(deps.store),
            state: Mutex::new(RefreshState::default()),
            cancelled: AtomicBool::new(false),
            view,
        });
        if let Some(reason) = unsupported(&shared.key) {
            tracing::warn!(key = %shared.key, %reason, "series cannot be refreshed");
            shared.view.send_replace(ViewState {
                data: Series::new(),
                loading: false,
                error: Some(reason),
            });
            return (
                Self { shared, timers: None },
                Pending::skipped(SkipReason::Unsupported),
            );
        }
        tracing::info!(key = %shared.key, "activating controller");

        shared.view.send_replace(ViewState {
            data: Series::new(),
            loading: true,
            error: None,
        });
        let initial = dispatch(&shared, Event::Activate);
        let timers = tokio::spawn(run_timers(shared.clone()));

        (
            Self {
                shared,
                timers: Some(timers),
            },
            initial,
        )
    }

    pub fn key(&self) -> &SeriesKey {
        &self.shared.key
    }

    /// Snapshot of the controller's bookkeeping.
    pub fn state(&self) -> RefreshState {
        self.shared.state().clone()
    }

    pub fn view(&self) -> ViewState {
        self.shared.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.shared.view.subscribe()
    }

    /// Whether local storage is still in use.
    pub fn has_store(&self) -> bool {
        self.shared.store().is_some()
    }

    pub fn is_active(&self) -> bool {
        !self.shared.is_cancelled()
    }

    /// Trigger a fetch as if the matching timer had fired.
    pub fn trigger(&self, mode: FetchMode) -> Pending {
        let event = match mode {
            FetchMode::Incremental => Event::IncrementalDue,
            FetchMode::Full => Event::ResyncDue,
        };
        dispatch(&self.shared, event)
    }

    /// Report a visibility change.
    ///
    /// Hiding suppresses timer fetches. Becoming visible after more than the
    /// hidden threshold starts a full resync; a first load that never
    /// succeeded is retried regardless of how long the view was hidden.
    pub fn set_visible(&self, visible: bool) -> Pending {
        if self.shared.is_cancelled() {
            return Pending::skipped(SkipReason::TornDown);
        }
        let event = {
            let mut state = self.shared.state();
            if state.visible == visible {
                return Pending::skipped(SkipReason::NotDue);
            }
            let now = self.shared.clock.now();
            self.shared.metrics.record_visibility(visible, now);
            state.visible = visible;
            if visible {
                let hidden_for = state
                    .last_hidden_at
                    .take()
                    .and_then(|at| (now - at).to_std().ok())
                    .unwrap_or(Duration::ZERO);
                Event::Visible { hidden_for }
            } else {
                state.last_hidden_at = Some(now);
                Event::Hidden
            }
        };
        tracing::debug!(key = %self.shared.key, visible, "visibility changed");
        dispatch(&self.shared, event)
    }

    /// Stop timers and make every outstanding fetch a no-op.
    ///
    /// Idempotent. A fetch already on the wire completes but its result is
    /// discarded.
    pub fn deactivate(&mut self) {
        if self.shared.cancel() {
            return;
        }
        if let Some(timers) = self.timers.take() {
            timers.abort();
        }
        self.shared.apply(Event::Deactivate);
        tracing::info!(key = %self.shared.key, "controller torn down");
    }
}

impl Drop for SeriesController {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// The slot a chart binds to: at most one active controller, one stream of
/// view updates.
pub struct SeriesView {
    deps: ControllerDeps,
    view: Arc<watch::Sender<ViewState>>,
    active: Option<SeriesController>,
    visible: bool,
}

impl SeriesView {
    pub fn new(deps: ControllerDeps) -> Self {
        let (view, _) = watch::channel(ViewState::default());
        Self {
            deps,
            view: Arc::new(view),
            active: None,
            visible: true,
        }
    }

    /// Show `key`, replacing whatever was active.
    ///
    /// Re-activating the current key is a no-op.
    pub fn activate(&mut self, key: SeriesKey) -> Pending {
        if self.active_key() == Some(&key) {
            return Pending::skipped(SkipReason::NotDue);
        }
        self.deactivate();
        let (controller, initial) = SeriesController::spawn(key, self.deps.clone(), self.view.clone());
        if !self.visible {
            controller.set_visible(false);
        }
        self.active = Some(controller);
        initial
    }

    pub fn deactivate(&mut self) {
        if let Some(mut controller) = self.active.take() {
            controller.deactivate();
        }
    }

    pub fn set_visible(&mut self, visible: bool) -> Pending {
        self.visible = visible;
        match &self.active {
            Some(controller) => controller.set_visible(visible),
            None => Pending::skipped(SkipReason::NotDue),
        }
    }

    /// Receiver that keeps working across [`activate`](Self::activate) calls.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view.subscribe()
    }

    pub fn current(&self) -> ViewState {
        self.view.borrow().clone()
    }

    pub fn active_key(&self) -> Option<&SeriesKey> {
        self.active.as_ref().map(SeriesController::key)
    }

    pub fn controller(&self) -> Option<&SeriesController> {
        self.active.as_ref()
    }
}
