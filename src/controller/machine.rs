//! Transition table for one series controller.
//!
//! Every decision about what to fetch lives in [`transition`]; the
//! controller only feeds it events and performs the returned action.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchMode {
    /// Tail fetch of points newer than the last known timestamp.
    Incremental,
    /// Authoritative re-fetch of the whole range window.
    Full,
}

/// Phase to return to when the view becomes visible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resume {
    InitialLoad,
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    InitialLoad,
    Polling,
    Suspended { resume: Resume },
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Activate,
    CacheHit,
    CacheMiss,
    FullSynced,
    FetchFailed,
    IncrementalDue,
    ResyncDue,
    Hidden,
    Visible { hidden_for: Duration },
    Deactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LoadCache,
    Fetch(FetchMode),
}

/// Next phase and the action to perform, if any.
///
/// A failed first load stays in `InitialLoad` and ignores timer ticks; only
/// a visibility restore retries it. In `Polling`, becoming visible forces a
/// full resync only when the view was hidden longer than `hidden_threshold`.
pub fn transition(phase: Phase, event: &Event, hidden_threshold: Duration) -> (Phase, Option<Action>) {
    use Action::*;
    use Event::*;
    use FetchMode::*;

    match (phase, event) {
        (_, Deactivate) => (Phase::TornDown, None),
        (Phase::TornDown, _) => (Phase::TornDown, None),

        (Phase::Idle, Activate) => (Phase::InitialLoad, Some(LoadCache)),
        (Phase::Idle, _) => (Phase::Idle, None),

        (Phase::InitialLoad, CacheHit) => (Phase::Polling, Some(Fetch(Incremental))),
        (Phase::InitialLoad, CacheMiss) => (Phase::InitialLoad, Some(Fetch(Full))),
        (Phase::InitialLoad, FullSynced) => (Phase::Polling, None),
        (Phase::InitialLoad, Hidden) => (
            Phase::Suspended {
                resume: Resume::InitialLoad,
            },
            None,
        ),
        (Phase::InitialLoad, _) => (Phase::InitialLoad, None),

        (Phase::Polling, IncrementalDue) => (Phase::Polling, Some(Fetch(Incremental))),
        (Phase::Polling, ResyncDue) => (Phase::Polling, Some(Fetch(Full))),
        (Phase::Polling, Hidden) => (
            Phase::Suspended {
                resume: Resume::Polling,
            },
            None,
        ),
        (Phase::Polling, _) => (Phase::Polling, None),

        (Phase::Suspended { resume }, Visible { hidden_for }) => match resume {
            Resume::InitialLoad => (Phase::InitialLoad, Some(Fetch(Full))),
            Resume::Polling if *hidden_for > hidden_threshold => {
                (Phase::Polling, Some(Fetch(Full)))
            }
            Resume::Polling => (Phase::Polling, None),
        },
        // A load that started before the view was hidden still completes.
        (Phase::Suspended { .. }, CacheHit) => (
            Phase::Suspended {
                resume: Resume::Polling,
            },
            Some(Fetch(Incremental)),
        ),
        (Phase::Suspended { .. }, CacheMiss) => (
            Phase::Suspended {
                resume: Resume::InitialLoad,
            },
            Some(Fetch(Full)),
        ),
        (Phase::Suspended { .. }, FullSynced) => (
            Phase::Suspended {
                resume: Resume::Polling,
            },
            None,
        ),
        (Phase::Suspended { resume }, _) => (Phase::Suspended { resume }, None),
    }
}
