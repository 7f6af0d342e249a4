use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bucket::{self, Bucket};
use crate::controller::machine::Phase;
use crate::models::{RangeId, Series, TimePoint};

/// Bookkeeping owned by exactly one controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshState {
    pub phase: Phase,
    /// Newest timestamp merged so far; lower bound of the next incremental fetch.
    pub last_known: Option<DateTime<Utc>>,
    pub in_flight: bool,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub last_hidden_at: Option<DateTime<Utc>>,
    pub visible: bool,
}

impl Default for RefreshState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            last_known: None,
            in_flight: false,
            last_full_sync_at: None,
            last_hidden_at: None,
            visible: true,
        }
    }
}

/// What the view layer renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub data: Series,
    pub loading: bool,
    pub error: Option<String>,
}

impl ViewState {
    /// `data` downsampled to the display granularity of `range`.
    pub fn bucketed(&self, range: RangeId) -> Vec<TimePoint> {
        bucket::aggregate(self.data.points(), Bucket::for_range(range))
    }
}
