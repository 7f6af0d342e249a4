//! Display granularity for a range and the matching remote page-size ceiling.
//!
//! | Range up to | Bucket | Indicators |
//! |---|---|---|
//! | 24h | minute | yes |
//! | 1 month | hour | no |
//! | longer | day | no |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::{RangeId, TimePoint};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const MONTH: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    TenSeconds,
    Minute,
    Hour,
    Day,
}

impl Bucket {
    /// Granularity used to display `range`.
    pub fn for_range(range: RangeId) -> Self {
        let width = range.duration();
        if width <= DAY {
            Bucket::Minute
        } else if width <= MONTH {
            Bucket::Hour
        } else {
            Bucket::Day
        }
    }

    pub fn width(&self) -> Duration {
        match self {
            Bucket::TenSeconds => Duration::from_secs(10),
            Bucket::Minute => Duration::from_secs(60),
            Bucket::Hour => HOUR,
            Bucket::Day => DAY,
        }
    }

    /// Floor `time` to the start of its bucket (UTC).
    pub fn floor(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let width = self.width().as_secs() as i64;
        let secs = time.timestamp();
        let floored = secs - secs.rem_euclid(width);
        DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(time)
    }
}

/// Downsample `points` to one point per bucket.
///
/// Each output point carries its bucket start as `time`; within a bucket the
/// point with the latest original timestamp wins. Output is ascending.
pub fn aggregate(points: &[TimePoint], bucket: Bucket) -> Vec<TimePoint> {
    let mut buckets: BTreeMap<DateTime<Utc>, (DateTime<Utc>, &TimePoint)> = BTreeMap::new();

    for point in points {
        let start = bucket.floor(point.time);
        match buckets.get(&start) {
            Some((seen, _)) if *seen >= point.time => {}
            _ => {
                buckets.insert(start, (point.time, point));
            }
        }
    }

    buckets
        .into_iter()
        .map(|(start, (_, point))| TimePoint {
            time: start,
            ..point.clone()
        })
        .collect()
}

/// Result-size ceiling for a full fetch of `range`.
pub fn fetch_limit(range: RangeId) -> usize {
    let width = range.duration();
    if width <= HOUR {
        500
    } else if width <= 6 * HOUR {
        2000
    } else if width <= DAY {
        5000
    } else {
        15000
    }
}

/// Indicator series are only kept at minute resolution.
pub fn indicators_available(range: RangeId) -> bool {
    Bucket::for_range(range) == Bucket::Minute
}
