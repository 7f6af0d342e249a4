use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MirrorError, Result};

// ---------------------------------------------------------------------------
// TimePoint: one timestamped reading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub time: DateTime<Utc>,
    pub value: f64,
    /// Extra indicator readings (`ema20`, `rsi14`, ...). Empty for price history.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub readings: BTreeMap<String, f64>,
}

impl TimePoint {
    /// Build a point, rejecting non-finite values.
    pub fn new(time: DateTime<Utc>, value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(MirrorError::MalformedPoint(format!(
                "non-finite value {} at {}",
                value,
                time.to_rfc3339()
            )));
        }
        Ok(Self {
            time,
            value,
            readings: BTreeMap::new(),
        })
    }

    /// Build a point from an RFC 3339 timestamp string.
    pub fn parse(time: &str, value: f64) -> Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(time)
            .map_err(|e| MirrorError::MalformedPoint(format!("bad timestamp '{}': {}", time, e)))?;
        Self::new(parsed.with_timezone(&Utc), value)
    }

    /// Attach an extra reading. Non-finite readings are ignored.
    pub fn with_reading(mut self, name: impl Into<String>, value: f64) -> Self {
        if value.is_finite() {
            self.readings.insert(name.into(), value);
        }
        self
    }

    pub fn reading(&self, name: &str) -> Option<f64> {
        self.readings.get(name).copied()
    }
}

// ---------------------------------------------------------------------------
// Change: difference between a live price and the start of a series
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub diff: f64,
    pub pct: f64,
}

// ---------------------------------------------------------------------------
// Series: ascending, timestamp-unique sequence of points
// ---------------------------------------------------------------------------

/// Ordered points for one series key.
///
/// Every path that combines points (`merge`, `from_unsorted`) keeps the
/// points strictly ascending by time; a later point replaces an earlier one
/// with the same timestamp. Deserialized series are trusted as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Series {
    points: Vec<TimePoint>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort and dedupe arbitrary points (last occurrence wins on equal time).
    pub fn from_unsorted(points: Vec<TimePoint>) -> Self {
        let mut series = Self::new();
        series.merge(points);
        series
    }

    pub fn points(&self) -> &[TimePoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<TimePoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&TimePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&TimePoint> {
        self.points.last()
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.time)
    }

    /// True when every adjacent pair is non-decreasing by time.
    pub fn is_ordered(&self) -> bool {
        self.points.windows(2).all(|w| w[0].time <= w[1].time)
    }

    /// Merge `incoming` by timestamp. Returns how many incoming points survived
    /// deduplication within the batch.
    ///
    /// Runs in O(existing + incoming) when both sides are already ascending,
    /// which is what remote sources return; an out-of-order side is sorted
    /// first. A batch strictly newer than the tail is a plain append.
    pub fn merge(&mut self, incoming: Vec<TimePoint>) -> usize {
        if !self.is_ordered() {
            self.points = sort_and_dedupe(std::mem::take(&mut self.points));
        }
        let incoming = sort_and_dedupe(incoming);
        let accepted = incoming.len();
        if accepted == 0 {
            return 0;
        }

        let newer_than_tail = match (self.last_time(), incoming.first()) {
            (None, _) => true,
            (Some(tail), Some(head)) => head.time > tail,
            (Some(_), None) => false,
        };
        if newer_than_tail {
            self.points.extend(incoming);
            return accepted;
        }

        let existing = std::mem::take(&mut self.points);
        let mut merged = Vec::with_capacity(existing.len() + incoming.len());
        let mut old = existing.into_iter().peekable();
        let mut new = incoming.into_iter().peekable();

        loop {
            match (old.peek(), new.peek()) {
                (Some(o), Some(n)) => {
                    if o.time < n.time {
                        merged.extend(old.next());
                    } else if o.time > n.time {
                        merged.extend(new.next());
                    } else {
                        old.next();
                        merged.extend(new.next());
                    }
                }
                (Some(_), None) => merged.extend(old.next()),
                (None, Some(_)) => merged.extend(new.next()),
                (None, None) => break,
            }
        }

        self.points = merged;
        accepted
    }

    /// Change of `current` relative to the first point of the series.
    pub fn change_against(&self, current: f64) -> Option<Change> {
        let reference = self.first()?.value;
        if reference == 0.0 || !current.is_finite() {
            return None;
        }
        let diff = current - reference;
        Some(Change {
            diff,
            pct: diff / reference * 100.0,
        })
    }
}

impl From<Vec<TimePoint>> for Series {
    fn from(points: Vec<TimePoint>) -> Self {
        Series::from_unsorted(points)
    }
}

impl<'a> IntoIterator for &'a Series {
    type Item = &'a TimePoint;
    type IntoIter = std::slice::Iter<'a, TimePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

fn sort_and_dedupe(mut points: Vec<TimePoint>) -> Vec<TimePoint> {
    if !points.windows(2).all(|w| w[0].time <= w[1].time) {
        // Stable: equal timestamps keep arrival order, so "last" stays last.
        points.sort_by_key(|p| p.time);
    }
    let mut out: Vec<TimePoint> = Vec::with_capacity(points.len());
    for point in points {
        match out.last_mut() {
            Some(prev) if prev.time == point.time => *prev = point,
            _ => out.push(point),
        }
    }
    out
}
