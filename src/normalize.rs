//! Validation of raw remote documents into [`TimePoint`]s.
//!
//! A document must carry a parseable `time` and a finite numeric value.
//! Anything else is a malformed point: dropped and counted, never fatal.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config;
use crate::error::{MirrorError, Result};
use crate::models::{Series, SeriesKind, TimePoint};

const HISTORY_VALUE_FIELDS: &[&str] = &["close", "close_usd"];
const INDICATOR_VALUE_FIELDS: &[&str] = &["close", "close_usd", "price"];

/// Outcome of normalizing one fetched batch.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub series: Series,
    pub malformed: usize,
}

/// Normalize a batch, dropping malformed documents.
pub fn normalize_documents(kind: SeriesKind, docs: &[Value]) -> Normalized {
    let mut points = Vec::with_capacity(docs.len());
    let mut malformed = 0;

    for doc in docs {
        match normalize_document(kind, doc) {
            Ok(point) => points.push(point),
            Err(e) => {
                malformed += 1;
                tracing::debug!(kind = %kind, error = %e, "dropping malformed document");
            }
        }
    }

    Normalized {
        series: Series::from_unsorted(points),
        malformed,
    }
}

/// Normalize a single document.
pub fn normalize_document(kind: SeriesKind, doc: &Value) -> Result<TimePoint> {
    let obj = doc
        .as_object()
        .ok_or_else(|| MirrorError::MalformedPoint("document is not an object".into()))?;

    let time = obj
        .get(config::TIME_FIELD)
        .and_then(parse_time)
        .ok_or_else(|| MirrorError::MalformedPoint("missing or invalid time".into()))?;

    let fields = match kind {
        SeriesKind::History => HISTORY_VALUE_FIELDS,
        SeriesKind::Indicators => INDICATOR_VALUE_FIELDS,
    };
    let (value_field, value) = fields
        .iter()
        .find_map(|f| obj.get(*f).and_then(Value::as_f64).map(|v| (*f, v)))
        .ok_or_else(|| {
            MirrorError::MalformedPoint(format!("no numeric {} at {}", fields.join("/"), time))
        })?;

    let mut point = TimePoint::new(time, value)?;

    if kind == SeriesKind::Indicators {
        for (name, raw) in obj {
            if name == config::TIME_FIELD || name == value_field {
                continue;
            }
            if let Some(reading) = raw.as_f64() {
                point = point.with_reading(name.clone(), reading);
            }
        }
    }

    Ok(point)
}

/// Accepts RFC 3339 strings, epoch milliseconds, and timestamp objects
/// (`{seconds, nanos}` or `{_seconds, _nanoseconds}`).
pub fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanos")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            DateTime::<Utc>::from_timestamp(seconds, u32::try_from(nanos).ok()?)
        }
        _ => None,
    }
}
