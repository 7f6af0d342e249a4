//! Tests for raw document validation.

mod common;

use common::*;
use market_mirror::normalize::{normalize_document, normalize_documents, parse_time};
use market_mirror::SeriesKind;
use serde_json::json;

// ---------------------------------------------------------------------------
// Time parsing
// ---------------------------------------------------------------------------

#[test]
fn parses_rfc3339_strings() {
    assert_eq!(parse_time(&json!("2024-01-01T12:00:00Z")), Some(t0()));
    assert_eq!(parse_time(&json!("2024-01-01T12:00:00.000Z")), Some(t0()));
}

#[test]
fn parses_epoch_millis() {
    let ms = t0().timestamp_millis();
    assert_eq!(parse_time(&json!(ms)), Some(t0()));
}

#[test]
fn parses_timestamp_objects() {
    let secs = t0().timestamp();
    assert_eq!(parse_time(&json!({ "seconds": secs, "nanos": 0 })), Some(t0()));
    assert_eq!(
        parse_time(&json!({ "_seconds": secs, "_nanoseconds": 0 })),
        Some(t0())
    );
}

#[test]
fn rejects_unusable_times() {
    assert_eq!(parse_time(&json!("noon")), None);
    assert_eq!(parse_time(&json!(true)), None);
    assert_eq!(parse_time(&json!({ "nanos": 5 })), None);
}

// ---------------------------------------------------------------------------
// History documents
// ---------------------------------------------------------------------------

#[test]
fn history_uses_close() {
    let p = normalize_document(SeriesKind::History, &history_doc(0, 42000.5)).unwrap();
    assert_eq!(p.time, t0());
    assert_eq!(p.value, 42000.5);
    assert!(p.readings.is_empty());
}

#[test]
fn history_falls_back_to_close_usd() {
    let doc = json!({ "time": "2024-01-01T12:00:00Z", "close_usd": 7.5, "volume": 10 });
    let p = normalize_document(SeriesKind::History, &doc).unwrap();
    assert_eq!(p.value, 7.5);
    assert!(p.readings.is_empty());
}

#[test]
fn history_without_numeric_value_is_malformed() {
    let doc = json!({ "time": "2024-01-01T12:00:00Z", "close": "high" });
    let err = normalize_document(SeriesKind::History, &doc).unwrap_err();
    assert!(matches!(err, market_mirror::MirrorError::MalformedPoint(_)));
}

#[test]
fn non_object_documents_are_malformed() {
    assert!(normalize_document(SeriesKind::History, &json!([1, 2])).is_err());
}

// ---------------------------------------------------------------------------
// Indicator documents
// ---------------------------------------------------------------------------

#[test]
fn indicators_keep_extra_numeric_fields() {
    let doc = json!({
        "time": "2024-01-01T12:00:00Z",
        "close": 100.0,
        "ema20": 98.5,
        "rsi14": 61.2,
        "signal": "buy"
    });
    let p = normalize_document(SeriesKind::Indicators, &doc).unwrap();
    assert_eq!(p.value, 100.0);
    assert_eq!(p.reading("ema20"), Some(98.5));
    assert_eq!(p.reading("rsi14"), Some(61.2));
    assert_eq!(p.reading("signal"), None);
    assert_eq!(p.reading("close"), None);
}

#[test]
fn indicators_fall_back_to_price() {
    let doc = json!({ "time": "2024-01-01T12:00:00Z", "price": 3.0, "macd": -0.2 });
    let p = normalize_document(SeriesKind::Indicators, &doc).unwrap();
    assert_eq!(p.value, 3.0);
    assert_eq!(p.reading("macd"), Some(-0.2));
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[test]
fn batch_drops_and_counts_malformed() {
    let docs = vec![
        history_doc(60, 2.0),
        json!({ "close": 1.0 }),
        history_doc(0, 1.0),
        json!("garbage"),
    ];
    let out = normalize_documents(SeriesKind::History, &docs);
    assert_eq!(out.malformed, 2);
    assert_eq!(values(&out.series), vec![1.0, 2.0]);
}
