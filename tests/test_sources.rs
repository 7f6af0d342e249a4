//! Tests for the local and Firestore document sources.

mod common;

use common::*;
use market_mirror::query::canonical_time;
use market_mirror::source::firestore::{decode_run_query, decode_value};
use market_mirror::{
    DocumentSource, FirestoreSource, LocalDocumentSource, RangeId, SeriesKey, SeriesQuery,
};
use serde_json::json;
use std::io::Write;
use std::time::Duration;

const BTC_HISTORY: &str = "crypto_prices/BTCUSDT/history_yahoo";

fn btc_query() -> SeriesQuery {
    SeriesQuery::for_key(&SeriesKey::history("BTCUSDT", RangeId::Hour24))
}

fn loaded_source() -> LocalDocumentSource {
    let source = LocalDocumentSource::new().unwrap();
    source
        .insert_documents(
            BTC_HISTORY,
            &[history_doc(60, 2.0), history_doc(0, 1.0), history_doc(120, 3.0)],
        )
        .unwrap();
    source
        .insert_documents(
            "crypto_prices/ETHUSDT/history_yahoo",
            &[history_doc(0, 50.0)],
        )
        .unwrap();
    source
}

fn closes(docs: &[serde_json::Value]) -> Vec<f64> {
    docs.iter().map(|d| d["close"].as_f64().unwrap()).collect()
}

// ---------------------------------------------------------------------------
// LocalDocumentSource
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_unbounded_query_returns_collection_in_order() {
    let source = loaded_source();
    let docs = source.fetch(&btc_query()).await.unwrap();
    assert_eq!(closes(&docs), vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn local_after_is_strict() {
    let source = loaded_source();
    let docs = source.fetch(&btc_query().after(at(60))).await.unwrap();
    assert_eq!(closes(&docs), vec![3.0]);
}

#[tokio::test]
async fn local_since_is_inclusive_and_limited() {
    let source = loaded_source();
    let docs = source
        .fetch(&btc_query().since(at(0)).limit(2))
        .await
        .unwrap();
    assert_eq!(closes(&docs), vec![1.0, 2.0]);
}

#[tokio::test]
async fn local_descending_query() {
    let source = loaded_source();
    let docs = source
        .fetch(&btc_query().order(market_mirror::query::Direction::Descending).limit(1))
        .await
        .unwrap();
    assert_eq!(closes(&docs), vec![3.0]);
}

#[test]
fn local_counts_per_collection() {
    let source = loaded_source();
    assert_eq!(source.count(BTC_HISTORY).unwrap(), 3);
    assert_eq!(source.count("crypto_prices/SOLUSDT/history_yahoo").unwrap(), 0);
}

#[tokio::test]
async fn local_loads_ndjson_exports() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}", history_doc(0, 1.0)).unwrap();
    writeln!(file).unwrap();
    writeln!(
        file,
        "{}",
        json!({ "time": { "seconds": at(60).timestamp(), "nanos": 0 }, "close": 2.0 })
    )
    .unwrap();

    let source = LocalDocumentSource::new().unwrap();
    assert_eq!(source.load_ndjson(BTC_HISTORY, file.path()).unwrap(), 2);

    let docs = source.fetch(&btc_query().after(at(0))).await.unwrap();
    assert_eq!(closes(&docs), vec![2.0]);
}

// ---------------------------------------------------------------------------
// FirestoreSource request shape
// ---------------------------------------------------------------------------

#[test]
fn run_query_url_targets_coin_document() {
    let source = FirestoreSource::new("demo-project", Duration::from_secs(5))
        .unwrap()
        .base_url("http://localhost:8080/v1/");
    assert_eq!(
        source.run_query_url(&btc_query()),
        "http://localhost:8080/v1/projects/demo-project/databases/(default)/documents/crypto_prices/BTCUSDT:runQuery"
    );
}

#[test]
fn structured_query_for_incremental_fetch() {
    let body = FirestoreSource::structured_query(&btc_query().after(t0()).limit(50));
    let q = &body["structuredQuery"];
    assert_eq!(q["from"][0]["collectionId"], "history_yahoo");
    assert_eq!(q["where"]["fieldFilter"]["field"]["fieldPath"], "time");
    assert_eq!(q["where"]["fieldFilter"]["op"], "GREATER_THAN");
    assert_eq!(
        q["where"]["fieldFilter"]["value"]["stringValue"],
        canonical_time(t0())
    );
    assert_eq!(q["orderBy"][0]["direction"], "ASCENDING");
    assert_eq!(q["limit"], 50);
}

#[test]
fn structured_query_for_window_fetch() {
    let body = FirestoreSource::structured_query(&btc_query().since(t0()));
    let q = &body["structuredQuery"];
    assert_eq!(q["where"]["fieldFilter"]["op"], "GREATER_THAN_OR_EQUAL");
    assert!(q.get("limit").is_none());
}

#[test]
fn structured_query_without_bound_has_no_filter() {
    let body = FirestoreSource::structured_query(&btc_query());
    assert!(body["structuredQuery"].get("where").is_none());
}

// ---------------------------------------------------------------------------
// FirestoreSource decoding
// ---------------------------------------------------------------------------

#[test]
fn decodes_typed_values() {
    assert_eq!(decode_value(&json!({ "stringValue": "a" })), json!("a"));
    assert_eq!(decode_value(&json!({ "doubleValue": 1.5 })), json!(1.5));
    assert_eq!(decode_value(&json!({ "integerValue": "42" })), json!(42));
    assert_eq!(decode_value(&json!({ "booleanValue": true })), json!(true));
    assert_eq!(decode_value(&json!({ "nullValue": null })), json!(null));
    assert_eq!(
        decode_value(&json!({ "timestampValue": "2024-01-01T12:00:00Z" })),
        json!("2024-01-01T12:00:00Z")
    );
    assert_eq!(
        decode_value(&json!({ "arrayValue": { "values": [{ "integerValue": "1" }] } })),
        json!([1])
    );
    assert_eq!(
        decode_value(&json!({ "mapValue": { "fields": { "x": { "doubleValue": 2.0 } } } })),
        json!({ "x": 2.0 })
    );
}

#[test]
fn decodes_run_query_stream() {
    let results = vec![
        json!({ "readTime": "2024-01-01T12:00:01Z" }),
        json!({
            "document": {
                "name": "projects/p/databases/(default)/documents/crypto_prices/BTCUSDT/history_yahoo/a",
                "fields": {
                    "time": { "stringValue": "2024-01-01T12:00:00.000Z" },
                    "close": { "doubleValue": 42000.0 }
                }
            },
            "readTime": "2024-01-01T12:00:01Z"
        }),
    ];
    let docs = decode_run_query(&results);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["close"], 42000.0);

    let point = market_mirror::normalize::normalize_document(
        market_mirror::SeriesKind::History,
        &docs[0],
    )
    .unwrap();
    assert_eq!(point.time, t0());
}
