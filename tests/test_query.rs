//! Unit tests for SeriesQuery construction and SQL rendering.

mod common;

use common::*;
use market_mirror::query::{canonical_time, Direction, TimeBound};
use market_mirror::{RangeId, SeriesKey, SeriesQuery};

// ---------------------------------------------------------------------------
// Basic construction
// ---------------------------------------------------------------------------

#[test]
fn new_query_is_ascending_and_unbounded() {
    let q = SeriesQuery::new("BTCUSDT", "history_yahoo");
    assert_eq!(q.direction(), Direction::Ascending);
    assert_eq!(q.bound(), None);
    assert_eq!(q.limit_value(), None);
}

#[test]
fn for_key_picks_collection_from_kind() {
    let q = SeriesQuery::for_key(&SeriesKey::indicators("ETHUSDT", RangeId::Hour1));
    assert_eq!(q.coin(), "ETHUSDT");
    assert_eq!(q.collection(), "indicatori");
}

#[test]
fn paths_nest_under_root_collection() {
    let q = SeriesQuery::for_key(&SeriesKey::history("BTCUSDT", RangeId::Hour24));
    assert_eq!(q.parent_path(), "crypto_prices/BTCUSDT");
    assert_eq!(q.collection_path(), "crypto_prices/BTCUSDT/history_yahoo");
}

#[test]
fn later_bound_replaces_earlier() {
    let q = SeriesQuery::new("BTCUSDT", "history_yahoo")
        .after(at(0))
        .since(at(60));
    assert_eq!(q.bound(), Some(TimeBound::AtOrAfter(at(60))));
}

// ---------------------------------------------------------------------------
// Canonical time
// ---------------------------------------------------------------------------

#[test]
fn canonical_time_is_fixed_width_utc() {
    assert_eq!(canonical_time(t0()), "2024-01-01T12:00:00.000Z");
}

#[test]
fn canonical_time_orders_like_time() {
    let early = canonical_time(at(-1));
    let late = canonical_time(at(0));
    assert!(early < late);
}

// ---------------------------------------------------------------------------
// SQL rendering
// ---------------------------------------------------------------------------

#[test]
fn unbounded_query_filters_collection_only() {
    let (sql, params) = SeriesQuery::new("BTCUSDT", "history_yahoo").build_sql("documents");
    assert_eq!(
        sql,
        "SELECT doc\nFROM documents\nWHERE collection = ?\nORDER BY \"time\" ASC"
    );
    assert_eq!(params, vec!["crypto_prices/BTCUSDT/history_yahoo"]);
}

#[test]
fn after_renders_strict_comparison() {
    let (sql, params) = SeriesQuery::new("BTCUSDT", "history_yahoo")
        .after(t0())
        .limit(50)
        .build_sql("documents");
    assert!(sql.contains("WHERE collection = ? AND \"time\" > ?"));
    assert!(sql.ends_with("LIMIT 50"));
    assert_eq!(params[1], "2024-01-01T12:00:00.000Z");
}

#[test]
fn since_renders_inclusive_comparison() {
    let (sql, _) = SeriesQuery::new("BTCUSDT", "history_yahoo")
        .since(t0())
        .build_sql("documents");
    assert!(sql.contains("\"time\" >= ?"));
}

#[test]
fn descending_order() {
    let (sql, _) = SeriesQuery::new("BTCUSDT", "history_yahoo")
        .order(Direction::Descending)
        .build_sql("documents");
    assert!(sql.contains("ORDER BY \"time\" DESC"));
}

#[test]
fn coin_is_never_inlined() {
    let (sql, params) = SeriesQuery::new("x'; DROP TABLE documents; --", "history_yahoo")
        .build_sql("documents");
    assert!(!sql.contains("DROP"));
    assert!(params[0].contains("DROP"));
}
