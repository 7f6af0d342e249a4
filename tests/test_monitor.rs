//! Tests for the metrics monitor.

mod common;

use common::*;
use market_mirror::{MetricsSink, Monitor, NoopMetrics};

#[test]
fn fresh_monitor_is_zeroed() {
    let snap = Monitor::new().snapshot();
    assert_eq!(snap.remote_reads, 0);
    assert_eq!(snap.full_fetch_count, 0);
    assert!(snap.tab_visible);
    assert!(snap.last_full_fetch.is_none());
    assert!(snap.errors.is_empty());
}

#[test]
fn counters_accumulate() {
    let m = Monitor::new();
    m.record_remote_read(3);
    m.record_remote_read(2);
    m.record_cache_read();
    m.record_cache_write();
    m.record_cache_write();
    m.record_polling_event();
    m.record_malformed(4);
    m.record_full_fetch(at(0));
    m.record_incremental_fetch(at(15));

    let snap = m.snapshot();
    assert_eq!(snap.remote_reads, 2);
    assert_eq!(snap.remote_documents, 5);
    assert_eq!(snap.cache_reads, 1);
    assert_eq!(snap.cache_writes, 2);
    assert_eq!(snap.polling_events, 1);
    assert_eq!(snap.malformed_points, 4);
    assert_eq!(snap.full_fetch_count, 1);
    assert_eq!(snap.incremental_fetch_count, 1);
    assert_eq!(snap.last_full_fetch, Some(at(0)));
    assert_eq!(snap.last_incremental_fetch, Some(at(15)));
}

#[test]
fn visibility_updates_heartbeat() {
    let m = Monitor::new();
    m.record_visibility(false, at(30));
    let snap = m.snapshot();
    assert!(!snap.tab_visible);
    assert_eq!(snap.last_heartbeat, Some(at(30)));
}

#[test]
fn error_log_keeps_most_recent_hundred() {
    let m = Monitor::new();
    for i in 0..105 {
        m.record_remote_error(&format!("error {i}"));
    }
    m.record_storage_error("disk");

    let snap = m.snapshot();
    assert_eq!(snap.remote_errors, 105);
    assert_eq!(snap.storage_errors, 1);
    assert_eq!(snap.errors.len(), 100);
    assert_eq!(snap.errors[0].message, "error 6");
    assert_eq!(snap.errors[99].message, "disk");
}

#[test]
fn reset_clears_counters_and_log() {
    let m = Monitor::new();
    m.record_remote_error("boom");
    m.record_visibility(false, at(0));
    m.reset();

    let snap = m.snapshot();
    assert_eq!(snap.remote_errors, 0);
    assert!(snap.errors.is_empty());
    assert!(snap.tab_visible);
}

#[test]
fn snapshot_serializes() {
    let m = Monitor::new();
    m.record_full_fetch(t0());
    let json = serde_json::to_value(m.snapshot()).unwrap();
    assert_eq!(json["full_fetch_count"], 1);
    assert_eq!(json["last_full_fetch"], "2024-01-01T12:00:00Z");
}

#[test]
fn noop_sink_accepts_everything() {
    let sink: &dyn MetricsSink = &NoopMetrics;
    sink.record_remote_read(1);
    sink.record_remote_error("ignored");
    sink.record_visibility(true, t0());
}
