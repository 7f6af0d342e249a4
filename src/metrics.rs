//! Operation counters for the diagnostics page.
//!
//! The refresh controller reports through the [`MetricsSink`] trait; the
//! application owns one [`Monitor`] for the lifetime of the process, hands it
//! to the builder, and reads or resets it explicitly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::config;

/// Receiver of controller events.
pub trait MetricsSink: Send + Sync {
    /// A remote query completed and returned `documents` documents.
    fn record_remote_read(&self, documents: usize);
    fn record_remote_error(&self, message: &str);
    fn record_storage_error(&self, message: &str);
    fn record_cache_read(&self);
    fn record_cache_write(&self);
    fn record_full_fetch(&self, at: DateTime<Utc>);
    fn record_incremental_fetch(&self, at: DateTime<Utc>);
    /// A timer tick reached the controller, whether or not it fetched.
    fn record_polling_event(&self);
    fn record_malformed(&self, count: usize);
    fn record_visibility(&self, visible: bool, at: DateTime<Utc>);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_remote_read(&self, _documents: usize) {}
    fn record_remote_error(&self, _message: &str) {}
    fn record_storage_error(&self, _message: &str) {}
    fn record_cache_read(&self) {}
    fn record_cache_write(&self) {}
    fn record_full_fetch(&self, _at: DateTime<Utc>) {}
    fn record_incremental_fetch(&self, _at: DateTime<Utc>) {}
    fn record_polling_event(&self) {}
    fn record_malformed(&self, _count: usize) {}
    fn record_visibility(&self, _visible: bool, _at: DateTime<Utc>) {}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    pub time: DateTime<Utc>,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub remote_reads: u64,
    pub remote_documents: u64,
    pub remote_errors: u64,
    pub storage_errors: u64,
    pub cache_reads: u64,
    pub cache_writes: u64,
    pub full_fetch_count: u64,
    pub incremental_fetch_count: u64,
    pub polling_events: u64,
    pub malformed_points: u64,
    pub last_full_fetch: Option<DateTime<Utc>>,
    pub last_incremental_fetch: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub tab_visible: bool,
    pub errors: Vec<ErrorEntry>,
}

#[derive(Debug)]
struct Recent {
    last_full_fetch: Option<DateTime<Utc>>,
    last_incremental_fetch: Option<DateTime<Utc>>,
    last_heartbeat: Option<DateTime<Utc>>,
    tab_visible: bool,
    errors: VecDeque<ErrorEntry>,
}

impl Default for Recent {
    fn default() -> Self {
        Self {
            last_full_fetch: None,
            last_incremental_fetch: None,
            last_heartbeat: None,
            tab_visible: true,
            errors: VecDeque::new(),
        }
    }
}

/// Process-scoped counters implementing [`MetricsSink`].
#[derive(Debug, Default)]
pub struct Monitor {
    remote_reads: AtomicU64,
    remote_documents: AtomicU64,
    remote_errors: AtomicU64,
    storage_errors: AtomicU64,
    cache_reads: AtomicU64,
    cache_writes: AtomicU64,
    full_fetches: AtomicU64,
    incremental_fetches: AtomicU64,
    polling_events: AtomicU64,
    malformed_points: AtomicU64,
    recent: Mutex<Recent>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let recent = self.recent();
        MonitorSnapshot {
            remote_reads: self.remote_reads.load(Ordering::Relaxed),
            remote_documents: self.remote_documents.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            cache_reads: self.cache_reads.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            full_fetch_count: self.full_fetches.load(Ordering::Relaxed),
            incremental_fetch_count: self.incremental_fetches.load(Ordering::Relaxed),
            polling_events: self.polling_events.load(Ordering::Relaxed),
            malformed_points: self.malformed_points.load(Ordering::Relaxed),
            last_full_fetch: recent.last_full_fetch,
            last_incremental_fetch: recent.last_incremental_fetch,
            last_heartbeat: recent.last_heartbeat,
            tab_visible: recent.tab_visible,
            errors: recent.errors.iter().cloned().collect(),
        }
    }

    /// Zero every counter and forget recorded errors.
    pub fn reset(&self) {
        for counter in [
            &self.remote_reads,
            &self.remote_documents,
            &self.remote_errors,
            &self.storage_errors,
            &self.cache_reads,
            &self.cache_writes,
            &self.full_fetches,
            &self.incremental_fetches,
            &self.polling_events,
            &self.malformed_points,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.recent() = Recent::default();
    }

    fn recent(&self) -> MutexGuard<'_, Recent> {
        // Counters stay readable even if a panicking thread held the lock.
        self.recent.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_error(&self, message: &str) {
        let mut recent = self.recent();
        recent.errors.push_back(ErrorEntry {
            message: message.to_string(),
            time: Utc::now(),
        });
        while recent.errors.len() > config::MAX_RECORDED_ERRORS {
            recent.errors.pop_front();
        }
    }
}

impl MetricsSink for Monitor {
    fn record_remote_read(&self, documents: usize) {
        self.remote_reads.fetch_add(1, Ordering::Relaxed);
        self.remote_documents
            .fetch_add(documents as u64, Ordering::Relaxed);
    }

    fn record_remote_error(&self, message: &str) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
        self.push_error(message);
    }

    fn record_storage_error(&self, message: &str) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
        self.push_error(message);
    }

    fn record_cache_read(&self) {
        self.cache_reads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cache_write(&self) {
        self.cache_writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_full_fetch(&self, at: DateTime<Utc>) {
        self.full_fetches.fetch_add(1, Ordering::Relaxed);
        self.recent().last_full_fetch = Some(at);
    }

    fn record_incremental_fetch(&self, at: DateTime<Utc>) {
        self.incremental_fetches.fetch_add(1, Ordering::Relaxed);
        self.recent().last_incremental_fetch = Some(at);
    }

    fn record_polling_event(&self) {
        self.polling_events.fetch_add(1, Ordering::Relaxed);
    }

    fn record_malformed(&self, count: usize) {
        self.malformed_points
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_visibility(&self, visible: bool, at: DateTime<Utc>) {
        let mut recent = self.recent();
        recent.tab_visible = visible;
        recent.last_heartbeat = Some(at);
    }
}
