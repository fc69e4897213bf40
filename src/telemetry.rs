//! Lifetime ingest counters for a session.
//!
//! The window statistics only ever describe the last N records. These
//! counters cover everything the session has seen since it started, so the
//! two are never confused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct IngestLog {
    /// Records parsed from the stream
    received: AtomicU64,
    /// Records inserted into the window
    admitted: AtomicU64,
    /// Records discarded by the pause gate
    dropped_paused: AtomicU64,
    /// Records already present in the window
    duplicates: AtomicU64,
    /// Records pushed out of the window
    evicted: AtomicU64,
    /// Records older than everything in a full window
    too_old: AtomicU64,
    /// Frames that could not be parsed
    parse_errors: AtomicU64,
    /// Subscriptions opened, including reconnects
    subscriptions: AtomicU64,
    session_start: DateTime<Utc>,
}

impl IngestLog {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            dropped_paused: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            too_old: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            subscriptions: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_paused(&self) {
        self.dropped_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: u64) {
        self.evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_too_old(&self) {
        self.too_old.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscription(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            received: self.received.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            dropped_paused: self.dropped_paused.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            too_old: self.too_old.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            reconnects: self.subscriptions.load(Ordering::Relaxed).saturating_sub(1),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Records received: {}\n\
             - Records admitted: {}\n\
             - Dropped while paused: {}\n\
             - Duplicates ignored: {}\n\
             - Evicted from window: {}\n\
             - Too old for window: {}\n\
             - Malformed frames: {}\n\
             - Reconnects: {}\n\
             - Session duration: {} seconds",
            stats.received,
            stats.admitted,
            stats.dropped_paused,
            stats.duplicates,
            stats.evicted,
            stats.too_old,
            stats.parse_errors,
            stats.reconnects,
            stats.session_duration_secs
        )
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.admitted.store(0, Ordering::Relaxed);
        self.dropped_paused.store(0, Ordering::Relaxed);
        self.duplicates.store(0, Ordering::Relaxed);
        self.evicted.store(0, Ordering::Relaxed);
        self.too_old.store(0, Ordering::Relaxed);
        self.parse_errors.store(0, Ordering::Relaxed);
        self.subscriptions.store(0, Ordering::Relaxed);
    }
}

impl Default for IngestLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestStats {
    pub received: u64,
    pub admitted: u64,
    pub dropped_paused: u64,
    pub duplicates: u64,
    pub evicted: u64,
    pub too_old: u64,
    pub parse_errors: u64,
    pub reconnects: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe shared ingest log.
pub type SharedIngestLog = Arc<IngestLog>;

pub fn create_shared_log() -> SharedIngestLog {
    Arc::new(IngestLog::new())
}
