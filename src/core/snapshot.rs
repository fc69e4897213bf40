//! Read-only view of a session, published after every change.

use crate::core::search::SearchIndex;
use crate::core::stats::{DerivedStats, SeriesPoint};
use crate::stream::connector::ConnectionState;
use crate::stream::types::EventRecord;
use crate::telemetry::IngestStats;
use serde::{Deserialize, Serialize};

/// Everything the presentation layer needs, consistent as of one instant.
///
/// `stats` and `series` are always computed from `records`; a snapshot is
/// never published with one updated and not the other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    /// Display name of the signed-in operator
    pub operator: Option<String>,
    pub connection: ConnectionState,
    pub paused: bool,
    /// Buffered records, ascending timestamp
    pub records: Vec<EventRecord>,
    pub stats: DerivedStats,
    pub series: Vec<SeriesPoint>,
    /// Lifetime counters for the session
    pub lifetime: IngestStats,
}

impl DashboardSnapshot {
    /// The state after sign-out: nothing buffered, nothing connected.
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn is_signed_in(&self) -> bool {
        self.operator.is_some()
    }

    /// Records newest first.
    pub fn feed(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter().rev()
    }

    /// Immediate, undebounced search over this snapshot.
    pub fn search(&self, index: &SearchIndex, query: &str) -> Vec<EventRecord> {
        index.search(query, &self.records)
    }
}
