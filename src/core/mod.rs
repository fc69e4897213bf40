//! Core functionality for the monitor.
//!
//! This module contains:
//! - The bounded, time-ordered event buffer
//! - Window statistics and the chart series
//! - Search over the buffered window
//! - The snapshot published to readers

pub mod buffer;
pub mod search;
pub mod snapshot;
pub mod stats;

// Re-export commonly used types
pub use buffer::{Admission, EventBuffer, DEFAULT_CAPACITY};
pub use search::{DebouncedSearch, SearchIndex, SearchResults};
pub use snapshot::DashboardSnapshot;
pub use stats::{compute_stats, DerivedStats, SeriesPoint, SourceCount, StatsAggregator};
