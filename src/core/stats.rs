//! Statistics derived from the buffered window.
//!
//! Everything here is a pure function of the records passed in. The numbers
//! describe the current window only; lifetime totals live in
//! [`crate::telemetry`].

use crate::stream::types::{EventRecord, Sentiment};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;

/// How many sources are listed in the breakdown.
pub const TOP_SOURCES: usize = 5;

/// Format of chart-series time labels.
const SERIES_TIME_FORMAT: &str = "%H:%M:%S";

/// Summary of the current window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedStats {
    /// Number of records in the window
    pub total: usize,
    /// Mean score (absent scores count as 0), rounded to 2 decimals
    pub avg_score: f64,
    pub positive_count: usize,
    pub negative_count: usize,
    pub neutral_count: usize,
    /// Share of positive records, whole percent
    pub positive_pct: u32,
    /// Share of negative records, whole percent
    pub negative_pct: u32,
    /// Population standard deviation of scores, rounded to 2 decimals
    pub score_std_dev: f64,
    /// Timestamp of the newest record
    pub last_event_at: Option<DateTime<Utc>>,
    /// Most frequent sources, busiest first
    pub top_sources: Vec<SourceCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    pub source: String,
    pub count: usize,
}

/// One chart point per buffered record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Wall-clock time of the record, `HH:MM:SS`
    pub time: String,
    pub score: f64,
}

/// Computes window statistics and the chart series.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    timezone: Tz,
}

impl StatsAggregator {
    /// `timezone` is used for chart time labels.
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn compute(&self, records: &[EventRecord]) -> DerivedStats {
        compute_stats(records)
    }

    /// Chart series in the order given (ascending timestamp for a buffer).
    pub fn series(&self, records: &[EventRecord]) -> Vec<SeriesPoint> {
        records
            .iter()
            .map(|r| SeriesPoint {
                time: r
                    .timestamp
                    .with_timezone(&self.timezone)
                    .format(SERIES_TIME_FORMAT)
                    .to_string(),
                score: r.score(),
            })
            .collect()
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

/// Compute window statistics from records.
pub fn compute_stats(records: &[EventRecord]) -> DerivedStats {
    if records.is_empty() {
        return DerivedStats::default();
    }

    let total = records.len();
    let count = |sentiment: Sentiment| {
        records
            .iter()
            .filter(|r| r.sentiment() == Some(sentiment))
            .count()
    };
    let positive_count = count(Sentiment::Positive);
    let negative_count = count(Sentiment::Negative);
    let neutral_count = count(Sentiment::Neutral);

    let avg_score = round2(records.iter().map(EventRecord::score).mean());
    let score_std_dev = if total < 2 {
        0.0
    } else {
        round2(records.iter().map(EventRecord::score).population_std_dev())
    };

    DerivedStats {
        total,
        avg_score,
        positive_count,
        negative_count,
        neutral_count,
        positive_pct: percent(positive_count, total),
        negative_pct: percent(negative_count, total),
        score_std_dev,
        last_event_at: records.iter().map(|r| r.timestamp).max(),
        top_sources: top_sources(records, TOP_SOURCES),
    }
}

/// Sources ranked by record count. Ties keep first-seen order.
pub fn top_sources(records: &[EventRecord], limit: usize) -> Vec<SourceCount> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<SourceCount> = Vec::new();

    for record in records {
        match index.get(record.source.as_str()) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(record.source.as_str(), counts.len());
                counts.push(SourceCount {
                    source: record.source.clone(),
                    count: 1,
                });
            }
        }
    }

    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(limit);
    counts
}

fn round2(value: f64) -> f64 {
    if value.is_finite() {
        (value * 100.0).round() / 100.0
    } else {
        0.0
    }
}

fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (count as f64 / total as f64 * 100.0).round() as u32
}
