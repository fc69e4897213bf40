//! Free-text search over the buffered window.
//!
//! The window is small and bounded, so search is a linear scan over a
//! snapshot; there is no index structure to keep in sync.

use crate::core::snapshot::DashboardSnapshot;
use crate::stream::types::EventRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default maximum number of results.
pub const DEFAULT_LIMIT: usize = 10;

/// Default quiet period before a query runs.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Case-insensitive substring search over source, text and meta.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    limit: usize,
    min_query_len: usize,
}

impl SearchIndex {
    /// `min_query_len` is in characters and is never below one, so an empty
    /// query always yields nothing.
    pub fn new(limit: usize, min_query_len: usize) -> Self {
        Self {
            limit,
            min_query_len: min_query_len.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether `query` is long enough to run.
    pub fn accepts(&self, query: &str) -> bool {
        query.trim().chars().count() >= self.min_query_len
    }

    /// Matching records in window order, at most `limit` of them.
    pub fn search(&self, query: &str, records: &[EventRecord]) -> Vec<EventRecord> {
        if !self.accepts(query) {
            return Vec::new();
        }
        let needle = query.to_lowercase();

        records
            .iter()
            .filter(|r| matches(r, &needle))
            .take(self.limit)
            .cloned()
            .collect()
    }
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, 1)
    }
}

fn matches(record: &EventRecord, needle: &str) -> bool {
    let hit = |field: Option<&str>| field.is_some_and(|f| f.to_lowercase().contains(needle));

    hit(Some(&record.source))
        || hit(record.payload.text.as_deref())
        || hit(record.payload.meta.as_deref())
}

/// Result of the last query that ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub query: String,
    pub matches: Vec<EventRecord>,
}

/// Runs queries after a quiet period against the live window.
///
/// Setting a new query cancels the pending one. A pending query is also
/// cancelled when the session signs out or the searcher is dropped, so
/// nothing fires against a torn-down session.
pub struct DebouncedSearch {
    index: SearchIndex,
    delay: Duration,
    window: watch::Receiver<Arc<DashboardSnapshot>>,
    results: Arc<watch::Sender<SearchResults>>,
    pending: Option<JoinHandle<()>>,
}

impl DebouncedSearch {
    pub fn new(
        index: SearchIndex,
        delay: Duration,
        window: watch::Receiver<Arc<DashboardSnapshot>>,
    ) -> Self {
        let (results, _) = watch::channel(SearchResults::default());
        Self {
            index,
            delay,
            window,
            results: Arc::new(results),
            pending: None,
        }
    }

    /// Receiver for results as they are produced.
    pub fn results(&self) -> watch::Receiver<SearchResults> {
        self.results.subscribe()
    }

    /// Latest results.
    pub fn current(&self) -> SearchResults {
        self.results.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Replace the query. Too-short queries clear the results at once;
    /// anything else runs after the quiet period.
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.cancel();
        let query = query.into();

        if !self.index.accepts(&query) {
            self.results.send_replace(SearchResults {
                query,
                matches: Vec::new(),
            });
            return;
        }

        let index = self.index.clone();
        let delay = self.delay;
        let mut window = self.window.clone();
        let results = self.results.clone();

        self.pending = Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                // A closed channel means the session is gone as well.
                _ = async { let _ = window.wait_for(|s| !s.is_signed_in()).await; } => {
                    tracing::debug!(query = %query, "session ended, search cancelled");
                    return;
                }
            }
            let snapshot = window.borrow().clone();
            let matches = snapshot.search(&index, &query);
            tracing::debug!(query = %query, matches = matches.len(), "search completed");
            results.send_replace(SearchResults { query, matches });
        }));
    }

    /// Cancel the pending query, if any.
    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}

impl Drop for DebouncedSearch {
    fn drop(&mut self) {
        self.cancel();
    }
}
