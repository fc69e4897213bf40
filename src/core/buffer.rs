//! Bounded, time-ordered window of recent records.
//!
//! Records are kept sorted by timestamp after every insertion; arrival order
//! is not trusted. When the window overflows, the oldest records go first.

use crate::stream::types::{EventRecord, RecordId};
use chrono::{DateTime, Utc};

/// Default number of records kept in the window.
pub const DEFAULT_CAPACITY: usize = 100;

/// What happened to a record offered to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The record was inserted; `evicted` records were dropped to make room.
    /// `retained` is false when the record itself was the oldest and fell
    /// straight out again.
    Inserted { evicted: usize, retained: bool },
    /// A record with the same id is already buffered
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct EventBuffer {
    capacity: usize,
    records: Vec<EventRecord>,
}

impl EventBuffer {
    /// Create an empty buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Vec::with_capacity(capacity + 1),
        }
    }

    /// Insert a record, re-sort, and evict from the front if over capacity.
    pub fn insert(&mut self, record: EventRecord) -> Admission {
        if self.contains(&record.id) {
            return Admission::Duplicate;
        }

        let id = record.id.clone();
        self.records.push(record);
        // Stable, so equal timestamps keep arrival order.
        self.records.sort_by_key(|r| r.timestamp);

        let evicted = self.records.len().saturating_sub(self.capacity);
        let retained = if evicted > 0 {
            let dropped_self = self.records[..evicted].iter().any(|r| r.id == id);
            self.records.drain(..evicted);
            !dropped_self
        } else {
            true
        };

        Admission::Inserted { evicted, retained }
    }

    /// Records in ascending timestamp order.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records newest first, as shown in the feed.
    pub fn latest_first(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter().rev()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.iter().any(|r| &r.id == id)
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.records.first().map(|r| r.timestamp)
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.records.last().map(|r| r.timestamp)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
