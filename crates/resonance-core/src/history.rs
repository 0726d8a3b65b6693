//! Bounded mutation history.
//!
//! A ring buffer of [`HistoryEntry`] records ordered by version. Used for
//! reconnect catch-up and analytics. Length never exceeds the configured
//! maximum; the oldest entries are evicted first.

use std::collections::VecDeque;

use resonance_types::HistoryEntry;

/// Fixed-capacity, version-ordered history of state mutations.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    max_entries: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer holding at most `max_entries` (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1_024)),
            max_entries,
        }
    }

    /// Append an entry, evicting the oldest if full.
    pub fn push(&mut self, entry: HistoryEntry) {
        while self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries with `version > since`, oldest first.
    pub fn since(&self, since: u64) -> Vec<HistoryEntry> {
        let start = self.entries.partition_point(|entry| entry.version <= since);
        self.entries.range(start..).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded yet (or everything was evicted).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured maximum length.
    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Oldest retained version, if any.
    pub fn oldest_version(&self) -> Option<u64> {
        self.entries.front().map(|entry| entry.version)
    }
}
