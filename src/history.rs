use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use crate::types::HistoryEntry;

pub const DEFAULT_MAX_HISTORY_ENTRIES: usize = 10;

/// Bounded log of terminal jobs; the oldest entry is evicted first.
#[derive(Debug)]
pub struct HistoryStore {
    entries: RwLock<VecDeque<HistoryEntry>>,
    capacity: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY_ENTRIES)
    }
}

impl HistoryStore {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        log::debug!("[history] new: capacity={}", capacity);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn append(&self, entry: HistoryEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        log::debug!("[history] append: id={} state={}", entry.id, entry.state);
        entries.push_back(entry);

        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                log::trace!("[history] history_trimmed: evicted={} len={}", evicted.id, entries.len());
            }
        }
    }

    /// Up to `n` entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
