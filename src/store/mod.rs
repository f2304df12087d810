//! Bounded request history
//!
//! Newest-first log of captured requests for a single channel. Callers
//! serialize access (the registry keeps one `History` per channel behind its
//! own lock).

use crate::capture::CapturedRequest;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of requests retained per channel
pub const DEFAULT_MAX_REQUESTS: usize = 100;

#[derive(Debug)]
pub struct History {
    entries: VecDeque<Arc<CapturedRequest>>,
    max_entries: usize,
}

impl History {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
        }
    }

    /// Insert at the head, dropping the oldest entries beyond capacity
    pub fn append(&mut self, record: Arc<CapturedRequest>) {
        self.entries.push_front(record);
        self.entries.truncate(self.max_entries);
    }

    /// Snapshot of the history, newest first
    pub fn list(&self) -> Vec<Arc<CapturedRequest>> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn find(&self, request_id: &str) -> Option<Arc<CapturedRequest>> {
        self.entries.iter().find(|r| r.id == request_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS)
    }
}
