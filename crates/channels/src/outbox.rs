//! Bounded log of accepted provider requests.
//!
//! Adapters keep the most recent requests for inspection and a running
//! total of everything accepted. Older entries are evicted once the log is
//! full, so a long-running process holds at most `capacity` payloads per
//! adapter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Requests retained per adapter unless configured otherwise.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1_000;

pub struct Outbox<T> {
    capacity: usize,
    entries: Mutex<VecDeque<(String, T)>>,
    accepted: AtomicU64,
}

impl<T: Clone> Outbox<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OUTBOX_CAPACITY)
    }

    /// A capacity of 0 keeps nothing but still counts.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_OUTBOX_CAPACITY))),
            accepted: AtomicU64::new(0),
        }
    }

    pub fn record(&self, provider_message_id: impl Into<String>, request: T) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back((provider_message_id.into(), request));
    }

    pub fn get(&self, provider_message_id: &str) -> Option<T> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == provider_message_id)
            .map(|(_, request)| request.clone())
    }

    /// Entries currently retained.
    pub fn retained(&self) -> usize {
        self.entries.lock().len()
    }

    /// Everything ever accepted, retained or not.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> Default for Outbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
