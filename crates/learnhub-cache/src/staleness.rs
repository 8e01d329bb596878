//! Bounded log of recent invalidations.
//!
//! A reader takes a [`Ticket`] before it fetches from L2 or runs the origin,
//! and asks [`InvalidationLog::touched_since`] before it writes the result
//! into a tier. Only invalidations whose pattern matches the reader's key
//! count, so writes to unrelated entities never discard a fresh value.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::keys::InvalidationPattern;

const DEFAULT_CAPACITY: usize = 1024;

/// Position in the log at the time a read started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

pub struct InvalidationLog {
    seq: AtomicU64,
    entries: Mutex<VecDeque<(u64, InvalidationPattern)>>,
    capacity: usize,
}

impl Default for InvalidationLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InvalidationLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seq: AtomicU64::new(0),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn ticket(&self) -> Ticket {
        Ticket(self.seq.load(Ordering::Acquire))
    }

    pub fn record(&self, pattern: &InvalidationPattern) {
        let mut entries = self.entries();
        let seq = self.seq.load(Ordering::Relaxed) + 1;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((seq, pattern.clone()));
        self.seq.store(seq, Ordering::Release);
    }

    /// Whether an invalidation recorded after `ticket` matches `key`.
    ///
    /// Once the log no longer reaches back to `ticket`, every key counts as
    /// touched.
    pub fn touched_since(&self, ticket: Ticket, key: &str) -> bool {
        let entries = self.entries();
        if self.seq.load(Ordering::Acquire) == ticket.0 {
            return false;
        }
        match entries.front() {
            Some((oldest, _)) if *oldest <= ticket.0 + 1 => entries
                .iter()
                .rev()
                .take_while(|(seq, _)| *seq > ticket.0)
                .any(|(_, pattern)| pattern.matches(key)),
            _ => true,
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<(u64, InvalidationPattern)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
