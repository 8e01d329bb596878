//! Per-key single-flight registry.
//!
//! Concurrent callers asking for the same key while a computation is in
//! flight wait for it and share its result instead of recomputing. Keys are
//! independent: one slow key never blocks another.
//!
//! If the running computation fails or its task is cancelled, one of the
//! waiters takes over and runs its own computation; a finished value is
//! never computed twice.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::keys::InvalidationPattern;

pub struct SingleFlight<V> {
    flights: DashMap<String, Arc<OnceCell<V>>>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            flights: DashMap::new(),
        }
    }
}

impl<V: Clone> SingleFlight<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `init` for `key` unless a computation for it is already in
    /// flight, in which case wait for that one.
    pub async fn run<F, Fut, E>(&self, key: &str, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self
            .flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let result = cell.get_or_try_init(init).await.cloned();

        // Only drop the registration if it is still ours; a detached flight
        // may already have been replaced by a newer one.
        self.flights
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        result
    }

    /// Detach in-flight computations whose key matches `pattern`, so later
    /// callers start a fresh one instead of joining a stale computation.
    pub fn forget_matching(&self, pattern: &InvalidationPattern) {
        self.flights.retain(|key, _| !pattern.matches(key));
    }

    /// Number of keys currently being computed.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}
