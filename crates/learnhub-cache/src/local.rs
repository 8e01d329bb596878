//! In-process (L1) tier: a bounded DashMap with per-entry TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::keys::InvalidationPattern;

/// A cached entry with TTL support.
///
/// The data is wrapped in `Arc` so a hit is a reference-count bump, not a
/// copy of the payload.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Arc<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            data,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }

    pub fn expires_at(&self) -> Instant {
        self.cached_at + self.ttl
    }
}

/// Per-instance cache tier.
///
/// Entries never live longer than `max_ttl`, whatever TTL the caller asks
/// for, and the map never holds more than `max_entries` keys.
#[derive(Clone, Debug)]
pub struct LocalTier {
    entries: Arc<DashMap<String, CachedEntry>>,
    max_entries: usize,
    max_ttl: Duration,
}

impl LocalTier {
    pub fn new(max_entries: usize, max_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
            max_ttl,
        }
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Get a live entry, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let entry = self.entries.get(key)?;
        if !entry.is_expired() {
            return Some(Arc::clone(&entry.data));
        }
        drop(entry);
        self.entries.remove_if(key, |_, e| e.is_expired());
        None
    }

    /// Insert with `min(ttl, max_ttl)`, evicting if the tier is full.
    pub fn insert(&self, key: &str, data: Arc<Vec<u8>>, ttl: Duration) {
        let ttl = ttl.min(self.max_ttl);
        if ttl.is_zero() {
            return;
        }
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.make_room();
        }
        self.entries
            .insert(key.to_string(), CachedEntry::new(data, ttl));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every key the pattern matches. Returns how many were removed.
    pub fn remove_matching(&self, pattern: &InvalidationPattern) -> usize {
        match pattern {
            InvalidationPattern::Exact(key) => usize::from(self.remove(key)),
            InvalidationPattern::Prefix(_) => {
                let mut removed = 0;
                self.entries.retain(|key, _| {
                    if pattern.matches(key) {
                        removed += 1;
                        false
                    } else {
                        true
                    }
                });
                removed
            }
        }
    }

    /// Clean up expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.expires_at() <= now {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Spawn the background sweep that drops expired entries every `every`.
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let tier = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = tier.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = tier.len(), "purged expired L1 entries");
                }
                crate::metrics::set_cache_entries("L1", tier.len());
            }
        })
    }

    fn make_room(&self) {
        if self.purge_expired() > 0 && self.entries.len() < self.max_entries {
            return;
        }
        // Evict the entry closest to expiry. The iterator must be dropped
        // before removing, or the shard lock deadlocks.
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at())
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}
