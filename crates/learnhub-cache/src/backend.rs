//! Two-tier cache store: L1 (DashMap) in front of an optional L2.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::distributed::DistributedTier;
use crate::error::{CacheError, Result};
use crate::flight::SingleFlight;
use crate::keys::InvalidationPattern;
use crate::local::LocalTier;
use crate::metrics;
use crate::staleness::{InvalidationLog, Ticket};
use crate::ttl::TtlPolicy;

/// Two-tier cache backend.
///
/// ## Lookup Order
///
/// 1. L1 (in-process): microsecond latency
/// 2. L2 (distributed): millisecond latency, hit is promoted to L1
/// 3. Origin, through [`TwoTierCache::get_or_populate`]
///
/// ## Stale Writes
///
/// Every invalidation is recorded in a short log. A value read from L2 or
/// produced by the origin is written into a tier only if no invalidation
/// matching its key was recorded since the read started, and is removed
/// again if one lands while the write is in progress.
///
/// ## Graceful Degradation
///
/// Without an L2, or while the L2 is failing, the cache keeps working as a
/// per-instance cache. L2 errors and timeouts are logged and counted, never
/// returned.
#[derive(Clone)]
pub struct TwoTierCache {
    inner: Arc<Inner>,
}

struct Inner {
    local: LocalTier,
    distributed: Option<Arc<dyn DistributedTier>>,
    policy: TtlPolicy,
    flights: SingleFlight<Arc<Vec<u8>>>,
    log: InvalidationLog,
    op_timeout: Duration,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub mode: String,
    pub l1_entries: usize,
    pub in_flight: usize,
}

impl TwoTierCache {
    /// Single-instance cache with no distributed tier.
    pub fn local_only(local: LocalTier, policy: TtlPolicy) -> Self {
        Self::build(local, None, policy, Duration::from_millis(250))
    }

    /// Cache backed by a shared distributed tier.
    pub fn with_distributed(
        local: LocalTier,
        distributed: Arc<dyn DistributedTier>,
        policy: TtlPolicy,
        op_timeout: Duration,
    ) -> Self {
        Self::build(local, Some(distributed), policy, op_timeout)
    }

    fn build(
        local: LocalTier,
        distributed: Option<Arc<dyn DistributedTier>>,
        policy: TtlPolicy,
        op_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                distributed,
                policy,
                flights: SingleFlight::new(),
                log: InvalidationLog::default(),
                op_timeout,
            }),
        }
    }

    pub fn local(&self) -> &LocalTier {
        &self.inner.local
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.inner.policy
    }

    pub fn has_distributed(&self) -> bool {
        self.inner.distributed.is_some()
    }

    /// Get a value from the cache.
    ///
    /// An L2 hit is copied into L1 with a TTL no longer than the key's policy
    /// TTL and the L1 cap, unless the key was invalidated while it was being
    /// fetched.
    pub async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(data) = self.inner.local.get(key) {
            tracing::debug!(key = %key, "cache hit (L1)");
            metrics::record_cache_hit("L1");
            return Some(data);
        }

        let Some(distributed) = &self.inner.distributed else {
            tracing::debug!(key = %key, "cache miss");
            metrics::record_cache_miss();
            return None;
        };

        let ticket = self.inner.log.ticket();
        match self.remote("get", key, distributed.get(key)).await {
            Some(Some(data)) => {
                tracing::debug!(key = %key, "cache hit (L2)");
                metrics::record_cache_hit("L2");
                let data = Arc::new(data);
                self.promote(key, &data, ticket);
                Some(data)
            }
            _ => {
                tracing::debug!(key = %key, "cache miss");
                metrics::record_cache_miss();
                None
            }
        }
    }

    fn promote(&self, key: &str, data: &Arc<Vec<u8>>, ticket: Ticket) {
        if self.inner.log.touched_since(ticket, key) {
            tracing::debug!(key = %key, "invalidated while reading L2, not promoted");
            return;
        }
        let ttl = self.inner.policy.resolve(key);
        self.inner.local.insert(key, Arc::clone(data), ttl);
        if self.inner.log.touched_since(ticket, key) {
            self.inner.local.remove(key);
        }
    }

    /// Store a value in both tiers. L1 keeps it for at most its cap.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.store(key, Arc::new(value), ttl).await;
    }

    async fn store(&self, key: &str, data: Arc<Vec<u8>>, ttl: Duration) {
        self.inner.local.insert(key, Arc::clone(&data), ttl);
        if let Some(distributed) = &self.inner.distributed {
            if self
                .remote("set", key, distributed.set(key, &data, ttl))
                .await
                .is_some()
            {
                tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set (L1+L2)");
            }
        } else {
            tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set (L1)");
        }
    }

    /// Store a freshly produced value unless `key` was invalidated after
    /// `ticket`. An invalidation that lands while the L2 write is pending
    /// takes the value back out of both tiers.
    async fn store_fresh(&self, key: &str, data: Arc<Vec<u8>>, ttl: Duration, ticket: Ticket) {
        if self.inner.log.touched_since(ticket, key) {
            tracing::debug!(key = %key, "invalidated while populating, result not cached");
            return;
        }

        self.store(key, data, ttl).await;

        if self.inner.log.touched_since(ticket, key) {
            tracing::debug!(key = %key, "invalidated while storing, entry withdrawn");
            self.inner.local.remove(key);
            if let Some(distributed) = &self.inner.distributed {
                self.remote("remove", key, distributed.remove(key)).await;
            }
        }
    }

    /// Return the cached value for `key`, or run `populate` and cache its
    /// output.
    ///
    /// At most one `populate` runs per key at a time in this process;
    /// concurrent callers wait for it and get the same bytes. A `populate`
    /// error is returned to its caller and nothing is cached.
    pub async fn get_or_populate<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        populate: F,
    ) -> std::result::Result<Arc<Vec<u8>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }
        self.populate(key, ttl, populate).await
    }

    /// Like [`get_or_populate`](Self::get_or_populate) for a caller that has
    /// already missed on [`get`](Self::get): skips the tier lookup and goes
    /// straight to the single-flight population.
    pub async fn populate<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        populate: F,
    ) -> std::result::Result<Arc<Vec<u8>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>>,
    {
        self.inner
            .flights
            .run(key, move || async move {
                // A flight that finished between our miss and joining has
                // already filled L1.
                if let Some(hit) = self.inner.local.get(key) {
                    return Ok(hit);
                }

                let ticket = self.inner.log.ticket();
                metrics::record_population();
                let data = Arc::new(populate().await?);
                self.store_fresh(key, Arc::clone(&data), ttl, ticket).await;
                Ok(data)
            })
            .await
    }

    /// Remove one key from both tiers.
    pub async fn remove(&self, key: &str) {
        self.remove_by_pattern(&InvalidationPattern::Exact(key.to_string()))
            .await;
    }

    /// Remove every key matching `pattern` from both tiers.
    ///
    /// Returns the number of L1 entries removed. The L2 removal is awaited,
    /// so once this returns the writer cannot read the old value back.
    pub async fn remove_by_pattern(&self, pattern: &InvalidationPattern) -> usize {
        let Some(distributed) = &self.inner.distributed else {
            let local_removed = self.remove_local_matching(pattern);
            tracing::debug!(pattern = %pattern, l1_removed = local_removed, "cache invalidated (L1)");
            return local_removed;
        };

        self.inner.log.record(pattern);
        self.inner.flights.forget_matching(pattern);

        let stem = pattern.stem();
        let remote_removed = match pattern {
            InvalidationPattern::Exact(key) => self
                .remote("remove", stem, distributed.remove(key))
                .await
                .map(|_| 1),
            InvalidationPattern::Prefix(prefix) => {
                self.remote("remove_by_prefix", stem, distributed.remove_by_prefix(prefix))
                    .await
            }
        };

        // L1 goes last so a promotion of a pre-removal L2 read cannot outlive it.
        let local_removed = self.remove_local_matching(pattern);
        tracing::debug!(
            pattern = %pattern,
            l1_removed = local_removed,
            l2_removed = ?remote_removed,
            "cache invalidated (L1+L2)"
        );
        local_removed
    }

    /// Remove matching keys from L1 only. Used for broadcast messages, whose
    /// publisher already cleared the shared tier.
    pub fn remove_local_matching(&self, pattern: &InvalidationPattern) -> usize {
        self.inner.log.record(pattern);
        self.inner.flights.forget_matching(pattern);
        self.inner.local.remove_matching(pattern)
    }

    /// Drop the whole L1 tier.
    pub fn clear_local(&self) {
        let everything = InvalidationPattern::Prefix(String::new());
        self.inner.log.record(&everything);
        self.inner.flights.forget_matching(&everything);
        self.inner.local.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            mode: self
                .inner
                .distributed
                .as_ref()
                .map(|d| d.name())
                .unwrap_or("local")
                .to_string(),
            l1_entries: self.inner.local.len(),
            in_flight: self.inner.flights.in_flight(),
        }
    }

    /// Check if the distributed tier answers (for health checks).
    pub async fn is_distributed_available(&self) -> bool {
        match &self.inner.distributed {
            Some(distributed) => {
                tokio::time::timeout(self.inner.op_timeout, distributed.ping())
                    .await
                    .unwrap_or(false)
            }
            None => false,
        }
    }

    /// Run one L2 operation under the timeout, logging instead of failing.
    async fn remote<T>(
        &self,
        op: &'static str,
        key: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Option<T> {
        let outcome = match tokio::time::timeout(self.inner.op_timeout, fut).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CacheError::Timeout(self.inner.op_timeout)),
        };
        match outcome {
            Ok(value) => Some(value),
            Err(e) if e.is_unavailable() => {
                tracing::warn!(key = %key, op, error = %e, "distributed cache unavailable, continuing without L2");
                metrics::record_cache_error(op);
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, op, error = %e, "distributed cache returned an unusable payload");
                metrics::record_cache_error(op);
                None
            }
        }
    }
}
