//! Cache metrics recorded through the `metrics` facade.
//!
//! No recorder is installed here; the host process decides where they go.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
    pub const CACHE_POPULATIONS_TOTAL: &str = "cache_populations_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
}

/// Record a cache hit.
pub fn record_cache_hit(tier: &str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier.to_string()).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a swallowed distributed-tier or broadcast failure.
pub fn record_cache_error(op: &'static str) {
    counter!(names::CACHE_ERRORS_TOTAL, "op" => op).increment(1);
}

/// Record one run of an origin population function.
pub fn record_population() {
    counter!(names::CACHE_POPULATIONS_TOTAL).increment(1);
}

/// Record an invalidation, `origin` being `local` or `remote`.
pub fn record_invalidation(origin: &'static str) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "origin" => origin).increment(1);
}

/// Set the number of cache entries.
pub fn set_cache_entries(tier: &str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier.to_string()).set(count as f64);
}
