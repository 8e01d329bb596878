//! Time-to-live policy keyed by cache key prefix.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys::{CacheKey, normalize_text};

/// TTL requested by a cacheable query.
///
/// A zero duration is not "do not cache": it converts to [`CacheTtl::Policy`]
/// so the resolver supplies the real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTtl {
    /// Resolve from the prefix table.
    #[default]
    Policy,
    Fixed(Duration),
}

impl From<Duration> for CacheTtl {
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            CacheTtl::Policy
        } else {
            CacheTtl::Fixed(ttl)
        }
    }
}

/// One row of the prefix table as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlRule {
    pub prefix: String,
    pub ttl_secs: u64,
}

impl TtlRule {
    pub fn new(prefix: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            prefix: prefix.into(),
            ttl_secs,
        }
    }
}

/// Immutable prefix → TTL table, loaded once at startup.
///
/// Rules are kept ordered longest prefix first, so the first match is also
/// the most specific one (`courses:list` wins over `courses`).
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    rules: Arc<[(String, Duration)]>,
    default_ttl: Duration,
}

impl TtlPolicy {
    pub fn new(rules: impl IntoIterator<Item = TtlRule>, default_ttl: Duration) -> Self {
        let mut rules: Vec<(String, Duration)> = rules
            .into_iter()
            .filter(|rule| !rule.prefix.trim().is_empty() && rule.ttl_secs > 0)
            .map(|rule| {
                (
                    normalize_text(&rule.prefix),
                    Duration::from_secs(rule.ttl_secs),
                )
            })
            .collect();
        // Stable: equal-length prefixes keep their configured order.
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            rules: rules.into(),
            default_ttl,
        }
    }

    /// Policy with no rules; every key gets `default_ttl`.
    pub fn uniform(default_ttl: Duration) -> Self {
        Self::new(Vec::new(), default_ttl)
    }

    /// Resolve the distributed-tier TTL for a key.
    pub fn resolve(&self, key: &str) -> Duration {
        self.matching_rule(key)
            .map(|(_, ttl)| ttl)
            .unwrap_or(self.default_ttl)
    }

    /// The rule that decides `key`'s TTL, if any rule does.
    pub fn matching_rule(&self, key: &str) -> Option<(&str, Duration)> {
        let key = normalize_text(key);
        if key.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(prefix, ttl)| (prefix.as_str(), *ttl))
    }

    /// TTL actually applied for a query: its fixed value, or the policy's.
    pub fn effective(&self, key: &CacheKey, requested: CacheTtl) -> Duration {
        match requested {
            CacheTtl::Fixed(ttl) if !ttl.is_zero() => ttl,
            _ => self.resolve(key.as_str()),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn rules(&self) -> impl Iterator<Item = (&str, Duration)> {
        self.rules.iter().map(|(prefix, ttl)| (prefix.as_str(), *ttl))
    }
}
