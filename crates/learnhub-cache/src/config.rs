use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::pubsub::INVALIDATION_CHANNEL;
use crate::serializer::SerializerKind;
use crate::ttl::{TtlPolicy, TtlRule};

/// Redis configuration for horizontal scaling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (single-instance deployments use the in-process tier only)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.url.trim().is_empty() {
            return Err(CacheError::configuration("redis.url must not be empty when redis.enabled=true"));
        }
        if self.pool_size == 0 {
            return Err(CacheError::configuration("redis.pool_size must be > 0"));
        }
        if self.timeout_ms == 0 {
            return Err(CacheError::configuration("redis.timeout_ms must be > 0"));
        }
        Ok(())
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when no rule prefix matches a key
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Per entity/selector TTL rules; the longest matching prefix wins
    #[serde(default = "default_ttl_rules")]
    pub ttl_rules: Vec<TtlRule>,

    /// Payload encoding: "msgpack" or "json"
    #[serde(default)]
    pub serializer: SerializerKind,

    /// Local (L1) cache max entries
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// Upper bound on how long an entry lives in L1
    #[serde(default = "default_local_max_ttl_secs")]
    pub local_max_ttl_secs: u64,

    /// How often expired L1 entries are swept
    #[serde(default = "default_local_cleanup_interval_secs")]
    pub local_cleanup_interval_secs: u64,

    /// Prefix for every key written to Redis
    #[serde(default = "default_key_namespace")]
    pub key_namespace: String,

    /// Keys fetched per SCAN page during prefix invalidation
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Bound on a single distributed-tier or publish call, in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Pub/Sub channel for invalidation messages
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Skip invalidation messages this instance published itself
    #[serde(default = "default_skip_own_messages")]
    pub skip_own_messages: bool,
}

fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

/// Built-in TTL table for the learning platform's cached reads.
pub fn default_ttl_rules() -> Vec<TtlRule> {
    vec![
        TtlRule::new("categories:tree", 3600),
        TtlRule::new("categories:list", 1800),
        TtlRule::new("categories:id", 1800),
        TtlRule::new("courses:id", 600),
        TtlRule::new("courses:slug", 600),
        TtlRule::new("courses:list", 300),
        TtlRule::new("courses:category", 300),
        TtlRule::new("lessons:id", 600),
        TtlRule::new("lessons:course", 600),
        TtlRule::new("lessons:free", 900),
        TtlRule::new("enrollments:id", 120),
        TtlRule::new("enrollments:user", 120),
        TtlRule::new("enrollments:course", 120),
        TtlRule::new("coupons:code", 300),
        TtlRule::new("badges", 1800),
        TtlRule::new("certificates", 900),
        TtlRule::new("live-sessions", 60),
        TtlRule::new("submissions", 60),
        TtlRule::new("orders", 60),
    ]
}

fn default_local_max_entries() -> usize {
    10000
}

fn default_local_max_ttl_secs() -> u64 {
    60
}

fn default_local_cleanup_interval_secs() -> u64 {
    30
}

fn default_key_namespace() -> String {
    "learnhub:".to_string()
}

fn default_scan_batch_size() -> usize {
    500
}

fn default_operation_timeout_ms() -> u64 {
    250
}

fn default_channel() -> String {
    INVALIDATION_CHANNEL.to_string()
}

fn default_skip_own_messages() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            ttl_rules: default_ttl_rules(),
            serializer: SerializerKind::default(),
            local_max_entries: default_local_max_entries(),
            local_max_ttl_secs: default_local_max_ttl_secs(),
            local_cleanup_interval_secs: default_local_cleanup_interval_secs(),
            key_namespace: default_key_namespace(),
            scan_batch_size: default_scan_batch_size(),
            operation_timeout_ms: default_operation_timeout_ms(),
            channel: default_channel(),
            skip_own_messages: default_skip_own_messages(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_secs == 0 {
            return Err(CacheError::configuration("cache.default_ttl_secs must be > 0"));
        }
        for rule in &self.ttl_rules {
            if rule.prefix.trim().is_empty() {
                return Err(CacheError::configuration("cache.ttl_rules prefix must not be empty"));
            }
            if rule.ttl_secs == 0 {
                return Err(CacheError::configuration(format!(
                    "cache.ttl_rules ttl_secs for '{}' must be > 0",
                    rule.prefix
                )));
            }
        }
        if self.local_max_entries == 0 {
            return Err(CacheError::configuration("cache.local_max_entries must be > 0"));
        }
        if self.local_max_ttl_secs == 0 {
            return Err(CacheError::configuration("cache.local_max_ttl_secs must be > 0"));
        }
        if self.local_cleanup_interval_secs == 0 {
            return Err(CacheError::configuration("cache.local_cleanup_interval_secs must be > 0"));
        }
        if self.scan_batch_size == 0 {
            return Err(CacheError::configuration("cache.scan_batch_size must be > 0"));
        }
        if self.operation_timeout_ms == 0 {
            return Err(CacheError::configuration("cache.operation_timeout_ms must be > 0"));
        }
        if self.channel.trim().is_empty() {
            return Err(CacheError::configuration("cache.channel must not be empty"));
        }
        Ok(())
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(
            self.ttl_rules.iter().cloned(),
            Duration::from_secs(self.default_ttl_secs),
        )
    }

    pub fn local_max_ttl(&self) -> Duration {
        Duration::from_secs(self.local_max_ttl_secs)
    }

    pub fn local_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.local_cleanup_interval_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}
