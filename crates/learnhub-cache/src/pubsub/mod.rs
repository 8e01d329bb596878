//! Cross-instance cache invalidation.
//!
//! ## How It Works
//!
//! 1. The writing instance clears the matching keys from its own L1 and
//!    from the shared L2, then publishes the pattern
//! 2. Every subscribed instance removes the matching keys from its L1
//! 3. The publisher recognises its own message by `source_instance_id` and
//!    skips it (purging is idempotent, so processing it would also be fine)
//!
//! ```text
//! Instance 1: remove_by_pattern("courses:list:*") → PUBLISH cache:invalidate {...}
//!   ↓
//! Instance 2: listener receives → removes "courses:list:*" from L1
//! Instance 3: listener receives → removes "courses:list:*" from L1
//! ```

mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::TwoTierCache;
use crate::error::{CacheError, Result};
use crate::keys::InvalidationPattern;
use crate::metrics;

pub use memory::MemoryInvalidationBus;
pub use self::redis::RedisInvalidationBus;

/// Default channel name.
pub const INVALIDATION_CHANNEL: &str = "cache:invalidate";

/// Wire record published once per invalidated pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInvalidationMessage {
    pub key_pattern: String,
    pub source_instance_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl CacheInvalidationMessage {
    pub fn new(
        pattern: &InvalidationPattern,
        source_instance_id: Uuid,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            key_pattern: pattern.to_string(),
            source_instance_id,
            timestamp: OffsetDateTime::now_utc(),
            correlation_id,
        }
    }

    pub fn pattern(&self) -> InvalidationPattern {
        InvalidationPattern::parse(&self.key_pattern)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

/// Transport that fans invalidation messages out to every instance.
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, message: &CacheInvalidationMessage) -> Result<()>;

    /// Start delivering messages to `listener` in a background task.
    fn subscribe(&self, listener: InvalidationListener) -> JoinHandle<()>;
}

/// Applies received messages to the local L1 tier.
#[derive(Clone)]
pub struct InvalidationListener {
    instance_id: Uuid,
    cache: TwoTierCache,
    skip_own: bool,
}

impl InvalidationListener {
    pub fn new(instance_id: Uuid, cache: TwoTierCache) -> Self {
        Self {
            instance_id,
            cache,
            skip_own: true,
        }
    }

    /// Whether messages published by this instance are skipped.
    pub fn skip_own_messages(mut self, skip: bool) -> Self {
        self.skip_own = skip;
        self
    }

    /// Handle one message. Returns the number of L1 entries removed.
    pub fn on_message(&self, message: &CacheInvalidationMessage) -> usize {
        if self.skip_own && message.source_instance_id == self.instance_id {
            tracing::trace!(pattern = %message.key_pattern, "skipping own invalidation message");
            return 0;
        }

        let removed = self.cache.remove_local_matching(&message.pattern());
        metrics::record_invalidation("remote");
        tracing::debug!(
            pattern = %message.key_pattern,
            source = %message.source_instance_id,
            correlation_id = ?message.correlation_id,
            removed,
            "received cache invalidation"
        );
        removed
    }

    /// Called when messages may have been lost; drops all of L1.
    pub fn on_gap(&self) {
        tracing::warn!("invalidation messages lost, clearing local cache tier");
        self.cache.clear_local();
    }
}

/// Publishes invalidation patterns on behalf of one instance.
#[derive(Clone)]
pub struct InvalidationBroadcaster {
    instance_id: Uuid,
    bus: Option<Arc<dyn InvalidationBus>>,
    timeout: Duration,
}

impl InvalidationBroadcaster {
    pub fn new(instance_id: Uuid, bus: Arc<dyn InvalidationBus>, timeout: Duration) -> Self {
        Self {
            instance_id,
            bus: Some(bus),
            timeout,
        }
    }

    /// Broadcaster for a single-instance deployment: publishing is a no-op.
    pub fn disabled(instance_id: Uuid) -> Self {
        Self {
            instance_id,
            bus: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn is_enabled(&self) -> bool {
        self.bus.is_some()
    }

    pub async fn publish(
        &self,
        pattern: &InvalidationPattern,
        correlation_id: Option<&str>,
    ) -> Result<()> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        let message = CacheInvalidationMessage::new(
            pattern,
            self.instance_id,
            correlation_id.map(str::to_string),
        );
        tokio::time::timeout(self.timeout, bus.publish(&message))
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))??;

        tracing::debug!(pattern = %pattern, bus = bus.name(), "published cache invalidation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalTier;
    use crate::ttl::TtlPolicy;

    fn cache() -> TwoTierCache {
        TwoTierCache::local_only(
            LocalTier::new(100, Duration::from_secs(60)),
            TtlPolicy::uniform(Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_message_wire_format() {
        let source = Uuid::new_v4();
        let message = CacheInvalidationMessage::new(
            &InvalidationPattern::parse("courses:list:*"),
            source,
            Some("req-1".to_string()),
        );
        let json = message.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["keyPattern"], "courses:list:*");
        assert_eq!(value["sourceInstanceId"], source.to_string());
        assert_eq!(value["correlationId"], "req-1");
        assert!(value["timestamp"].is_string());

        let back = CacheInvalidationMessage::from_json(&json).unwrap();
        assert_eq!(back.pattern(), InvalidationPattern::parse("courses:list:*"));
    }

    #[test]
    fn test_correlation_id_is_optional() {
        let json = r#"{"keyPattern":"courses:id:1","sourceInstanceId":"6f1c2a0e-4a59-4d0e-9a4b-1f0a8c3d2e11","timestamp":"2026-01-01T00:00:00Z"}"#;
        let message = CacheInvalidationMessage::from_json(json).unwrap();
        assert!(message.correlation_id.is_none());
        assert_eq!(message.pattern(), InvalidationPattern::parse("courses:id:1"));
    }

    #[tokio::test]
    async fn test_listener_skips_own_messages() {
        let id = Uuid::new_v4();
        let cache = cache();
        cache.set("courses:id:1", b"v".to_vec(), Duration::from_secs(60)).await;

        let listener = InvalidationListener::new(id, cache.clone());
        let own = CacheInvalidationMessage::new(&InvalidationPattern::parse("courses:*"), id, None);
        assert_eq!(listener.on_message(&own), 0);
        assert!(cache.local().contains("courses:id:1"));

        let peer = CacheInvalidationMessage::new(
            &InvalidationPattern::parse("courses:*"),
            Uuid::new_v4(),
            None,
        );
        assert_eq!(listener.on_message(&peer), 1);
        assert!(!cache.local().contains("courses:id:1"));
    }

    #[tokio::test]
    async fn test_listener_can_process_own_messages() {
        let id = Uuid::new_v4();
        let cache = cache();
        cache.set("courses:id:1", b"v".to_vec(), Duration::from_secs(60)).await;

        let listener = InvalidationListener::new(id, cache.clone()).skip_own_messages(false);
        let own = CacheInvalidationMessage::new(&InvalidationPattern::parse("courses:id:1"), id, None);
        assert_eq!(listener.on_message(&own), 1);
        // Idempotent on redelivery.
        assert_eq!(listener.on_message(&own), 0);
    }

    #[tokio::test]
    async fn test_disabled_broadcaster_is_noop() {
        let broadcaster = InvalidationBroadcaster::disabled(Uuid::new_v4());
        assert!(!broadcaster.is_enabled());
        broadcaster
            .publish(&InvalidationPattern::parse("courses:*"), None)
            .await
            .unwrap();
    }
}
