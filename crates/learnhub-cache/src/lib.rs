//! Read-through, write-invalidated caching for LearnHub.
//!
//! ## Architecture
//!
//! - **L1 (DashMap)**: in-process, microsecond latency, per-instance, short-lived
//! - **L2 (Redis)**: network, millisecond latency, shared across instances
//! - **Pub/Sub**: cross-instance invalidation of L1
//!
//! ## Cache Hierarchy
//!
//! ```text
//! query → L1 (DashMap) → L2 (Redis) → handler (DB)
//!              ↓              ↓             ↓
//!         <1µs latency   ~5ms latency  ~50ms latency
//! ```
//!
//! Queries opt in through [`CacheableQuery`], writes through
//! [`InvalidatingCommand`]; [`CachePipeline`] runs both.
//!
//! ## Graceful Degradation
//!
//! If Redis is unavailable or disabled, the system falls back to L1-only
//! mode (one cache per instance). Cache failures never fail a request.

pub mod backend;
pub mod config;
pub mod distributed;
pub mod error;
pub mod flight;
pub mod keys;
pub mod local;
pub mod metrics;
pub mod pipeline;
pub mod pubsub;
pub mod serializer;
mod staleness;
pub mod stack;
pub mod ttl;

pub use backend::{CacheStats, TwoTierCache};
pub use config::{CacheConfig, RedisConfig};
pub use distributed::{DistributedTier, MemoryTier, RedisTier};
pub use error::{CacheError, Result};
pub use keys::{CacheKey, InvalidationPattern, KeyBuilder};
pub use local::{CachedEntry, LocalTier};
pub use pipeline::{CachePipeline, CacheableQuery, InvalidatingCommand, ResolutionTiming};
pub use pubsub::{
    CacheInvalidationMessage, InvalidationBroadcaster, InvalidationBus, InvalidationListener,
    MemoryInvalidationBus, RedisInvalidationBus,
};
pub use serializer::{CacheSerializer, SerializerKind};
pub use stack::CacheStack;
pub use ttl::{CacheTtl, TtlPolicy, TtlRule};
