//! Wiring of the cache subsystem from configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{CacheStats, TwoTierCache};
use crate::config::{CacheConfig, RedisConfig};
use crate::distributed::{DistributedTier, MemoryTier, RedisTier};
use crate::error::Result;
use crate::local::LocalTier;
use crate::pipeline::CachePipeline;
use crate::pubsub::{
    InvalidationBroadcaster, InvalidationBus, InvalidationListener, MemoryInvalidationBus,
    RedisInvalidationBus,
};
use crate::serializer::CacheSerializer;

/// One process's cache: store, pipeline, and the background tasks that keep
/// its in-process tier honest (expiry sweep and invalidation listener).
///
/// Background tasks are aborted when the stack is dropped.
pub struct CacheStack {
    instance_id: Uuid,
    config: CacheConfig,
    cache: TwoTierCache,
    pipeline: CachePipeline,
    bus: Option<Arc<dyn InvalidationBus>>,
    tasks: Vec<JoinHandle<()>>,
}

impl CacheStack {
    /// Build the stack described by `config`, connecting to Redis when it is
    /// enabled.
    ///
    /// An unreachable Redis never fails startup: the stack falls back to the
    /// in-process tier only and logs a warning.
    pub async fn connect(config: &CacheConfig, redis: &RedisConfig) -> Result<Self> {
        config.validate()?;
        redis.validate()?;

        if !redis.enabled {
            tracing::info!("Redis disabled, using local cache only");
            return Ok(Self::assemble(config.clone(), None, None));
        }

        tracing::info!(url = %redis.url, "Connecting to Redis");

        let Some(pool) = create_pool(redis) else {
            return Ok(Self::assemble(config.clone(), None, None));
        };

        match pool.get().await {
            Ok(_) => {
                tracing::info!("Connected to Redis");
                let tier = RedisTier::new(pool.clone(), config.key_namespace.clone(), config.scan_batch_size);
                let bus = RedisInvalidationBus::new(pool, redis.url.clone(), config.channel.clone());
                Ok(Self::assemble(config.clone(), Some(Arc::new(tier)), Some(Arc::new(bus))))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to connect to Redis. Falling back to local cache."
                );
                Ok(Self::assemble(config.clone(), None, None))
            }
        }
    }

    /// Stack with no distributed tier and no broadcast channel.
    pub fn local_only(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config.clone(), None, None))
    }

    /// Stack sharing an in-memory distributed tier and bus. Stacks built
    /// from clones of the same `tier` and `bus` behave like instances of one
    /// fleet sharing a Redis.
    pub fn in_memory(config: &CacheConfig, tier: MemoryTier, bus: MemoryInvalidationBus) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config.clone(), Some(Arc::new(tier)), Some(Arc::new(bus))))
    }

    /// Stack over arbitrary tier and bus implementations.
    pub fn with_parts(
        config: &CacheConfig,
        distributed: Option<Arc<dyn DistributedTier>>,
        bus: Option<Arc<dyn InvalidationBus>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config.clone(), distributed, bus))
    }

    fn assemble(
        config: CacheConfig,
        distributed: Option<Arc<dyn DistributedTier>>,
        bus: Option<Arc<dyn InvalidationBus>>,
    ) -> Self {
        let instance_id = Uuid::new_v4();
        let policy = config.ttl_policy();
        let local = LocalTier::new(config.local_max_entries, config.local_max_ttl());
        let timeout = config.operation_timeout();

        let cache = match distributed {
            Some(distributed) => TwoTierCache::with_distributed(local, distributed, policy, timeout),
            None => TwoTierCache::local_only(local, policy),
        };

        let mut tasks = vec![cache.local().spawn_cleanup(config.local_cleanup_interval())];

        let broadcaster = match &bus {
            Some(bus) => {
                let listener = InvalidationListener::new(instance_id, cache.clone())
                    .skip_own_messages(config.skip_own_messages);
                tasks.push(bus.subscribe(listener));
                InvalidationBroadcaster::new(instance_id, Arc::clone(bus), timeout)
            }
            None => InvalidationBroadcaster::disabled(instance_id),
        };

        let pipeline = CachePipeline::new(cache.clone(), CacheSerializer::new(config.serializer), broadcaster);

        tracing::info!(
            instance_id = %instance_id,
            mode = %cache.stats().mode,
            broadcast = bus.as_ref().map(|b| b.name()).unwrap_or("disabled"),
            serializer = %config.serializer,
            "cache stack ready"
        );

        Self {
            instance_id,
            config,
            cache,
            pipeline,
            bus,
            tasks,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache(&self) -> &TwoTierCache {
        &self.cache
    }

    pub fn pipeline(&self) -> &CachePipeline {
        &self.pipeline
    }

    pub fn bus(&self) -> Option<&Arc<dyn InvalidationBus>> {
        self.bus.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Stop the background tasks.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for CacheStack {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Redis connection pool for `redis`, or `None` (logged) when the settings are unusable.
pub fn create_pool(redis: &RedisConfig) -> Option<deadpool_redis::Pool> {
    let timeout = Duration::from_millis(redis.timeout_ms);
    let mut pool_config = deadpool_redis::Config::from_url(&redis.url);
    let settings = pool_config.pool.get_or_insert_with(Default::default);
    settings.max_size = redis.pool_size;
    settings.timeouts.wait = Some(timeout);
    settings.timeouts.create = Some(timeout);
    settings.timeouts.recycle = Some(timeout);

    match pool_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => Some(pool),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            None
        }
    }
}
