//! Request pipeline hooks: read-through for cacheable queries and
//! post-commit invalidation for mutating commands.
//!
//! Request types opt in by implementing [`CacheableQuery`] or
//! [`InvalidatingCommand`]; handlers themselves never see the cache.
//!
//! ```text
//! query:   bypass? ──no──> key → lookup ──hit──> return
//!             │                    └──miss──> handler → store L1+L2 → return
//!             └──yes──> handler → store L1+L2 → return
//!
//! command: [resolve patterns, BeforeWrite] → handler ──err──> return err
//!             └──ok──> [resolve patterns, AfterWrite] → purge L1+L2 → publish → return
//! ```

use std::future::Future;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::TwoTierCache;
use crate::error::CacheError;
use crate::keys::{CacheKey, InvalidationPattern};
use crate::metrics;
use crate::pubsub::InvalidationBroadcaster;
use crate::serializer::CacheSerializer;
use crate::ttl::{CacheTtl, TtlPolicy};

/// A read request whose result may be served from cache.
pub trait CacheableQuery: Send + Sync {
    type Output: Serialize + DeserializeOwned + Default + Send + Sync;

    fn cache_key(&self) -> CacheKey;

    /// Requested TTL; [`CacheTtl::Policy`] (or zero) defers to the TTL table.
    fn cache_ttl(&self) -> CacheTtl {
        CacheTtl::Policy
    }

    /// Skip the lookup but still store the fresh result.
    fn bypass_cache(&self) -> bool {
        false
    }
}

/// When an [`InvalidatingCommand`] computes its patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionTiming {
    /// Use [`InvalidatingCommand::invalidation_patterns`] as is.
    #[default]
    Static,
    /// Resolve before the handler runs, for commands that delete or change
    /// what the lookup needs.
    BeforeWrite,
    /// Resolve after the handler succeeded.
    AfterWrite,
}

/// A write request that invalidates cached reads once it succeeds.
#[async_trait]
pub trait InvalidatingCommand: Send + Sync {
    /// Collaborators the resolution needs, passed in explicitly by the caller.
    type Lookup: ?Sized + Send + Sync;

    /// Declared patterns; also the fallback when resolution fails.
    fn invalidation_patterns(&self) -> Vec<InvalidationPattern>;

    fn resolution_timing(&self) -> ResolutionTiming {
        ResolutionTiming::Static
    }

    /// Patterns that depend on entity state. Errors (including "not found")
    /// make the pipeline fall back to the declared patterns.
    async fn resolve_patterns(&self, _lookup: &Self::Lookup) -> anyhow::Result<Vec<InvalidationPattern>> {
        Ok(self.invalidation_patterns())
    }
}

/// Outcome of a population attempt, kept apart from the origin's own error.
enum Populate<E> {
    Origin(E),
    Uncacheable(CacheError),
}

/// Cache-aware execution of queries and commands.
#[derive(Clone)]
pub struct CachePipeline {
    cache: TwoTierCache,
    policy: TtlPolicy,
    serializer: CacheSerializer,
    broadcaster: InvalidationBroadcaster,
}

impl CachePipeline {
    pub fn new(
        cache: TwoTierCache,
        serializer: CacheSerializer,
        broadcaster: InvalidationBroadcaster,
    ) -> Self {
        let policy = cache.policy().clone();
        Self {
            cache,
            policy,
            serializer,
            broadcaster,
        }
    }

    pub fn cache(&self) -> &TwoTierCache {
        &self.cache
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn serializer(&self) -> CacheSerializer {
        self.serializer
    }

    pub fn broadcaster(&self) -> &InvalidationBroadcaster {
        &self.broadcaster
    }

    /// Serve `query` from cache, or run `handler` and cache its result.
    ///
    /// Only the handler's own error is returned; cache problems degrade to
    /// running the handler.
    pub async fn query<Q, F, Fut, E>(&self, query: &Q, handler: F) -> Result<Q::Output, E>
    where
        Q: CacheableQuery,
        F: Fn() -> Fut + Sync,
        Fut: Future<Output = Result<Q::Output, E>> + Send,
        E: Send,
    {
        let key = query.cache_key();
        let ttl = self.policy.effective(&key, query.cache_ttl());

        if query.bypass_cache() {
            tracing::debug!(key = %key, "cache bypassed, executing handler");
            let value = handler().await?;
            match self.serializer.serialize(&value) {
                Ok(bytes) => self.cache.set(key.as_str(), bytes, ttl).await,
                Err(e) => tracing::warn!(key = %key, error = %e, "failed to serialize result for cache"),
            }
            return Ok(value);
        }

        if let Some(bytes) = self.cache.get(key.as_str()).await {
            match self.serializer.deserialize::<Q::Output>(&bytes) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to deserialize cached value, refreshing");
                    self.cache.remove(key.as_str()).await;
                }
            }
        }

        let serializer = self.serializer;
        let handler_ref = &handler;
        let mut computed: Option<Q::Output> = None;
        let slot = &mut computed;

        let outcome = self
            .cache
            .populate(key.as_str(), ttl, move || async move {
                let value = handler_ref().await.map_err(Populate::Origin)?;
                let encoded = serializer.serialize(&value);
                *slot = Some(value);
                encoded.map_err(Populate::Uncacheable)
            })
            .await;

        // This caller ran the handler itself.
        if let Some(value) = computed {
            if let Err(Populate::Uncacheable(e)) = &outcome {
                tracing::warn!(key = %key, error = %e, "failed to serialize result for cache");
            }
            return Ok(value);
        }

        match outcome {
            Ok(bytes) => match self.serializer.deserialize::<Q::Output>(&bytes) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "shared result did not decode, executing handler");
                }
            },
            Err(Populate::Origin(e)) => return Err(e),
            Err(Populate::Uncacheable(_)) => {}
        }
        handler().await
    }

    /// Run `handler` and, if it succeeds, invalidate what the command
    /// touches: locally in both tiers first, then on every peer.
    ///
    /// A failed handler invalidates nothing. Resolution and broadcast
    /// failures are logged; they never fail the command.
    pub async fn command<C, F, Fut, T, E>(
        &self,
        command: &C,
        lookup: &C::Lookup,
        handler: F,
    ) -> Result<T, E>
    where
        C: InvalidatingCommand,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let correlation_id = Uuid::new_v4().to_string();
        let span = tracing::debug_span!("invalidating_command", correlation_id = %correlation_id);

        async {
            let timing = command.resolution_timing();
            let resolved_early = match timing {
                ResolutionTiming::BeforeWrite => Some(self.resolve(command, lookup).await),
                _ => None,
            };

            let output = handler().await?;

            let patterns = match (timing, resolved_early) {
                (_, Some(patterns)) => patterns,
                (ResolutionTiming::AfterWrite, None) => self.resolve(command, lookup).await,
                _ => command.invalidation_patterns(),
            };
            self.invalidate(&patterns, Some(&correlation_id)).await;
            Ok::<T, E>(output)
        }
        .instrument(span)
        .await
    }

    /// Purge `patterns` from both local tiers, then publish each one.
    pub async fn invalidate(&self, patterns: &[InvalidationPattern], correlation_id: Option<&str>) {
        let mut unique: Vec<&InvalidationPattern> = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if !unique.contains(&pattern) {
                unique.push(pattern);
            }
        }

        for pattern in &unique {
            self.cache.remove_by_pattern(pattern).await;
            metrics::record_invalidation("local");
        }

        for pattern in &unique {
            if let Err(e) = self.broadcaster.publish(pattern, correlation_id).await {
                metrics::record_cache_error("publish");
                tracing::warn!(
                    pattern = %pattern,
                    error = %e,
                    "failed to broadcast cache invalidation, peers stay stale until TTL"
                );
            }
        }
    }

    async fn resolve<C: InvalidatingCommand>(
        &self,
        command: &C,
        lookup: &C::Lookup,
    ) -> Vec<InvalidationPattern> {
        match resolve_patterns(command, lookup).await {
            Ok(patterns) => patterns,
            Err(e) => {
                metrics::record_cache_error("resolve");
                let fallback = command.invalidation_patterns();
                tracing::warn!(
                    error = %e,
                    fallback = ?fallback.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "using declared invalidation patterns"
                );
                fallback
            }
        }
    }
}

async fn resolve_patterns<C: InvalidatingCommand>(
    command: &C,
    lookup: &C::Lookup,
) -> crate::error::Result<Vec<InvalidationPattern>> {
    command
        .resolve_patterns(lookup)
        .await
        .map_err(|e| CacheError::Resolution(format!("{e:#}")))
}
