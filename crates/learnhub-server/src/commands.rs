//! `learnhub` subcommands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use learnhub_app::features::categories::GetCategoryTree;
use learnhub_app::{Dispatcher, MemoryStore, Repositories};
use learnhub_cache::stack::create_pool;
use learnhub_cache::{
    CacheConfig, CacheInvalidationMessage, CacheStack, InvalidationPattern, RedisInvalidationBus,
};
use serde::Serialize;
use uuid::Uuid;

use crate::cli::{InvalidateArgs, ServeArgs, TtlArgs};
use crate::config::AppConfig;
use crate::seed;

/// Build a dispatcher over `store` that reads and writes through `stack`.
pub fn build_dispatcher(stack: &CacheStack, store: Arc<MemoryStore>) -> Dispatcher {
    Dispatcher::new(stack.pipeline().clone(), Repositories::from_store(store))
}

pub async fn serve(cfg: &AppConfig, args: &ServeArgs) -> anyhow::Result<()> {
    let stack = CacheStack::connect(&cfg.cache, &cfg.redis)
        .await
        .context("cache stack")?;
    let dispatcher = build_dispatcher(&stack, Arc::new(MemoryStore::new()));

    if !args.no_seed {
        seed::demo_catalog(&dispatcher).await?;
        // Warm the hottest read.
        let roots = dispatcher.query(&GetCategoryTree).await?;
        tracing::debug!(roots = roots.len(), "category tree warmed");
    }

    tracing::info!(instance_id = %stack.instance_id(), "learnhub node running, press ctrl-c to stop");

    let mut ticker = tokio::time::interval(Duration::from_secs(args.stats_interval_secs.max(1)));
    ticker.tick().await;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("failed to listen for ctrl-c")?;
                break;
            }
            _ = ticker.tick() => {
                let stats = stack.stats();
                tracing::info!(
                    mode = %stats.mode,
                    l1_entries = stats.l1_entries,
                    in_flight = stats.in_flight,
                    "cache stats"
                );
            }
        }
    }

    tracing::info!("shutting down");
    Ok(())
}

/// What `learnhub ttl` prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TtlReport {
    pub key: String,
    /// Prefix of the rule that matched; absent when the default applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub ttl_secs: u64,
    /// In-process copies never outlive `cache.local_max_ttl_secs`
    pub local_ttl_secs: u64,
}

pub fn ttl_report(cache: &CacheConfig, key: &str) -> TtlReport {
    let policy = cache.ttl_policy();
    let ttl = policy.resolve(key);
    TtlReport {
        key: key.to_string(),
        rule: policy.matching_rule(key).map(|(prefix, _)| prefix.to_string()),
        ttl_secs: ttl.as_secs(),
        local_ttl_secs: ttl.min(cache.local_max_ttl()).as_secs(),
    }
}

pub fn ttl(cfg: &AppConfig, args: &TtlArgs) -> anyhow::Result<()> {
    let report = ttl_report(&cfg.cache, &args.key);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// What `learnhub invalidate` prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    pub key_pattern: String,
    pub correlation_id: String,
    pub broadcast: bool,
}

/// Purge `args.pattern` through `stack` and broadcast it.
pub async fn invalidate_on(
    stack: &CacheStack,
    args: &InvalidateArgs,
) -> anyhow::Result<InvalidationReport> {
    let raw = args.pattern.trim();
    if raw.is_empty() || raw == "*" {
        anyhow::bail!("pattern must name at least an entity, e.g. courses:*");
    }
    let pattern = InvalidationPattern::parse(raw);
    let correlation_id = args
        .correlation_id
        .clone()
        .unwrap_or_else(|| format!("cli-{}", Uuid::new_v4()));

    stack
        .pipeline()
        .invalidate(std::slice::from_ref(&pattern), Some(&correlation_id))
        .await;

    Ok(InvalidationReport {
        key_pattern: pattern.to_string(),
        correlation_id,
        broadcast: stack.pipeline().broadcaster().is_enabled(),
    })
}

pub async fn invalidate(cfg: &AppConfig, args: &InvalidateArgs) -> anyhow::Result<()> {
    if !cfg.redis.enabled {
        tracing::warn!("redis disabled: nothing outside this process will see the invalidation");
    }
    let stack = CacheStack::connect(&cfg.cache, &cfg.redis)
        .await
        .context("cache stack")?;
    let report = invalidate_on(&stack, args).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// One output line of `learnhub watch`.
pub fn watch_line(message: &CacheInvalidationMessage) -> anyhow::Result<String> {
    Ok(message.to_json()?)
}

pub async fn watch(cfg: &AppConfig) -> anyhow::Result<()> {
    if !cfg.redis.enabled {
        anyhow::bail!("watch needs redis.enabled = true; without Redis there is no shared channel");
    }
    let pool = create_pool(&cfg.redis)
        .ok_or_else(|| anyhow!("could not create a Redis pool for {}", cfg.redis.url))?;
    let bus = RedisInvalidationBus::new(pool, cfg.redis.url.clone(), cfg.cache.channel.clone());

    tracing::info!(channel = %bus.channel(), "watching cache invalidations");

    let print = |message: CacheInvalidationMessage| match watch_line(&message) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "failed to encode invalidation message"),
    };

    tokio::select! {
        res = bus.listen(print) => res.context("invalidation channel")?,
        res = tokio::signal::ctrl_c() => res.context("failed to listen for ctrl-c")?,
    }
    Ok(())
}
