use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::{self, AsyncCommands};

use super::DistributedTier;
use crate::error::Result;

/// Redis-backed distributed tier.
///
/// Keys are stored under `namespace` so several applications can share one
/// Redis database. Prefix removal walks the keyspace with `SCAN ... MATCH`
/// in `scan_batch`-sized pages and `UNLINK`s each page, so no single command
/// holds the server for the whole sweep.
#[derive(Clone)]
pub struct RedisTier {
    pool: Pool,
    namespace: String,
    scan_batch: usize,
}

impl RedisTier {
    pub fn new(pool: Pool, namespace: impl Into<String>, scan_batch: usize) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            scan_batch: scan_batch.max(1),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    #[inline]
    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }
}

#[async_trait]
impl DistributedTier for RedisTier {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        let data = conn.get::<_, Option<Vec<u8>>>(self.full_key(key)).await?;
        Ok(data)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;
        // PSETEX keeps sub-second TTLs meaningful; zero would be rejected.
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        conn.pset_ex::<_, _, ()>(self.full_key(key), value, ttl_ms)
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(self.full_key(key)).await?;
        Ok(())
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.pool.get().await?;
        let pattern = format!("{}*", escape_glob(&self.full_key(prefix)));

        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_batch)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let unlinked: u64 = redis::cmd("UNLINK")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await?;
                removed += unlinked;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!(prefix = %prefix, removed, "removed keys by prefix (L2)");
        Ok(removed)
    }

    async fn ping(&self) -> bool {
        let Ok(mut conn) = self.pool.get().await else {
            return false;
        };
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }
}

/// Escape Redis glob metacharacters so a literal prefix can be used in
/// `SCAN ... MATCH`.
pub fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len() + 4);
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
