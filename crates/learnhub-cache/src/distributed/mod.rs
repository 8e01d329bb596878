//! Distributed (L2) tier shared by every instance.
//!
//! `RedisTier` is the production backend. `MemoryTier` keeps the same
//! contract inside one process so several cache stacks can share it.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::MemoryTier;
pub use self::redis::{RedisTier, escape_glob};

/// Shared cache store reachable by all instances.
///
/// Every method may fail; callers treat failures as a miss or a skipped
/// write, never as a request failure.
#[async_trait]
pub trait DistributedTier: Send + Sync {
    /// Short backend name for logs and stats (`redis`, `memory`).
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    ///
    /// Implementations must work in bounded batches rather than one
    /// blocking sweep of the whole keyspace.
    async fn remove_by_prefix(&self, prefix: &str) -> Result<u64>;

    /// Health probe.
    async fn ping(&self) -> bool;
}
