use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::DistributedTier;
use crate::error::Result;
use crate::local::CachedEntry;

/// In-process stand-in for the shared store.
///
/// Clones share the same map, so handing a clone to each cache stack
/// behaves like several instances talking to one Redis.
#[derive(Clone, Debug, Default)]
pub struct MemoryTier {
    entries: Arc<DashMap<String, CachedEntry>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }
}

#[async_trait]
impl DistributedTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if !entry.is_expired() {
            return Ok(Some(entry.data.as_ref().clone()));
        }
        drop(entry);
        self.entries.remove_if(key, |_, e| e.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CachedEntry::new(Arc::new(value.to_vec()), ttl),
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn ping(&self) -> bool {
        true
    }
}
