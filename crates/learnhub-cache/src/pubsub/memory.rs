use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::{CacheInvalidationMessage, InvalidationBus, InvalidationListener};
use crate::error::Result;

/// Default buffer size for the broadcast channel.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// In-process invalidation bus built on a tokio broadcast channel.
///
/// Clones share the channel, so stacks created from clones of one bus act
/// like instances subscribed to the same Redis channel.
#[derive(Clone)]
pub struct MemoryInvalidationBus {
    sender: broadcast::Sender<CacheInvalidationMessage>,
}

impl Default for MemoryInvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInvalidationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Raw receiver, for tooling that wants to observe the channel.
    pub fn receiver(&self) -> broadcast::Receiver<CacheInvalidationMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl InvalidationBus for MemoryInvalidationBus {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, message: &CacheInvalidationMessage) -> Result<()> {
        // No subscribers is not an error: there is simply nobody to tell.
        let delivered = self.sender.send(message.clone()).unwrap_or_default();
        tracing::trace!(pattern = %message.key_pattern, delivered, "memory bus publish");
        Ok(())
    }

    fn subscribe(&self, listener: InvalidationListener) -> JoinHandle<()> {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        listener.on_message(&message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "invalidation listener lagged behind");
                        listener.on_gap();
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("invalidation bus closed, listener stopping");
                        break;
                    }
                }
            }
        })
    }
}
