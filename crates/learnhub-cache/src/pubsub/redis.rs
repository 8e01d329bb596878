use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::{self, AsyncCommands};
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use super::{CacheInvalidationMessage, InvalidationBus, InvalidationListener};
use crate::error::{CacheError, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Redis Pub/Sub transport for invalidation messages.
///
/// Publishing goes through the shared pool. Subscribing needs a dedicated
/// connection (pooled connections cannot `SUBSCRIBE`), opened from
/// `redis_url` and re-opened with exponential backoff when it drops.
#[derive(Clone)]
pub struct RedisInvalidationBus {
    pool: Pool,
    redis_url: String,
    channel: String,
}

impl RedisInvalidationBus {
    pub fn new(pool: Pool, redis_url: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            pool,
            redis_url: redis_url.into(),
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribe and feed messages to `on_message` until the connection
    /// drops. Returns an error describing why it stopped.
    pub async fn listen<F>(&self, mut on_message: F) -> Result<()>
    where
        F: FnMut(CacheInvalidationMessage) + Send,
    {
        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| CacheError::broadcast(format!("failed to create Redis client: {e}")))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::broadcast(format!("failed to get pub/sub connection: {e}")))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| CacheError::broadcast(format!("failed to subscribe: {e}")))?;

        tracing::info!(channel = %self.channel, "Subscribed to cache invalidation channel");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read invalidation message payload");
                    continue;
                }
            };
            match CacheInvalidationMessage::from_json(&payload) {
                Ok(message) => on_message(message),
                Err(e) => {
                    tracing::warn!(error = %e, payload = %payload, "failed to parse invalidation message");
                }
            }
        }

        Err(CacheError::broadcast("pub/sub connection closed"))
    }
}

#[async_trait]
impl InvalidationBus for RedisInvalidationBus {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, message: &CacheInvalidationMessage) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let payload = message.to_json()?;
        conn.publish::<_, _, ()>(&self.channel, &payload)
            .await
            .map_err(|e| CacheError::broadcast(format!("failed to publish invalidation: {e}")))?;
        Ok(())
    }

    /// Spawn the listener loop. It reconnects with exponential backoff and
    /// clears L1 after every reconnect, since messages sent while it was
    /// disconnected are lost.
    fn subscribe(&self, listener: InvalidationListener) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            let mut reconnecting = false;

            loop {
                if reconnecting {
                    listener.on_gap();
                }
                let handler = listener.clone();
                match bus.listen(move |message| {
                    handler.on_message(&message);
                })
                .await
                {
                    Ok(()) => {
                        backoff = Duration::from_secs(1);
                    }
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Cache invalidation listener error, reconnecting..."
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
                reconnecting = true;
            }
        })
    }
}
