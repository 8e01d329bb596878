use std::time::Duration;

use thiserror::Error;

/// Errors raised inside the cache subsystem.
///
/// None of these are ever returned to the request that the cache was
/// supporting: the store and the pipeline log them and fall back to the
/// origin. They surface only from the tier/bus traits themselves and from
/// administrative entry points.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("cache deserialization error: {0}")]
    Deserialization(String),

    #[error("distributed cache error: {0}")]
    Distributed(String),

    #[error("distributed cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalidation broadcast error: {0}")]
    Broadcast(String),

    #[error("invalidation pattern resolution failed: {0}")]
    Resolution(String),

    #[error("cache configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    pub fn distributed(message: impl Into<String>) -> Self {
        Self::Distributed(message.into())
    }

    pub fn broadcast(message: impl Into<String>) -> Self {
        Self::Broadcast(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True when the error means the distributed tier could not be reached,
    /// as opposed to a bad payload.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Distributed(_) | Self::Timeout(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        Self::Distributed(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::Distributed(format!("failed to get Redis connection: {e}"))
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::Deserialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
