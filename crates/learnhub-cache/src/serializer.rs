//! Byte encoding of cached payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Which encoding the deployment uses. Every instance of a fleet must agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    /// MessagePack with named fields (compact, tolerant of field reordering).
    #[default]
    #[serde(alias = "messagepack")]
    Msgpack,
    Json,
}

impl std::fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializerKind::Msgpack => write!(f, "msgpack"),
            SerializerKind::Json => write!(f, "json"),
        }
    }
}

/// Encodes values for both cache tiers.
///
/// An empty byte slice always decodes to `T::default()`; that is how the
/// store represents "no entry" without a separate flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSerializer {
    kind: SerializerKind,
}

impl CacheSerializer {
    pub fn new(kind: SerializerKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> SerializerKind {
        self.kind
    }

    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self.kind {
            SerializerKind::Msgpack => Ok(rmp_serde::to_vec_named(value)?),
            SerializerKind::Json => {
                serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
            }
        }
    }

    pub fn deserialize<T: DeserializeOwned + Default>(&self, bytes: &[u8]) -> Result<T> {
        if bytes.is_empty() {
            return Ok(T::default());
        }
        match self.kind {
            SerializerKind::Msgpack => Ok(rmp_serde::from_slice(bytes)?),
            SerializerKind::Json => serde_json::from_slice(bytes)
                .map_err(|e| CacheError::Deserialization(e.to_string())),
        }
    }
}
