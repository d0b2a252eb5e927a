//! Typed messages, their stable type identity and the payload codec boundary.

use crate::error::{AppError, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::marker::PhantomData;
use validator::Validate;

/// A message that can travel through a queue.
///
/// `MESSAGE_TYPE` is the declared schema name. It is hashed into the
/// [`MessageTypeId`] stored on every row, so renaming it orphans existing rows.
pub trait QueueMessage: Validate + Send + Sync + 'static {
    const MESSAGE_TYPE: &'static str;
}

/// Stable identity of a message schema, derived from its declared name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTypeId(u64);

impl MessageTypeId {
    /// Derive the identity from a declared type name (first 8 bytes of SHA-256)
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    pub fn of<M: QueueMessage>() -> Self {
        Self::from_name(M::MESSAGE_TYPE)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Serializes typed messages to and from the opaque row payload
pub trait PayloadCodec<M>: Send + Sync {
    fn encode(&self, message: &M) -> Result<String>;
    fn decode(&self, payload: &str) -> Result<M>;
}

/// JSON payload codec
pub struct JsonCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> JsonCodec<M> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for JsonCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> PayloadCodec<M> for JsonCodec<M>
where
    M: Serialize + DeserializeOwned,
{
    fn encode(&self, message: &M) -> Result<String> {
        Ok(serde_json::to_string(message)?)
    }

    fn decode(&self, payload: &str) -> Result<M> {
        serde_json::from_str(payload)
            .map_err(|e| AppError::Serialization(format!("Failed to decode payload: {}", e)))
    }
}
