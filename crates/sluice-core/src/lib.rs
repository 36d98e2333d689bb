use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Core Message Types
// ============================================================================

/// The core message structure that flows through the system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier, assigned by the producer
    pub uuid: String,
    /// Free-form string metadata carried alongside the payload
    pub metadata: Metadata,
    /// Opaque payload bytes
    pub payload: Bytes,
}

impl Message {
    pub fn new(uuid: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            uuid: uuid.into(),
            metadata: Metadata::default(),
            payload: payload.into(),
        }
    }

    /// Payload interpreted as UTF-8, lossily
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// String key/value metadata attached to a message
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata(HashMap<String, String>);

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    /// Set a key, overwriting any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Generate a fresh v4 UUID string for message identifiers
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// Acknowledgement Types
// ============================================================================

/// Decision reported back to the transport for one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Nack,
}
