//! Bus envelope.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use store::{CORRELATION_ID, IDEMPOTENCY_KEY, OutboxEntry};
use uuid::Uuid;

use crate::error::HandlerError;

/// Metadata key carrying why a message was dead-lettered.
pub const DEAD_LETTER_REASON: &str = "dead_letter_reason";
/// Metadata key carrying which handler gave up on a dead-lettered message.
pub const DEAD_LETTER_HANDLER: &str = "dead_letter_handler";
/// Metadata key carrying a dead-lettered message's original topic.
pub const ORIGINAL_TOPIC: &str = "original_topic";

/// A message as carried on the bus.
///
/// Messages relayed from the outbox reuse the outbox entry id, so every
/// republish of one entry is recognisable as the same message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Creates a message with a fresh id and no metadata.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            metadata: HashMap::new(),
        }
    }

    /// The message that publishes an outbox entry.
    pub fn from_outbox_entry(entry: &OutboxEntry) -> Self {
        Self {
            id: entry.id.as_uuid(),
            topic: entry.event_type.clone(),
            payload: entry.payload.clone(),
            metadata: entry.metadata.clone(),
        }
    }

    /// Adds or replaces one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Correlation id of the request that caused this message.
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID).map(String::as_str)
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.metadata.get(IDEMPOTENCY_KEY).map(String::as_str)
    }

    /// Decodes the payload. A payload of the wrong shape is a terminal
    /// failure: redelivering it cannot help.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
