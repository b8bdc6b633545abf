//! Outbox entries, the transactional writer and the relay-side store contract.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, IdempotencyKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Result, StoreError, Transaction};

/// Metadata key carrying the request correlation id.
pub const CORRELATION_ID: &str = "correlation_id";

/// Metadata key carrying the idempotency key consumers deduplicate on.
pub const IDEMPOTENCY_KEY: &str = "idempotency_key";

/// Unique identifier for an outbox entry.
///
/// The relay reuses it as the bus message id, so every republish of the same
/// entry is recognisable downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxEntryId(Uuid);

impl OutboxEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dispatch state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    Dispatched,
}

/// An event staged for publication.
///
/// Created pending inside the transaction of the domain write that produced
/// it; becomes dispatched once the bus has accepted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxEntryId,

    /// Insertion order assigned by the store. Zero until persisted.
    pub sequence: i64,

    /// Event type tag, also used as the bus topic.
    pub event_type: String,

    pub payload: serde_json::Value,

    pub metadata: HashMap<String, String>,

    pub created_at: DateTime<Utc>,

    /// Failed publish attempts so far.
    pub attempts: i32,

    pub last_error: Option<String>,

    pub dispatched_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Creates a new outbox entry builder.
    pub fn builder() -> OutboxEntryBuilder {
        OutboxEntryBuilder::default()
    }

    /// Derived from `dispatched_at`.
    pub fn status(&self) -> DispatchStatus {
        if self.dispatched_at.is_some() {
            DispatchStatus::Dispatched
        } else {
            DispatchStatus::Pending
        }
    }

    /// The `correlation_id` metadata entry, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get(CORRELATION_ID).map(String::as_str)
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.metadata.get(IDEMPOTENCY_KEY).map(String::as_str)
    }
}

/// Builder for constructing outbox entries.
#[derive(Debug, Default)]
pub struct OutboxEntryBuilder {
    id: Option<OutboxEntryId>,
    event_type: Option<String>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, String>,
    created_at: Option<DateTime<Utc>>,
}

impl OutboxEntryBuilder {
    /// Sets the entry ID. If not set, a new ID will be generated.
    pub fn id(mut self, id: OutboxEntryId) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the event type; required.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds one metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Records the correlation id of the originating request.
    pub fn correlation_id(self, id: &CorrelationId) -> Self {
        self.metadata(CORRELATION_ID, id.as_str())
    }

    /// Records the idempotency key of the originating request.
    pub fn idempotency_key(self, key: &IdempotencyKey) -> Self {
        self.metadata(IDEMPOTENCY_KEY, key.as_str())
    }

    /// Sets the creation time. If not set, the current time will be used.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the entry, failing if the event type or payload is missing.
    pub fn build(self) -> Result<OutboxEntry> {
        let event_type = self
            .event_type
            .filter(|t| !t.trim().is_empty())
            .ok_or(StoreError::InvalidEntry("event_type is required"))?;
        let payload = self
            .payload
            .ok_or(StoreError::InvalidEntry("payload is required"))?;

        Ok(OutboxEntry {
            id: self.id.unwrap_or_default(),
            sequence: 0,
            event_type,
            payload,
            metadata: self.metadata,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            attempts: 0,
            last_error: None,
            dispatched_at: None,
        })
    }
}

/// Appends events to the outbox inside the caller's unit of work.
///
/// The writer never commits. If the append fails the caller must abandon the
/// transaction so no domain write survives without its event.
#[derive(Debug, Clone, Default)]
pub struct OutboxWriter {
    correlation_id: Option<CorrelationId>,
}

impl OutboxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps every appended entry that lacks one with this correlation id.
    pub fn with_correlation_id(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id: Some(correlation_id),
        }
    }

    /// Appends `payload` tagged with `event_type`.
    pub async fn append<T: Transaction>(
        &self,
        tx: &mut T,
        event_type: &str,
        payload: serde_json::Value,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<OutboxEntryId> {
        let mut builder = OutboxEntry::builder()
            .event_type(event_type)
            .payload_raw(payload);
        if let Some(key) = idempotency_key {
            builder = builder.idempotency_key(key);
        }
        self.append_entry(tx, builder.build()?).await
    }

    /// Appends a fully built entry.
    #[tracing::instrument(skip(self, tx, entry), fields(event_type = %entry.event_type, entry_id = %entry.id))]
    pub async fn append_entry<T: Transaction>(
        &self,
        tx: &mut T,
        mut entry: OutboxEntry,
    ) -> Result<OutboxEntryId> {
        if let Some(correlation_id) = &self.correlation_id {
            entry
                .metadata
                .entry(CORRELATION_ID.to_string())
                .or_insert_with(|| correlation_id.to_string());
        }

        let id = entry.id;
        tx.insert_outbox_entry(&entry).await?;
        tracing::debug!("outbox entry staged");
        metrics::counter!("outbox_entries_staged_total").increment(1);
        Ok(id)
    }
}

/// Relay-side access to the outbox table.
///
/// Only the relay mutates entries after creation. Claims carry a lease so
/// several relay replicas never publish the same row in parallel; an entry
/// whose lease expired (for example because its relay crashed) becomes
/// claimable again and will be republished.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `limit` pending, unleased entries in insertion order.
    async fn claim_pending(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxEntry>>;

    /// Marks an entry dispatched. Called only after the bus accepted it.
    async fn mark_dispatched(&self, id: OutboxEntryId) -> Result<()>;

    /// Records a failed publish attempt and releases the entry's lease.
    async fn record_failure(&self, id: OutboxEntryId, error: &str) -> Result<()>;

    /// Releases leases without counting an attempt.
    async fn release(&self, ids: &[OutboxEntryId]) -> Result<()>;

    /// Number of entries not yet dispatched.
    async fn pending_count(&self) -> Result<u64>;

    /// Deletes dispatched entries older than `before`. Returns the number removed.
    async fn prune_dispatched(&self, before: DateTime<Utc>) -> Result<u64>;
}

pub(crate) fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    let lease = chrono::TimeDelta::from_std(lease).unwrap_or(chrono::TimeDelta::MAX);
    now.checked_add_signed(lease)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_event_type() {
        let result = OutboxEntry::builder()
            .payload_raw(serde_json::json!({}))
            .build();
        assert!(matches!(result, Err(StoreError::InvalidEntry(_))));
    }

    #[test]
    fn builder_requires_payload() {
        let result = OutboxEntry::builder().event_type("BookingMade").build();
        assert!(matches!(result, Err(StoreError::InvalidEntry(_))));
    }

    #[test]
    fn builder_sets_metadata() {
        let entry = OutboxEntry::builder()
            .event_type("BookingMade")
            .payload_raw(serde_json::json!({"seats": 2}))
            .correlation_id(&CorrelationId::new("corr-1"))
            .idempotency_key(&IdempotencyKey::new("booking-1"))
            .build()
            .unwrap();

        assert_eq!(entry.status(), DispatchStatus::Pending);
        assert_eq!(entry.sequence, 0);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.correlation_id(), Some("corr-1"));
        assert_eq!(entry.idempotency_key(), Some("booking-1"));
    }

    #[test]
    fn dispatched_status_follows_timestamp() {
        let mut entry = OutboxEntry::builder()
            .event_type("BookingMade")
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap();
        entry.dispatched_at = Some(Utc::now());
        assert_eq!(entry.status(), DispatchStatus::Dispatched);
    }

    #[test]
    fn lease_deadline_saturates() {
        let now = Utc::now();
        assert_eq!(lease_deadline(now, Duration::from_secs(5)), now + chrono::TimeDelta::seconds(5));
        assert_eq!(lease_deadline(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
