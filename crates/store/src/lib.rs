//! Relational store layer.
//!
//! Provides the unit of work shared by domain writes and outbox appends, the
//! outbox itself, and durable idempotency records. Two backends implement the
//! same contracts: an in-memory database and PostgreSQL.

pub mod error;
pub mod idempotency;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod transaction;

pub use error::{Result, StoreError};
pub use idempotency::{IdempotencyStore, ProcessedKey};
pub use memory::{MemoryDatabase, MemoryTransaction, Tables};
pub use outbox::{
    CORRELATION_ID, DispatchStatus, IDEMPOTENCY_KEY, OutboxEntry, OutboxEntryBuilder,
    OutboxEntryId, OutboxStore, OutboxWriter,
};
pub use postgres::{PgTransaction, PostgresDatabase};
pub use transaction::{Database, OutboxStaging, Transaction};
