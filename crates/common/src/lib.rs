//! Shared identifiers and value types.

pub mod types;

pub use types::{BookingId, CorrelationId, IdempotencyKey, Money, ShowId, TicketId};
