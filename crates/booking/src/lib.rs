//! Booking domain.
//!
//! This crate provides:
//! - Shows, bookings and tickets, with repositories over both store backends
//! - The capacity ledger, which accepts a booking only while seats remain and
//!   stages `BookingMade` in the same transaction
//! - The closed set of integration events published through the outbox

pub mod entities;
pub mod error;
pub mod events;
pub mod ledger;
pub mod postgres;
pub mod repository;
pub mod tables;

pub use entities::{Booking, Show, Ticket};
pub use error::{BookingError, Result};
pub use events::{
    BookingMade, DomainEvent, EventHeader, EventKind, TicketBookingCanceled,
    TicketBookingConfirmed, TicketPrinted,
};
pub use ledger::{BOOKING_SCOPE, CapacityLedger, CapacityLedgerExt, LedgerConfig, ReserveOutcome};
pub use repository::{
    BookingStore, InMemoryBookingStore, PostgresBookingStore, ShowsRepository, TicketsRepository,
};
pub use tables::{BookingTables, BookingTx};
