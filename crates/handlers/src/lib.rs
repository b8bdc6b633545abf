//! Event handlers for the booking system.
//!
//! This crate provides:
//! - Narrow boundaries to partner services (receipts, spreadsheets, file
//!   storage, the external ticketing system) with in-memory implementations
//! - One [`EventHandler`] per side effect, bound to a single event type
//! - [`build_registry`], which wires the full handler set

pub mod bookings;
pub mod error;
pub mod registry;
pub mod services;
pub mod tickets;
pub mod typed;

pub use bookings::BookPlaceInExternalSystem;
pub use error::{Result, ServiceError};
pub use registry::{Dependencies, build_registry};
pub use services::{
    ExternalBooking, ExternalBookingApi, FileApi, InMemoryExternalBookingApi,
    InMemoryFileStorage, InMemoryReceiptsService, InMemorySpreadsheets, IssueReceiptRequest,
    IssueReceiptResponse, ReceiptsService, SpreadsheetsApi,
};
pub use tickets::{
    AppendToTracker, IssueReceipt, PrintTicket, RemoveCanceledTicket, StoreTickets,
    TICKETS_TO_PRINT_SHEET, TICKETS_TO_REFUND_SHEET, TicketRefundToSheet, ticket_file_name,
};
pub use typed::{EventHandler, TypedHandler};
