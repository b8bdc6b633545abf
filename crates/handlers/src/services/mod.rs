//! Partner-service boundaries and in-memory implementations.

pub mod external_booking;
pub mod files;
pub mod receipts;
pub mod spreadsheets;

pub use external_booking::{ExternalBooking, ExternalBookingApi, InMemoryExternalBookingApi};
pub use files::{FileApi, InMemoryFileStorage};
pub use receipts::{
    InMemoryReceiptsService, IssueReceiptRequest, IssueReceiptResponse, ReceiptsService,
};
pub use spreadsheets::{InMemorySpreadsheets, SpreadsheetsApi};
