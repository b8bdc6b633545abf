//! External ticketing partner trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use common::BookingId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ServiceError};

/// Seats booked in the partner's system for one of our bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalBooking {
    /// Our booking id; the partner deduplicates on it.
    pub booking_id: BookingId,
    /// The partner's id for the show.
    pub external_event_id: Uuid,
    pub number_of_tickets: u32,
    pub customer_email: String,
}

/// Partner system that holds seats for bookings made here.
#[async_trait]
pub trait ExternalBookingApi: Send + Sync {
    async fn book(&self, request: ExternalBooking) -> Result<()>;
}

#[derive(Debug, Default)]
struct InMemoryExternalBookingState {
    bookings: HashMap<BookingId, ExternalBooking>,
    fail_on_book: bool,
}

/// In-memory partner for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExternalBookingApi {
    state: Arc<Mutex<InMemoryExternalBookingState>>,
}

impl InMemoryExternalBookingApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `book` call fail until reset.
    pub fn set_fail_on_book(&self, fail: bool) {
        self.state().fail_on_book = fail;
    }

    /// The booking stored under `booking_id`, if any.
    pub fn booking(&self, booking_id: BookingId) -> Option<ExternalBooking> {
        self.state().bookings.get(&booking_id).cloned()
    }

    pub fn booking_count(&self) -> usize {
        self.state().bookings.len()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryExternalBookingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExternalBookingApi for InMemoryExternalBookingApi {
    async fn book(&self, request: ExternalBooking) -> Result<()> {
        let mut state = self.state();
        if state.fail_on_book {
            return Err(ServiceError::Unavailable("partner unavailable".to_string()));
        }
        state.bookings.entry(request.booking_id).or_insert(request);
        Ok(())
    }
}
