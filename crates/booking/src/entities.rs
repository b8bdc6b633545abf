//! Records owned by the booking domain.

use chrono::{DateTime, Utc};
use common::{BookingId, Money, ShowId, TicketId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A show with a fixed number of seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Show {
    pub id: ShowId,

    /// Identifier of the show in the external ticketing partner.
    pub external_id: Uuid,

    /// Seat capacity. Never exceeded by the sum of accepted bookings.
    pub number_of_tickets: u32,

    pub start_time: DateTime<Utc>,
    pub title: String,
    pub venue: String,
}

/// A request for seats, identified by a caller-supplied id.
///
/// Retrying a booking with the same id is safe: it is accepted at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub show_id: ShowId,
    pub number_of_tickets: u32,
    pub customer_email: String,
}

impl Booking {
    /// Creates a booking request for `number_of_tickets` seats.
    pub fn new(
        id: BookingId,
        show_id: ShowId,
        number_of_tickets: u32,
        customer_email: impl Into<String>,
    ) -> Self {
        Self {
            id,
            show_id,
            number_of_tickets,
            customer_email: customer_email.into(),
        }
    }
}

/// A confirmed ticket as stored for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub price: Money,
    pub customer_email: String,
}
