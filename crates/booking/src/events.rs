//! Integration events published through the outbox.
//!
//! The set of event types is closed: [`EventKind`] lists every type the
//! system publishes and each payload struct is bound to exactly one kind
//! through [`DomainEvent::KIND`].

use chrono::{DateTime, Utc};
use common::{BookingId, IdempotencyKey, Money, ShowId, TicketId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use store::{OutboxEntry, OutboxEntryId};
use uuid::Uuid;

use crate::entities::{Booking, Ticket};

/// Every event type carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BookingMade,
    TicketBookingConfirmed,
    TicketBookingCanceled,
    TicketPrinted,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 4] = [
        EventKind::BookingMade,
        EventKind::TicketBookingConfirmed,
        EventKind::TicketBookingCanceled,
        EventKind::TicketPrinted,
    ];

    /// Wire name, also used as the bus topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BookingMade => "BookingMade",
            EventKind::TicketBookingConfirmed => "TicketBookingConfirmed",
            EventKind::TicketBookingCanceled => "TicketBookingCanceled",
            EventKind::TicketPrinted => "TicketPrinted",
        }
    }

    /// Looks up a kind by its wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields common to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// Unique per event. Also becomes the outbox entry and message id.
    pub id: Uuid,
    pub published_at: DateTime<Utc>,

    /// Stable across retries of the request that produced the event.
    pub idempotency_key: IdempotencyKey,
}

impl EventHeader {
    /// Creates a header with a fresh id, stamped now.
    pub fn new(idempotency_key: IdempotencyKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            published_at: Utc::now(),
            idempotency_key,
        }
    }
}

/// A typed event payload.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync {
    const KIND: EventKind;

    fn header(&self) -> &EventHeader;

    /// Builds the outbox entry that carries this event.
    fn to_outbox_entry(&self) -> store::Result<OutboxEntry> {
        let header = self.header();
        OutboxEntry::builder()
            .id(OutboxEntryId::from_uuid(header.id))
            .event_type(Self::KIND.as_str())
            .payload(self)?
            .idempotency_key(&header.idempotency_key)
            .created_at(header.published_at)
            .build()
    }
}

/// Seats were reserved for a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingMade {
    pub header: EventHeader,
    pub booking_id: BookingId,
    pub show_id: ShowId,
    pub number_of_tickets: u32,
    pub customer_email: String,
}

impl BookingMade {
    /// The event for an accepted booking, keyed by the booking id.
    pub fn for_booking(booking: &Booking) -> Self {
        Self {
            header: EventHeader::new(IdempotencyKey::new(booking.id.to_string())),
            booking_id: booking.id,
            show_id: booking.show_id,
            number_of_tickets: booking.number_of_tickets,
            customer_email: booking.customer_email.clone(),
        }
    }
}

impl DomainEvent for BookingMade {
    const KIND: EventKind = EventKind::BookingMade;

    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// A ticket was paid for and must be issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBookingConfirmed {
    pub header: EventHeader,
    pub ticket_id: TicketId,
    pub customer_email: String,
    pub price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<BookingId>,
}

impl TicketBookingConfirmed {
    /// Builds the event from a confirmed ticket.
    pub fn new(header: EventHeader, ticket: &Ticket, booking_id: Option<BookingId>) -> Self {
        Self {
            header,
            ticket_id: ticket.ticket_id.clone(),
            customer_email: ticket.customer_email.clone(),
            price: ticket.price.clone(),
            booking_id,
        }
    }

    /// The ticket this confirmation describes.
    pub fn ticket(&self) -> Ticket {
        Ticket {
            ticket_id: self.ticket_id.clone(),
            price: self.price.clone(),
            customer_email: self.customer_email.clone(),
        }
    }
}

impl DomainEvent for TicketBookingConfirmed {
    const KIND: EventKind = EventKind::TicketBookingConfirmed;

    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// A ticket was canceled and must be refunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBookingCanceled {
    pub header: EventHeader,
    pub ticket_id: TicketId,
    pub customer_email: String,
    pub price: Money,
}

impl TicketBookingCanceled {
    /// Builds the event from a canceled ticket.
    pub fn new(header: EventHeader, ticket: &Ticket) -> Self {
        Self {
            header,
            ticket_id: ticket.ticket_id.clone(),
            customer_email: ticket.customer_email.clone(),
            price: ticket.price.clone(),
        }
    }
}

impl DomainEvent for TicketBookingCanceled {
    const KIND: EventKind = EventKind::TicketBookingCanceled;

    fn header(&self) -> &EventHeader {
        &self.header
    }
}

/// A printable ticket file was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPrinted {
    pub header: EventHeader,
    pub ticket_id: TicketId,
    pub file_name: String,
}

impl DomainEvent for TicketPrinted {
    const KIND: EventKind = EventKind::TicketPrinted;

    fn header(&self) -> &EventHeader {
        &self.header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_their_wire_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("OrderCreated"), None);
    }

    #[test]
    fn outbox_entry_carries_event_identity() {
        let booking = Booking::new(BookingId::new(), ShowId::new(), 2, "a@example.com");
        let event = BookingMade::for_booking(&booking);

        let entry = event.to_outbox_entry().unwrap();

        assert_eq!(entry.id.as_uuid(), event.header.id);
        assert_eq!(entry.event_type, "BookingMade");
        assert_eq!(entry.idempotency_key(), Some(booking.id.to_string().as_str()));

        let decoded: BookingMade = serde_json::from_value(entry.payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn confirmed_ticket_omits_missing_booking_id() {
        let ticket = Ticket {
            ticket_id: TicketId::new("t-1"),
            price: Money::new("50.30", "GBP"),
            customer_email: "a@example.com".to_string(),
        };
        let event = TicketBookingConfirmed::new(
            EventHeader::new(IdempotencyKey::new("k")),
            &ticket,
            None,
        );

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("booking_id").is_none());
        assert_eq!(json["price"]["amount"], "50.30");
        assert_eq!(event.ticket(), ticket);
    }
}
