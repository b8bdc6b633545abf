//! Domain operations available inside a unit of work.

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::{BookingId, ShowId, TicketId};
use store::{MemoryTransaction, Result, Transaction};

use crate::entities::{Booking, Show, Ticket};

/// Booking-domain reads and writes on an open transaction.
///
/// Implemented for both store backends so the ledger logic is written once.
#[async_trait]
pub trait BookingTx: Transaction {
    async fn find_show(&mut self, id: ShowId) -> Result<Option<Show>>;

    /// Like [`find_show`](BookingTx::find_show), but also holds the show's
    /// row lock until the transaction ends.
    async fn lock_show(&mut self, id: ShowId) -> Result<Option<Show>>;

    /// Inserts a show. Returns `false` when its id or external id exists.
    async fn insert_show(&mut self, show: &Show) -> Result<bool>;

    /// Sum of seats held by accepted bookings for a show.
    async fn allocated_seats(&mut self, show_id: ShowId) -> Result<u64>;

    /// Inserts a booking. Returns `false` when the id exists.
    async fn insert_booking(&mut self, booking: &Booking) -> Result<bool>;

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<bool>;

    async fn delete_ticket(&mut self, ticket_id: &TicketId) -> Result<bool>;

    async fn list_tickets(&mut self) -> Result<Vec<Ticket>>;
}

/// Booking-domain tables of a [`MemoryDatabase`](store::MemoryDatabase).
#[derive(Debug, Clone, Default)]
pub struct BookingTables {
    pub shows: BTreeMap<ShowId, Show>,
    pub bookings: BTreeMap<BookingId, Booking>,
    pub tickets: BTreeMap<TicketId, Ticket>,
}

impl BookingTables {
    /// Bookings made for `show_id`.
    pub fn bookings_for(&self, show_id: ShowId) -> impl Iterator<Item = &Booking> {
        self.bookings
            .values()
            .filter(move |booking| booking.show_id == show_id)
    }
}

#[async_trait]
impl BookingTx for MemoryTransaction<BookingTables> {
    async fn find_show(&mut self, id: ShowId) -> Result<Option<Show>> {
        Ok(self.domain().shows.get(&id).cloned())
    }

    async fn lock_show(&mut self, id: ShowId) -> Result<Option<Show>> {
        // The transaction already holds every table exclusively.
        self.find_show(id).await
    }

    async fn insert_show(&mut self, show: &Show) -> Result<bool> {
        let tables = self.domain_mut();
        let taken = tables.shows.contains_key(&show.id)
            || tables
                .shows
                .values()
                .any(|existing| existing.external_id == show.external_id);
        if taken {
            return Ok(false);
        }
        tables.shows.insert(show.id, show.clone());
        Ok(true)
    }

    async fn allocated_seats(&mut self, show_id: ShowId) -> Result<u64> {
        Ok(self
            .domain()
            .bookings_for(show_id)
            .map(|booking| u64::from(booking.number_of_tickets))
            .sum())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<bool> {
        let bookings = &mut self.domain_mut().bookings;
        if bookings.contains_key(&booking.id) {
            return Ok(false);
        }
        bookings.insert(booking.id, booking.clone());
        Ok(true)
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<bool> {
        let tickets = &mut self.domain_mut().tickets;
        if tickets.contains_key(&ticket.ticket_id) {
            return Ok(false);
        }
        tickets.insert(ticket.ticket_id.clone(), ticket.clone());
        Ok(true)
    }

    async fn delete_ticket(&mut self, ticket_id: &TicketId) -> Result<bool> {
        Ok(self.domain_mut().tickets.remove(ticket_id).is_some())
    }

    async fn list_tickets(&mut self) -> Result<Vec<Ticket>> {
        Ok(self.domain().tickets.values().cloned().collect())
    }
}
