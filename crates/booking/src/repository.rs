//! Shows and tickets repositories.

use async_trait::async_trait;
use common::{ShowId, TicketId};
use store::{Database, MemoryDatabase, PostgresDatabase, ProcessedKey, Transaction};

use crate::entities::{Show, Ticket};
use crate::error::{BookingError, Result};
use crate::tables::{BookingTables, BookingTx};

/// Booking-domain storage over a [`Database`].
///
/// Implements [`CapacityLedger`](crate::CapacityLedger) and both
/// repositories on the same backend.
#[derive(Clone)]
pub struct BookingStore<D> {
    db: D,
}

/// Booking store over the in-memory database.
pub type InMemoryBookingStore = BookingStore<MemoryDatabase<BookingTables>>;
/// Booking store over PostgreSQL.
pub type PostgresBookingStore = BookingStore<PostgresDatabase>;

impl<D> BookingStore<D> {
    /// Wraps a database.
    pub fn new(db: D) -> Self {
        Self { db }
    }

    /// The underlying database, shared with the outbox relay.
    pub fn database(&self) -> &D {
        &self.db
    }
}

/// Show registration and lookup.
#[async_trait]
pub trait ShowsRepository: Send + Sync {
    /// Creates a show. Returns `false` if one with the same id or external
    /// id already exists.
    ///
    /// Fails with [`BookingError::InvalidQuantity`] unless the capacity is
    /// between 1 and `i32::MAX`.
    async fn add_show(&self, show: &Show) -> Result<bool>;

    async fn get_show(&self, id: ShowId) -> Result<Option<Show>>;
}

/// Local copy of confirmed tickets.
#[async_trait]
pub trait TicketsRepository: Send + Sync {
    /// Stores a ticket. Adding a ticket twice keeps the first copy.
    async fn add_ticket(&self, ticket: &Ticket) -> Result<()>;

    /// Stores a ticket and records `key` in one transaction.
    ///
    /// Returns `false` without writing anything when `key` is already
    /// recorded.
    async fn add_ticket_once(&self, ticket: &Ticket, key: &ProcessedKey) -> Result<bool>;

    /// Removes a ticket. Removing a missing ticket is not an error.
    async fn remove_ticket(&self, ticket_id: &TicketId) -> Result<()>;

    /// Every stored ticket, ordered by id.
    async fn all_tickets(&self) -> Result<Vec<Ticket>>;
}

#[async_trait]
impl<D> ShowsRepository for BookingStore<D>
where
    D: Database,
    D::Tx: BookingTx,
{
    #[tracing::instrument(skip(self, show), fields(show_id = %show.id))]
    async fn add_show(&self, show: &Show) -> Result<bool> {
        let seats = show.number_of_tickets;
        if seats == 0 || i32::try_from(seats).is_err() {
            return Err(BookingError::InvalidQuantity(seats));
        }

        let mut tx = self.db.begin().await?;
        let created = tx.insert_show(show).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn get_show(&self, id: ShowId) -> Result<Option<Show>> {
        let mut tx = self.db.begin().await?;
        Ok(tx.find_show(id).await?)
    }
}

#[async_trait]
impl<D> TicketsRepository for BookingStore<D>
where
    D: Database,
    D::Tx: BookingTx,
{
    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.ticket_id))]
    async fn add_ticket(&self, ticket: &Ticket) -> Result<()> {
        let mut tx = self.db.begin().await?;
        if tx.insert_ticket(ticket).await? {
            tx.commit().await?;
        } else {
            tracing::debug!("ticket already stored");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.ticket_id, key = %key))]
    async fn add_ticket_once(&self, ticket: &Ticket, key: &ProcessedKey) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        if !tx.mark_if_absent(key).await? {
            return Ok(false);
        }
        tx.insert_ticket(ticket).await?;
        tx.commit().await?;
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn remove_ticket(&self, ticket_id: &TicketId) -> Result<()> {
        let mut tx = self.db.begin().await?;
        if tx.delete_ticket(ticket_id).await? {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn all_tickets(&self) -> Result<Vec<Ticket>> {
        let mut tx = self.db.begin().await?;
        Ok(tx.list_tickets().await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::Money;
    use uuid::Uuid;

    use super::*;

    fn ticket(id: &str) -> Ticket {
        Ticket {
            ticket_id: TicketId::new(id),
            price: Money::new("50.30", "GBP"),
            customer_email: "customer@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn show_external_id_is_unique() {
        let store = InMemoryBookingStore::new(MemoryDatabase::new());
        let show = Show {
            id: ShowId::new(),
            external_id: Uuid::new_v4(),
            number_of_tickets: 10,
            start_time: Utc::now(),
            title: "Frozen Lake".to_string(),
            venue: "Oslo".to_string(),
        };
        let copy = Show {
            id: ShowId::new(),
            ..show.clone()
        };

        assert!(store.add_show(&show).await.unwrap());
        assert!(!store.add_show(&copy).await.unwrap());
        assert_eq!(store.get_show(show.id).await.unwrap(), Some(show));
        assert_eq!(store.get_show(copy.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn show_capacity_must_fit_the_seat_column() {
        let store = InMemoryBookingStore::new(MemoryDatabase::new());
        let show = |seats| Show {
            id: ShowId::new(),
            external_id: Uuid::new_v4(),
            number_of_tickets: seats,
            start_time: Utc::now(),
            title: "Frozen Lake".to_string(),
            venue: "Oslo".to_string(),
        };

        for seats in [0, 3_000_000_000] {
            let err = store.add_show(&show(seats)).await.unwrap_err();
            assert!(matches!(err, BookingError::InvalidQuantity(n) if n == seats));
        }
        assert!(store.add_show(&show(i32::MAX as u32)).await.unwrap());
    }

    #[tokio::test]
    async fn tickets_are_added_once_and_removed() {
        let store = InMemoryBookingStore::new(MemoryDatabase::new());
        let mut changed = ticket("t-1");

        store.add_ticket(&changed).await.unwrap();
        changed.customer_email = "other@example.com".to_string();
        store.add_ticket(&changed).await.unwrap();
        store.add_ticket(&ticket("t-0")).await.unwrap();

        let all = store.all_tickets().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].ticket_id.as_str(), "t-0");
        assert_eq!(all[1].customer_email, "customer@example.com");

        store.remove_ticket(&TicketId::new("t-1")).await.unwrap();
        store.remove_ticket(&TicketId::new("missing")).await.unwrap();
        assert_eq!(store.all_tickets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ticket_and_key_commit_together() {
        let store = InMemoryBookingStore::new(MemoryDatabase::new());
        let key = ProcessedKey::new("store_tickets", "req-1:t-1");

        assert!(store.add_ticket_once(&ticket("t-1"), &key).await.unwrap());
        store.remove_ticket(&TicketId::new("t-1")).await.unwrap();
        // A redelivery after the ticket was removed must not resurrect it.
        assert!(!store.add_ticket_once(&ticket("t-1"), &key).await.unwrap());

        assert!(store.all_tickets().await.unwrap().is_empty());
        assert_eq!(store.database().processed_count().await, 1);
    }
}
