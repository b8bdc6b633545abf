//! Capacity-constrained booking ledger.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{BookingId, CorrelationId, ShowId};
use store::{Database, OutboxWriter, ProcessedKey, Transaction};

use crate::entities::Booking;
use crate::error::{BookingError, Result};
use crate::events::{BookingMade, DomainEvent};
use crate::repository::BookingStore;
use crate::tables::BookingTx;

/// Idempotency scope of accepted booking ids.
pub const BOOKING_SCOPE: &str = "booking";

/// Result of a reservation that reached a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The seats are held. `duplicate` is set when the booking id had
    /// already been accepted and nothing new was written.
    Accepted { booking_id: BookingId, duplicate: bool },

    /// Not enough seats left. Nothing was written.
    Rejected { requested: u32, available: u32 },
}

impl ReserveOutcome {
    /// True for both fresh and duplicate acceptances.
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReserveOutcome::Accepted { .. })
    }
}

/// Timeouts and retry policy for reservations.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Upper bound on one attempt, lock waits included.
    pub attempt_timeout: Duration,
    /// Retries after the first attempt for conflicts and timeouts.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(5000),
            max_retries: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl LedgerConfig {
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Reserves seats against a show's fixed capacity.
#[async_trait]
pub trait CapacityLedger: Send + Sync {
    /// Attempts to hold `booking.number_of_tickets` seats.
    ///
    /// Acceptance, the booking record, the booking id's idempotency record and
    /// the `BookingMade` outbox entry commit together or not at all.
    async fn reserve(
        &self,
        booking: &Booking,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<ReserveOutcome>;

    /// Seats not yet held by accepted bookings.
    async fn available_seats(&self, show_id: ShowId) -> Result<u32>;
}

/// Retrying wrapper around [`CapacityLedger::reserve`].
#[async_trait]
pub trait CapacityLedgerExt: CapacityLedger {
    /// Runs `reserve` with a per-attempt timeout, retrying conflicts and
    /// timeouts with exponential backoff.
    ///
    /// Retrying is safe because the booking id makes the reservation
    /// idempotent.
    async fn reserve_with_retry(
        &self,
        booking: &Booking,
        correlation_id: Option<&CorrelationId>,
        config: &LedgerConfig,
    ) -> Result<ReserveOutcome> {
        let mut retry = 0;
        loop {
            let attempt = tokio::time::timeout(
                config.attempt_timeout,
                self.reserve(booking, correlation_id),
            )
            .await
            .unwrap_or(Err(BookingError::Timeout(config.attempt_timeout)));

            match attempt {
                Err(e) if e.is_retryable() && retry < config.max_retries => {
                    retry += 1;
                    metrics::counter!("booking_conflicts_total").increment(1);
                    tracing::debug!(booking_id = %booking.id, retry, error = %e, "retrying reservation");
                    tokio::time::sleep(config.backoff(retry)).await;
                }
                other => return other,
            }
        }
    }
}

impl<T: CapacityLedger + ?Sized> CapacityLedgerExt for T {}

#[async_trait]
impl<D> CapacityLedger for BookingStore<D>
where
    D: Database,
    D::Tx: BookingTx,
{
    #[tracing::instrument(skip(self, booking, correlation_id), fields(booking_id = %booking.id, show_id = %booking.show_id))]
    async fn reserve(
        &self,
        booking: &Booking,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<ReserveOutcome> {
        let requested = booking.number_of_tickets;
        if requested == 0 || i32::try_from(requested).is_err() {
            return Err(BookingError::InvalidQuantity(requested));
        }

        let started = Instant::now();
        let mut tx = self.database().begin().await?;

        let key = ProcessedKey::new(BOOKING_SCOPE, booking.id.to_string());
        if !tx.mark_if_absent(&key).await? {
            tracing::info!("booking already accepted");
            return Ok(ReserveOutcome::Accepted {
                booking_id: booking.id,
                duplicate: true,
            });
        }

        let show = tx
            .lock_show(booking.show_id)
            .await?
            .ok_or(BookingError::ShowNotFound(booking.show_id))?;

        // The booking row outlives its idempotency record.
        if !tx.insert_booking(booking).await? {
            tx.commit().await?;
            tracing::info!("booking already stored");
            return Ok(ReserveOutcome::Accepted {
                booking_id: booking.id,
                duplicate: true,
            });
        }

        let allocated = tx
            .allocated_seats(booking.show_id)
            .await?
            .saturating_sub(u64::from(requested));
        let available = u64::from(show.number_of_tickets).saturating_sub(allocated);

        if u64::from(requested) > available {
            metrics::counter!("bookings_rejected_total").increment(1);
            tracing::info!(requested, available, "not enough seats available");
            // Dropping the transaction discards the booking row and the
            // idempotency record, so the id can be retried once seats free up.
            return Ok(ReserveOutcome::Rejected {
                requested,
                available: available as u32,
            });
        }

        let writer = correlation_id
            .cloned()
            .map(OutboxWriter::with_correlation_id)
            .unwrap_or_default();
        let event = BookingMade::for_booking(booking);
        writer.append_entry(&mut tx, event.to_outbox_entry()?).await?;

        tx.commit().await?;

        metrics::counter!("bookings_accepted_total").increment(1);
        metrics::histogram!("reserve_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(requested, "booking accepted");

        Ok(ReserveOutcome::Accepted {
            booking_id: booking.id,
            duplicate: false,
        })
    }

    async fn available_seats(&self, show_id: ShowId) -> Result<u32> {
        let mut tx = self.database().begin().await?;
        let show = tx
            .find_show(show_id)
            .await?
            .ok_or(BookingError::ShowNotFound(show_id))?;
        let allocated = tx.allocated_seats(show_id).await?;

        Ok(u64::from(show.number_of_tickets).saturating_sub(allocated) as u32)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use store::{MemoryDatabase, OutboxEntry};
    use uuid::Uuid;

    use super::*;
    use crate::entities::Show;
    use crate::repository::{InMemoryBookingStore, ShowsRepository};

    async fn store_with_show(capacity: u32) -> (InMemoryBookingStore, ShowId) {
        let store = BookingStore::new(MemoryDatabase::new());
        let show = Show {
            id: ShowId::new(),
            external_id: Uuid::new_v4(),
            number_of_tickets: capacity,
            start_time: Utc::now(),
            title: "Money Dreams".to_string(),
            venue: "Zürich".to_string(),
        };
        store.add_show(&show).await.unwrap();
        (store, show.id)
    }

    fn booking(show_id: ShowId, seats: u32) -> Booking {
        Booking::new(BookingId::new(), show_id, seats, "customer@example.com")
    }

    async fn outbox(store: &InMemoryBookingStore) -> Vec<OutboxEntry> {
        store.database().outbox_entries().await
    }

    #[tokio::test]
    async fn accepted_booking_stages_its_event() {
        let (store, show_id) = store_with_show(10).await;
        let request = booking(show_id, 3);

        let outcome = store.reserve(&request, None).await.unwrap();

        assert_eq!(
            outcome,
            ReserveOutcome::Accepted {
                booking_id: request.id,
                duplicate: false
            }
        );
        assert_eq!(store.available_seats(show_id).await.unwrap(), 7);

        let entries = outbox(&store).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, "BookingMade");
        let event: BookingMade = serde_json::from_value(entries[0].payload.clone()).unwrap();
        assert_eq!(event.booking_id, request.id);
        assert_eq!(event.number_of_tickets, 3);
    }

    #[tokio::test]
    async fn rejection_leaves_no_trace() {
        let (store, show_id) = store_with_show(2).await;

        let outcome = store.reserve(&booking(show_id, 3), None).await.unwrap();

        assert_eq!(
            outcome,
            ReserveOutcome::Rejected {
                requested: 3,
                available: 2
            }
        );
        assert!(outbox(&store).await.is_empty());
        assert_eq!(store.database().processed_count().await, 0);
        assert_eq!(store.available_seats(show_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn booking_exactly_the_remaining_seats_is_accepted() {
        let (store, show_id) = store_with_show(5).await;

        assert!(store.reserve(&booking(show_id, 3), None).await.unwrap().is_accepted());
        assert!(store.reserve(&booking(show_id, 2), None).await.unwrap().is_accepted());
        assert!(!store.reserve(&booking(show_id, 1), None).await.unwrap().is_accepted());
        assert_eq!(store.available_seats(show_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_booking_id_is_accepted_once() {
        let (store, show_id) = store_with_show(2).await;
        let request = booking(show_id, 2);

        store.reserve(&request, None).await.unwrap();
        // The show is now full, but the retry still reports acceptance.
        let retry = store.reserve(&request, None).await.unwrap();

        assert_eq!(
            retry,
            ReserveOutcome::Accepted {
                booking_id: request.id,
                duplicate: true
            }
        );
        assert_eq!(outbox(&store).await.len(), 1);
        let bookings = store
            .database()
            .read(|tables| tables.bookings_for(show_id).count())
            .await;
        assert_eq!(bookings, 1);
    }

    #[tokio::test]
    async fn stored_booking_is_a_duplicate_without_its_idempotency_record() {
        let (store, show_id) = store_with_show(2).await;
        let request = booking(show_id, 2);
        store.reserve(&request, None).await.unwrap();

        let key = ProcessedKey::new(BOOKING_SCOPE, request.id.to_string());
        assert!(store.database().forget_processed(&key).await);

        let retry = store.reserve(&request, None).await.unwrap();

        assert_eq!(
            retry,
            ReserveOutcome::Accepted {
                booking_id: request.id,
                duplicate: true
            }
        );
        assert_eq!(outbox(&store).await.len(), 1);
        assert_eq!(store.available_seats(show_id).await.unwrap(), 0);
        assert_eq!(store.database().processed_count().await, 1);
    }

    #[tokio::test]
    async fn zero_seats_is_invalid() {
        let (store, show_id) = store_with_show(2).await;

        let err = store.reserve(&booking(show_id, 0), None).await.unwrap_err();

        assert!(matches!(err, BookingError::InvalidQuantity(0)));
    }

    #[tokio::test]
    async fn unknown_show_is_reported() {
        let (store, _) = store_with_show(2).await;
        let missing = ShowId::new();

        let err = store.reserve(&booking(missing, 1), None).await.unwrap_err();

        assert!(matches!(err, BookingError::ShowNotFound(id) if id == missing));
        assert_eq!(store.database().processed_count().await, 0);
    }

    #[tokio::test]
    async fn correlation_id_is_stamped_on_the_event() {
        let (store, show_id) = store_with_show(2).await;
        let correlation_id = CorrelationId::new("req-42");

        store
            .reserve(&booking(show_id, 1), Some(&correlation_id))
            .await
            .unwrap();

        assert_eq!(outbox(&store).await[0].correlation_id(), Some("req-42"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_never_overbook() {
        let (store, show_id) = store_with_show(2).await;
        let store = Arc::new(store);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.reserve(&booking(show_id, 2), None).await })
            })
            .collect();

        let mut accepted = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ReserveOutcome::Accepted { .. } => accepted += 1,
                ReserveOutcome::Rejected { .. } => rejected += 1,
            }
        }

        assert_eq!(accepted, 1);
        assert_eq!(rejected, 49);
        assert_eq!(outbox(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_timeouts() {
        let (store, show_id) = store_with_show(2).await;
        // An open transaction holds every in-memory table.
        let blocker = store.database().begin().await.unwrap();
        let config = LedgerConfig {
            attempt_timeout: Duration::from_millis(20),
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        };

        let err = store
            .reserve_with_retry(&booking(show_id, 1), None, &config)
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::Timeout(_)));
        drop(blocker);
        assert!(outbox(&store).await.is_empty());
        assert_eq!(store.available_seats(show_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn retry_succeeds_once_the_lock_is_released() {
        let (store, show_id) = store_with_show(2).await;
        let blocker = store.database().begin().await.unwrap();
        let config = LedgerConfig {
            attempt_timeout: Duration::from_millis(20),
            max_retries: 10,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        };
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(blocker);
        });

        let outcome = store
            .reserve_with_retry(&booking(show_id, 1), None, &config)
            .await
            .unwrap();

        release.await.unwrap();
        assert!(outcome.is_accepted());
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = LedgerConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            ..LedgerConfig::default()
        };

        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(40));
        assert_eq!(config.backoff(4), Duration::from_millis(50));
        assert_eq!(config.backoff(40), Duration::from_millis(50));
    }
}
