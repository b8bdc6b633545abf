//! PostgreSQL integration tests for the capacity ledger.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p booking --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use booking::{
    Booking, CapacityLedger, CapacityLedgerExt, LedgerConfig, PostgresBookingStore,
    ReserveOutcome, Show, ShowsRepository, Ticket, TicketsRepository,
};
use chrono::Utc;
use common::{BookingId, CorrelationId, Money, ShowId, TicketId};
use serial_test::serial;
use sqlx::PgPool;
use store::PostgresDatabase;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresDatabase::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresBookingStore {
    let info = get_container_info().await;
    let db = PostgresDatabase::connect(&info.connection_string, 10)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE bookings, shows, tickets, outbox, processed_keys")
        .execute(db.pool())
        .await
        .unwrap();

    PostgresBookingStore::new(db)
}

async fn add_show(store: &PostgresBookingStore, capacity: u32) -> ShowId {
    let show = Show {
        id: ShowId::new(),
        external_id: Uuid::new_v4(),
        number_of_tickets: capacity,
        start_time: Utc::now(),
        title: "Money Dreams".to_string(),
        venue: "Zürich".to_string(),
    };
    assert!(store.add_show(&show).await.unwrap());
    show.id
}

async fn count(store: &PostgresBookingStore, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    sqlx::query_scalar(&sql)
        .fetch_one(store.database().pool())
        .await
        .unwrap()
}

fn retry_config() -> LedgerConfig {
    LedgerConfig {
        attempt_timeout: Duration::from_secs(10),
        max_retries: 50,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(100),
    }
}

#[tokio::test]
#[serial]
async fn accepted_booking_commits_with_its_event() {
    let store = get_test_store().await;
    let show_id = add_show(&store, 5).await;
    let booking = Booking::new(BookingId::new(), show_id, 2, "a@example.com");

    let outcome = store
        .reserve(&booking, Some(&CorrelationId::new("req-1")))
        .await
        .unwrap();

    assert!(outcome.is_accepted());
    assert_eq!(store.available_seats(show_id).await.unwrap(), 3);
    assert_eq!(count(&store, "bookings").await, 1);

    let entries = store.database().outbox_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, "BookingMade");
    assert_eq!(entries[0].correlation_id(), Some("req-1"));
}

#[tokio::test]
#[serial]
async fn rejected_booking_writes_nothing() {
    let store = get_test_store().await;
    let show_id = add_show(&store, 1).await;
    let booking = Booking::new(BookingId::new(), show_id, 2, "a@example.com");

    let outcome = store.reserve(&booking, None).await.unwrap();

    assert_eq!(
        outcome,
        ReserveOutcome::Rejected {
            requested: 2,
            available: 1
        }
    );
    assert_eq!(count(&store, "bookings").await, 0);
    assert_eq!(count(&store, "outbox").await, 0);
    assert_eq!(count(&store, "processed_keys").await, 0);
}

#[tokio::test]
#[serial]
async fn retried_booking_is_stored_once() {
    let store = get_test_store().await;
    let show_id = add_show(&store, 4).await;
    let booking = Booking::new(BookingId::new(), show_id, 2, "a@example.com");

    store.reserve(&booking, None).await.unwrap();
    let retry = store.reserve(&booking, None).await.unwrap();

    assert!(matches!(
        retry,
        ReserveOutcome::Accepted {
            duplicate: true,
            ..
        }
    ));
    assert_eq!(count(&store, "bookings").await, 1);
    assert_eq!(count(&store, "outbox").await, 1);
    assert_eq!(store.available_seats(show_id).await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_reservations_never_overbook() {
    let store = Arc::new(get_test_store().await);
    let show_id = add_show(&store, 2).await;
    let config = retry_config();

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let store = Arc::clone(&store);
            let config = config.clone();
            tokio::spawn(async move {
                let booking = Booking::new(BookingId::new(), show_id, 2, "a@example.com");
                store.reserve_with_retry(&booking, None, &config).await
            })
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
    assert_eq!(count(&store, "bookings").await, 1);
    assert_eq!(count(&store, "outbox").await, 1);
}

#[tokio::test]
#[serial]
async fn tickets_keep_their_price() {
    let store = get_test_store().await;
    let ticket = Ticket {
        ticket_id: TicketId::new("t-1"),
        price: Money::new("50.30", "GBP"),
        customer_email: "a@example.com".to_string(),
    };

    store.add_ticket(&ticket).await.unwrap();
    store.add_ticket(&ticket).await.unwrap();

    assert_eq!(store.all_tickets().await.unwrap(), vec![ticket.clone()]);

    store.remove_ticket(&ticket.ticket_id).await.unwrap();
    assert!(store.all_tickets().await.unwrap().is_empty());
}
