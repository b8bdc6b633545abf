use booking::{
    Booking, CapacityLedger, InMemoryBookingStore, Show, ShowsRepository, TicketsRepository,
    Ticket,
};
use chrono::Utc;
use common::{BookingId, Money, ShowId, TicketId};
use criterion::{Criterion, criterion_group, criterion_main};
use store::MemoryDatabase;
use uuid::Uuid;

fn show(capacity: u32) -> Show {
    Show {
        id: ShowId::new(),
        external_id: Uuid::new_v4(),
        number_of_tickets: capacity,
        start_time: Utc::now(),
        title: "Bench Night".to_string(),
        venue: "Hall".to_string(),
    }
}

fn bench_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryBookingStore::new(MemoryDatabase::new());
    let show = show(u32::MAX / 2);
    rt.block_on(async { store.add_show(&show).await.unwrap() });

    c.bench_function("ledger/reserve", |b| {
        b.iter(|| {
            rt.block_on(async {
                let booking = Booking::new(BookingId::new(), show.id, 1, "bench@example.com");
                store.reserve(&booking, None).await.unwrap();
            });
        });
    });
}

fn bench_duplicate_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryBookingStore::new(MemoryDatabase::new());
    let show = show(10);
    let booking = Booking::new(BookingId::new(), show.id, 1, "bench@example.com");
    rt.block_on(async {
        store.add_show(&show).await.unwrap();
        store.reserve(&booking, None).await.unwrap();
    });

    c.bench_function("ledger/reserve_duplicate", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.reserve(&booking, None).await.unwrap();
            });
        });
    });
}

fn bench_rejected_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryBookingStore::new(MemoryDatabase::new());
    let show = show(1);
    rt.block_on(async { store.add_show(&show).await.unwrap() });

    c.bench_function("ledger/reserve_rejected", |b| {
        b.iter(|| {
            rt.block_on(async {
                let booking = Booking::new(BookingId::new(), show.id, 2, "bench@example.com");
                store.reserve(&booking, None).await.unwrap();
            });
        });
    });
}

fn bench_add_ticket(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryBookingStore::new(MemoryDatabase::new());

    c.bench_function("tickets/add", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ticket = Ticket {
                    ticket_id: TicketId::new(Uuid::new_v4().to_string()),
                    price: Money::new("10.00", "EUR"),
                    customer_email: "bench@example.com".to_string(),
                };
                store.add_ticket(&ticket).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve,
    bench_duplicate_reserve,
    bench_rejected_reserve,
    bench_add_ticket
);
criterion_main!(benches);
