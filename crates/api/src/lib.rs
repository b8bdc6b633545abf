//! HTTP boundary and process wiring for the booking system.
//!
//! Provides the REST endpoints that create shows, book seats and record
//! ticket status changes, plus the background workers (outbox relay and
//! one consumer per handler), with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use booking::{BookingStore, BookingTx};
use handlers::{
    Dependencies, ExternalBookingApi, FileApi, InMemoryExternalBookingApi, InMemoryFileStorage,
    InMemoryReceiptsService, InMemorySpreadsheets, ReceiptsService, SpreadsheetsApi,
    build_registry,
};
use messaging::{InMemoryBus, OutboxRelay, RegistryError};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{Database, OutboxStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::metrics::MetricsState;
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: AppState, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            outbox: Arc::clone(&state.outbox_store),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/shows", post(routes::shows::create))
        .route("/book-tickets", post(routes::bookings::create))
        .route("/tickets-status", post(routes::tickets::update_status))
        .route("/tickets", get(routes::tickets::list))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Partner-service clients used by the handlers.
#[derive(Clone)]
pub struct Partners {
    pub receipts: Arc<dyn ReceiptsService>,
    pub spreadsheets: Arc<dyn SpreadsheetsApi>,
    pub files: Arc<dyn FileApi>,
    pub external_bookings: Arc<dyn ExternalBookingApi>,
}

impl Partners {
    /// In-process stand-ins for every partner service.
    pub fn in_memory() -> Self {
        Self {
            receipts: Arc::new(InMemoryReceiptsService::new()),
            spreadsheets: Arc::new(InMemorySpreadsheets::new()),
            files: Arc::new(InMemoryFileStorage::new()),
            external_bookings: Arc::new(InMemoryExternalBookingApi::new()),
        }
    }
}

/// Starts the outbox relay and one consumer per handler.
///
/// Every task stops when `shutdown` is cancelled; unsettled deliveries are
/// handed back to the bus.
pub async fn spawn_workers<D>(
    store: &BookingStore<D>,
    bus: &InMemoryBus,
    partners: Partners,
    config: &Config,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>, RegistryError>
where
    D: Database + OutboxStore + Clone + 'static,
    D::Tx: BookingTx,
{
    let repositories = Arc::new(store.clone());
    let registry = build_registry(Dependencies {
        shows: repositories.clone(),
        tickets: repositories,
        receipts: partners.receipts,
        spreadsheets: partners.spreadsheets,
        files: partners.files,
        external_bookings: partners.external_bookings,
        publisher: Arc::new(bus.clone()),
    })?;

    let mut tasks = registry
        .spawn_consumers(
            bus,
            Arc::new(store.database().clone()),
            Arc::new(bus.clone()),
            config.consumer.clone(),
            shutdown.clone(),
        )
        .await?;

    let relay = OutboxRelay::new(store.database().clone(), bus.clone(), config.relay.clone());
    tasks.push(tokio::spawn(async move {
        relay.run(shutdown).await;
    }));

    Ok(tasks)
}
