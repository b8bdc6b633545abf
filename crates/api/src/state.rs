//! Shared application state.

use std::sync::Arc;

use booking::{BookingStore, BookingTx, CapacityLedger, LedgerConfig, ShowsRepository, TicketsRepository};
use store::{Database, OutboxStaging, OutboxStore};

/// Collaborators reachable from every route.
///
/// Everything is behind a trait object so the same router serves the
/// in-memory and the PostgreSQL backend.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn CapacityLedger>,
    pub shows: Arc<dyn ShowsRepository>,
    pub tickets: Arc<dyn TicketsRepository>,
    pub outbox: Arc<dyn OutboxStaging>,
    pub outbox_store: Arc<dyn OutboxStore>,
    pub ledger_config: LedgerConfig,
}

impl AppState {
    /// Builds the state over one booking store.
    pub fn new<D>(store: BookingStore<D>, ledger_config: LedgerConfig) -> Self
    where
        D: Database + OutboxStore + Clone + 'static,
        D::Tx: BookingTx,
    {
        let db = store.database().clone();
        let store = Arc::new(store);
        Self {
            ledger: store.clone(),
            shows: store.clone(),
            tickets: store,
            outbox: Arc::new(db.clone()),
            outbox_store: Arc::new(db),
            ledger_config,
        }
    }
}
