//! The handler set run by the booking system.

use std::sync::Arc;

use booking::{ShowsRepository, TicketsRepository};
use messaging::{HandlerRegistry, Publisher, RegistryError};

use crate::bookings::BookPlaceInExternalSystem;
use crate::services::{ExternalBookingApi, FileApi, ReceiptsService, SpreadsheetsApi};
use crate::tickets::{
    AppendToTracker, IssueReceipt, PrintTicket, RemoveCanceledTicket, StoreTickets,
    TicketRefundToSheet,
};
use crate::typed::TypedHandler;

/// Collaborators shared by the handlers.
#[derive(Clone)]
pub struct Dependencies {
    pub shows: Arc<dyn ShowsRepository>,
    pub tickets: Arc<dyn TicketsRepository>,
    pub receipts: Arc<dyn ReceiptsService>,
    pub spreadsheets: Arc<dyn SpreadsheetsApi>,
    pub files: Arc<dyn FileApi>,
    pub external_bookings: Arc<dyn ExternalBookingApi>,
    /// Used by handlers that publish follow-up events directly.
    pub publisher: Arc<dyn Publisher>,
}

/// Registers every handler.
pub fn build_registry(deps: Dependencies) -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();
    registry
        .register(Arc::new(TypedHandler::new(BookPlaceInExternalSystem::new(
            deps.shows,
            deps.external_bookings,
        ))))?
        .register(Arc::new(TypedHandler::new(IssueReceipt::new(deps.receipts))))?
        .register(Arc::new(TypedHandler::new(AppendToTracker::new(Arc::clone(
            &deps.spreadsheets,
        )))))?
        .register(Arc::new(TypedHandler::new(StoreTickets::new(Arc::clone(
            &deps.tickets,
        )))))?
        .register(Arc::new(TypedHandler::new(PrintTicket::new(
            deps.files,
            deps.publisher,
        ))))?
        .register(Arc::new(TypedHandler::new(TicketRefundToSheet::new(
            deps.spreadsheets,
        ))))?
        .register(Arc::new(TypedHandler::new(RemoveCanceledTicket::new(
            deps.tickets,
        ))))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use booking::InMemoryBookingStore;
    use messaging::InMemoryBus;
    use store::MemoryDatabase;

    use super::*;
    use crate::services::{
        InMemoryExternalBookingApi, InMemoryFileStorage, InMemoryReceiptsService,
        InMemorySpreadsheets,
    };

    #[test]
    fn every_event_type_with_work_has_handlers() {
        let store = Arc::new(InMemoryBookingStore::new(MemoryDatabase::new()));
        let registry = build_registry(Dependencies {
            shows: store.clone(),
            tickets: store,
            receipts: Arc::new(InMemoryReceiptsService::new()),
            spreadsheets: Arc::new(InMemorySpreadsheets::new()),
            files: Arc::new(InMemoryFileStorage::new()),
            external_bookings: Arc::new(InMemoryExternalBookingApi::new()),
            publisher: Arc::new(InMemoryBus::new()),
        })
        .unwrap();

        assert_eq!(registry.handlers().len(), 7);
        assert_eq!(
            registry.topics(),
            vec!["BookingMade", "TicketBookingConfirmed", "TicketBookingCanceled"]
        );
        assert_eq!(registry.for_topic("TicketBookingConfirmed").count(), 4);
        assert_eq!(registry.for_topic("TicketPrinted").count(), 0);
    }
}
