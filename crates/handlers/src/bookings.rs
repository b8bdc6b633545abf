//! Handlers for booking events.

use std::sync::Arc;

use async_trait::async_trait;
use booking::{BookingMade, ShowsRepository};
use messaging::{HandlerContext, HandlerError};

use crate::error::storage_failure;
use crate::services::{ExternalBooking, ExternalBookingApi};
use crate::typed::EventHandler;

/// Books the seats of an accepted booking in the ticketing partner's system.
pub struct BookPlaceInExternalSystem {
    shows: Arc<dyn ShowsRepository>,
    external_bookings: Arc<dyn ExternalBookingApi>,
}

impl BookPlaceInExternalSystem {
    /// Creates the handler over show lookup and the partner API.
    pub fn new(
        shows: Arc<dyn ShowsRepository>,
        external_bookings: Arc<dyn ExternalBookingApi>,
    ) -> Self {
        Self {
            shows,
            external_bookings,
        }
    }
}

#[async_trait]
impl EventHandler for BookPlaceInExternalSystem {
    type Event = BookingMade;
    const NAME: &'static str = "book_place_in_external_system";

    #[tracing::instrument(skip_all, fields(booking_id = %event.booking_id, show_id = %event.show_id))]
    async fn handle_event(&self, _ctx: &HandlerContext, event: BookingMade) -> Result<(), HandlerError> {
        tracing::info!("booking tickets in external system");

        // The ledger only accepts bookings for existing shows, so a missing
        // show cannot be fixed by redelivery.
        let show = self
            .shows
            .get_show(event.show_id)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| HandlerError::terminal(format!("show {} not found", event.show_id)))?;

        self.external_bookings
            .book(ExternalBooking {
                booking_id: event.booking_id,
                external_event_id: show.external_id,
                number_of_tickets: event.number_of_tickets,
                customer_email: event.customer_email,
            })
            .await?;

        Ok(())
    }
}
