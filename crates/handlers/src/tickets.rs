//! Handlers for ticket status events.

use std::sync::Arc;

use async_trait::async_trait;
use booking::{
    DomainEvent, TicketBookingCanceled, TicketBookingConfirmed, TicketPrinted, TicketsRepository,
};
use common::{Money, TicketId};
use messaging::{HandlerContext, HandlerError, Message, Publisher};
use store::CORRELATION_ID;

use crate::error::storage_failure;
use crate::services::{FileApi, IssueReceiptRequest, ReceiptsService, SpreadsheetsApi};
use crate::typed::EventHandler;

/// Sheet the print shop works from.
pub const TICKETS_TO_PRINT_SHEET: &str = "tickets-to-print";
/// Sheet the refunds team works from.
pub const TICKETS_TO_REFUND_SHEET: &str = "tickets-to-refund";

fn ticket_row(ticket_id: &TicketId, customer_email: &str, price: &Money) -> Vec<String> {
    vec![
        ticket_id.to_string(),
        customer_email.to_string(),
        price.amount.clone(),
        price.currency.clone(),
    ]
}

/// File name of a printed ticket.
pub fn ticket_file_name(ticket_id: &TicketId) -> String {
    format!("{ticket_id}-ticket.html")
}

fn ticket_html(ticket_id: &TicketId, price: &Money) -> String {
    format!(
        "<div>Ticket ID: {ticket_id}</div><div>Price: {} {}</div>",
        price.amount, price.currency
    )
}

/// Issues a receipt for every confirmed ticket.
pub struct IssueReceipt {
    receipts: Arc<dyn ReceiptsService>,
}

impl IssueReceipt {
    pub fn new(receipts: Arc<dyn ReceiptsService>) -> Self {
        Self { receipts }
    }
}

#[async_trait]
impl EventHandler for IssueReceipt {
    type Event = TicketBookingConfirmed;
    const NAME: &'static str = "issue_receipt";

    #[tracing::instrument(skip_all, fields(ticket_id = %event.ticket_id))]
    async fn handle_event(
        &self,
        _ctx: &HandlerContext,
        event: TicketBookingConfirmed,
    ) -> Result<(), HandlerError> {
        tracing::info!("issuing receipt");

        let response = self
            .receipts
            .issue_receipt(IssueReceiptRequest {
                ticket_id: event.ticket_id,
                price: event.price,
                idempotency_key: event.header.idempotency_key,
            })
            .await?;

        tracing::debug!(receipt_number = %response.receipt_number, "receipt issued");
        Ok(())
    }
}

/// Adds every confirmed ticket to the print worklist sheet.
pub struct AppendToTracker {
    spreadsheets: Arc<dyn SpreadsheetsApi>,
}

impl AppendToTracker {
    pub fn new(spreadsheets: Arc<dyn SpreadsheetsApi>) -> Self {
        Self { spreadsheets }
    }
}

#[async_trait]
impl EventHandler for AppendToTracker {
    type Event = TicketBookingConfirmed;
    const NAME: &'static str = "append_to_tracker";

    #[tracing::instrument(skip_all, fields(ticket_id = %event.ticket_id))]
    async fn handle_event(
        &self,
        _ctx: &HandlerContext,
        event: TicketBookingConfirmed,
    ) -> Result<(), HandlerError> {
        let row = ticket_row(&event.ticket_id, &event.customer_email, &event.price);
        self.spreadsheets
            .append_row(TICKETS_TO_PRINT_SHEET, row)
            .await?;
        Ok(())
    }
}

/// Keeps the local ticket table in step with confirmations.
///
/// The ticket and the consumer's idempotency record commit together, so a
/// redelivery after a crash finds the record and writes nothing.
pub struct StoreTickets {
    tickets: Arc<dyn TicketsRepository>,
}

impl StoreTickets {
    pub fn new(tickets: Arc<dyn TicketsRepository>) -> Self {
        Self { tickets }
    }
}

#[async_trait]
impl EventHandler for StoreTickets {
    type Event = TicketBookingConfirmed;
    const NAME: &'static str = "store_tickets";

    #[tracing::instrument(skip_all, fields(ticket_id = %event.ticket_id))]
    async fn handle_event(
        &self,
        ctx: &HandlerContext,
        event: TicketBookingConfirmed,
    ) -> Result<(), HandlerError> {
        tracing::info!("saving ticket");

        let stored = self
            .tickets
            .add_ticket_once(&event.ticket(), &ctx.processed_key)
            .await
            .map_err(storage_failure)?;
        if !stored {
            tracing::debug!("ticket already stored by an earlier delivery");
        }
        Ok(())
    }
}

/// Renders the ticket file and announces it with `TicketPrinted`.
pub struct PrintTicket {
    files: Arc<dyn FileApi>,
    publisher: Arc<dyn Publisher>,
}

impl PrintTicket {
    pub fn new(files: Arc<dyn FileApi>, publisher: Arc<dyn Publisher>) -> Self {
        Self { files, publisher }
    }
}

#[async_trait]
impl EventHandler for PrintTicket {
    type Event = TicketBookingConfirmed;
    const NAME: &'static str = "print_ticket";

    #[tracing::instrument(skip_all, fields(ticket_id = %event.ticket_id))]
    async fn handle_event(
        &self,
        ctx: &HandlerContext,
        event: TicketBookingConfirmed,
    ) -> Result<(), HandlerError> {
        tracing::info!("printing ticket");

        let file_name = ticket_file_name(&event.ticket_id);
        self.files
            .upload_file(&file_name, &ticket_html(&event.ticket_id, &event.price))
            .await?;

        // Reusing the confirmation header keeps the printed event's id and
        // idempotency key stable across redeliveries.
        let printed = TicketPrinted {
            header: event.header,
            ticket_id: event.ticket_id,
            file_name,
        };
        let mut message = Message::from_outbox_entry(&printed.to_outbox_entry()?);
        if let Some(correlation_id) = &ctx.correlation_id {
            message = message.with_metadata(CORRELATION_ID, correlation_id.as_str());
        }

        self.publisher
            .publish(message)
            .await
            .map_err(HandlerError::retryable)?;
        Ok(())
    }
}

/// Adds every canceled ticket to the refund worklist sheet.
pub struct TicketRefundToSheet {
    spreadsheets: Arc<dyn SpreadsheetsApi>,
}

impl TicketRefundToSheet {
    pub fn new(spreadsheets: Arc<dyn SpreadsheetsApi>) -> Self {
        Self { spreadsheets }
    }
}

#[async_trait]
impl EventHandler for TicketRefundToSheet {
    type Event = TicketBookingCanceled;
    const NAME: &'static str = "ticket_refund_to_sheet";

    #[tracing::instrument(skip_all, fields(ticket_id = %event.ticket_id))]
    async fn handle_event(
        &self,
        _ctx: &HandlerContext,
        event: TicketBookingCanceled,
    ) -> Result<(), HandlerError> {
        let row = ticket_row(&event.ticket_id, &event.customer_email, &event.price);
        self.spreadsheets
            .append_row(TICKETS_TO_REFUND_SHEET, row)
            .await?;
        Ok(())
    }
}

/// Deletes canceled tickets from the local ticket table.
pub struct RemoveCanceledTicket {
    tickets: Arc<dyn TicketsRepository>,
}

impl RemoveCanceledTicket {
    pub fn new(tickets: Arc<dyn TicketsRepository>) -> Self {
        Self { tickets }
    }
}

#[async_trait]
impl EventHandler for RemoveCanceledTicket {
    type Event = TicketBookingCanceled;
    const NAME: &'static str = "remove_canceled_ticket";

    #[tracing::instrument(skip_all, fields(ticket_id = %event.ticket_id))]
    async fn handle_event(
        &self,
        _ctx: &HandlerContext,
        event: TicketBookingCanceled,
    ) -> Result<(), HandlerError> {
        tracing::info!("deleting canceled ticket");
        self.tickets
            .remove_ticket(&event.ticket_id)
            .await
            .map_err(storage_failure)
    }
}
