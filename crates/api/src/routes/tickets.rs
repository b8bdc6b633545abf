//! Ticket status endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use booking::{
    DomainEvent, EventHeader, Ticket, TicketBookingCanceled, TicketBookingConfirmed,
};
use common::{BookingId, IdempotencyKey, Money, TicketId};
use serde::{Deserialize, Serialize};
use store::{CORRELATION_ID, OutboxEntry};
use uuid::Uuid;

use super::{Correlation, RequestKey};
use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /tickets-status`: a batch of ticket status changes.
#[derive(Deserialize)]
pub struct TicketsStatusRequest {
    pub tickets: Vec<TicketStatus>,
}

/// One ticket whose status changed in the ticketing system.
#[derive(Deserialize)]
pub struct TicketStatus {
    pub ticket_id: String,
    /// `confirmed` or `canceled`.
    pub status: String,
    pub customer_email: String,
    pub price: MoneyDto,
    pub booking_id: Option<Uuid>,
}

/// Price as sent over the wire; the amount stays a decimal string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyDto {
    pub amount: String,
    pub currency: String,
}

/// One stored ticket as listed by `GET /tickets`.
#[derive(Serialize)]
pub struct TicketResponse {
    pub ticket_id: String,
    pub customer_email: String,
    pub price: MoneyDto,
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            ticket_id: ticket.ticket_id.into_inner(),
            customer_email: ticket.customer_email,
            price: MoneyDto {
                amount: ticket.price.amount,
                currency: ticket.price.currency,
            },
        }
    }
}

/// POST /tickets-status: record ticket confirmations and cancellations.
///
/// One event per ticket is staged in the outbox; the whole batch commits
/// together. Each event is keyed by the `Idempotency-Key` header and the
/// ticket id, so a resubmitted batch is processed once downstream.
#[tracing::instrument(skip(state, correlation, req), fields(correlation_id = %correlation.0, tickets = req.tickets.len()))]
pub async fn update_status(
    State(state): State<AppState>,
    correlation: Correlation,
    RequestKey(request_key): RequestKey,
    Json(req): Json<TicketsStatusRequest>,
) -> Result<StatusCode, ApiError> {
    let entries = req
        .tickets
        .into_iter()
        .map(|status| status_entry(status, request_key.as_deref(), &correlation))
        .collect::<Result<Vec<_>, _>>()?;

    state.outbox.stage_outbox_entries(entries).await?;
    Ok(StatusCode::OK)
}

/// GET /tickets: list stored tickets.
#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<TicketResponse>>, ApiError> {
    let tickets = state.tickets.all_tickets().await?;
    Ok(Json(tickets.into_iter().map(TicketResponse::from).collect()))
}

fn status_entry(
    status: TicketStatus,
    request_key: Option<&str>,
    correlation: &Correlation,
) -> Result<OutboxEntry, ApiError> {
    if status.ticket_id.trim().is_empty() {
        return Err(ApiError::BadRequest("ticket_id must not be empty".to_string()));
    }

    let ticket = Ticket {
        ticket_id: TicketId::new(status.ticket_id),
        price: Money::new(status.price.amount, status.price.currency),
        customer_email: status.customer_email,
    };
    let header = EventHeader::new(IdempotencyKey::for_ticket(request_key, &ticket.ticket_id));

    let mut entry = match status.status.as_str() {
        "confirmed" => TicketBookingConfirmed::new(
            header,
            &ticket,
            status.booking_id.map(BookingId::from_uuid),
        )
        .to_outbox_entry()?,
        "canceled" => TicketBookingCanceled::new(header, &ticket).to_outbox_entry()?,
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown ticket status: {other}"
            )));
        }
    };
    entry
        .metadata
        .insert(CORRELATION_ID.to_string(), correlation.0.to_string());
    Ok(entry)
}
