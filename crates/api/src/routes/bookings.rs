//! Booking endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use booking::{Booking, CapacityLedgerExt, ReserveOutcome};
use common::{BookingId, ShowId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Correlation;
use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /book-tickets`.
#[derive(Deserialize)]
pub struct BookTicketsRequest {
    /// Makes the request idempotent; generated when absent.
    pub booking_id: Option<Uuid>,
    pub show_id: Uuid,
    pub number_of_tickets: u32,
    pub customer_email: String,
}

/// Returned when the booking was accepted.
#[derive(Serialize)]
pub struct BookTicketsResponse {
    pub booking_id: String,
}

/// POST /book-tickets: reserve seats for a show.
///
/// Responds 201 when the seats are held, including repeats of an already
/// accepted booking id, and 400 when the show has too few seats left.
#[tracing::instrument(skip(state, correlation, req), fields(correlation_id = %correlation.0))]
pub async fn create(
    State(state): State<AppState>,
    correlation: Correlation,
    Json(req): Json<BookTicketsRequest>,
) -> Result<(StatusCode, Json<BookTicketsResponse>), ApiError> {
    let booking = Booking::new(
        req.booking_id.map(BookingId::from_uuid).unwrap_or_default(),
        ShowId::from_uuid(req.show_id),
        req.number_of_tickets,
        req.customer_email,
    );

    let outcome = state
        .ledger
        .reserve_with_retry(&booking, Some(&correlation.0), &state.ledger_config)
        .await?;

    match outcome {
        ReserveOutcome::Accepted { booking_id, .. } => Ok((
            StatusCode::CREATED,
            Json(BookTicketsResponse {
                booking_id: booking_id.to_string(),
            }),
        )),
        ReserveOutcome::Rejected {
            requested,
            available,
        } => {
            tracing::info!(requested, available, "booking rejected");
            Err(ApiError::BadRequest("not enough seats available".to_string()))
        }
    }
}
