//! Show endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use booking::Show;
use chrono::{DateTime, Utc};
use common::ShowId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /shows`.
#[derive(Deserialize)]
pub struct CreateShowRequest {
    /// Lets the caller retry creation safely; generated when absent.
    pub show_id: Option<Uuid>,
    pub external_id: Uuid,
    pub number_of_tickets: u32,
    pub start_time: DateTime<Utc>,
    pub title: String,
    pub venue: String,
}

/// Id of the created or existing show.
#[derive(Serialize)]
pub struct CreateShowResponse {
    pub show_id: String,
}

/// POST /shows: register a show and its seat capacity.
///
/// Returns 201 for a new show and 200 when the show already exists. A
/// capacity of zero or above `i32::MAX` is rejected with 400.
#[tracing::instrument(skip(state, req), fields(external_id = %req.external_id))]
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateShowRequest>,
) -> Result<(StatusCode, Json<CreateShowResponse>), ApiError> {
    let show = Show {
        id: req.show_id.map(ShowId::from_uuid).unwrap_or_default(),
        external_id: req.external_id,
        number_of_tickets: req.number_of_tickets,
        start_time: req.start_time,
        title: req.title,
        venue: req.venue,
    };
    let created = state.shows.add_show(&show).await?;

    let status = if created {
        tracing::info!(show_id = %show.id, "show created");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(CreateShowResponse {
            show_id: show.id.to_string(),
        }),
    ))
}
