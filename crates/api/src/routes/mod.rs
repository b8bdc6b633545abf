//! HTTP routes.

pub mod bookings;
pub mod health;
pub mod metrics;
pub mod shows;
pub mod tickets;

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::CorrelationId;

/// Request header carrying the correlation id.
pub const CORRELATION_ID_HEADER: &str = "Correlation-ID";
/// Request header carrying the caller's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// The request's correlation id, generated when the caller sent none.
#[derive(Debug, Clone)]
pub struct Correlation(pub CorrelationId);

impl<S: Send + Sync> FromRequestParts<S> for Correlation {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, CORRELATION_ID_HEADER)
            .map(CorrelationId::new)
            .unwrap_or_else(CorrelationId::generate);
        Ok(Self(id))
    }
}

/// The caller's `Idempotency-Key` header, if any.
#[derive(Debug, Clone)]
pub struct RequestKey(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for RequestKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(header(parts, IDEMPOTENCY_KEY_HEADER)))
    }
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
