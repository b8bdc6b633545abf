//! Partner-service error types.

use booking::BookingError;
use messaging::HandlerError;
use thiserror::Error;

/// Errors returned by partner services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The call may succeed if repeated, e.g. a timeout or a 5xx response.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The partner refused the request and will keep refusing it.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl From<ServiceError> for HandlerError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Unavailable(_) => HandlerError::retryable(e),
            ServiceError::Rejected(_) => HandlerError::terminal(e),
        }
    }
}

/// Classifies a local storage failure for the consumer.
pub(crate) fn storage_failure(e: BookingError) -> HandlerError {
    if e.is_retryable() {
        HandlerError::retryable(e)
    } else {
        HandlerError::terminal(e)
    }
}

/// Convenience type alias for partner-service results.
pub type Result<T> = std::result::Result<T, ServiceError>;
