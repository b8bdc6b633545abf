//! Booking error types.

use std::time::Duration;

use common::ShowId;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during booking operations.
///
/// Running out of seats is not an error; see
/// [`ReserveOutcome::Rejected`](crate::ReserveOutcome::Rejected).
#[derive(Debug, Error)]
pub enum BookingError {
    /// A booking must ask for at least one seat.
    #[error("Invalid number of tickets: {0}")]
    InvalidQuantity(u32),

    #[error("Show not found: {0}")]
    ShowNotFound(ShowId),

    /// The attempt did not finish in time and was rolled back.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BookingError::Timeout(_) => true,
            BookingError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for BookingError {
    fn from(e: sqlx::Error) -> Self {
        BookingError::Store(e.into())
    }
}

/// Result type for booking operations.
pub type Result<T> = std::result::Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_and_timeouts_are_retryable() {
        assert!(BookingError::Timeout(Duration::from_millis(5)).is_retryable());
        assert!(BookingError::Store(StoreError::Conflict("40001".into())).is_retryable());
        assert!(!BookingError::InvalidQuantity(0).is_retryable());
        assert!(!BookingError::ShowNotFound(ShowId::new()).is_retryable());
    }
}
