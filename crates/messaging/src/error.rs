//! Messaging error types.

use store::StoreError;
use thiserror::Error;

/// Errors returned by the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus accepted nothing; the message must be published again.
    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}

/// Errors that stop a relay iteration.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Outcome classification of a failed handler.
///
/// The consumer redelivers retryable failures and dead-letters terminal ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// A transient failure such as a network error or timeout.
    #[error("Retryable: {0}")]
    Retryable(String),

    /// The message can never be processed, for example a malformed payload.
    #[error("Terminal: {0}")]
    Terminal(String),
}

impl HandlerError {
    /// A failure worth redelivering.
    pub fn retryable(reason: impl std::fmt::Display) -> Self {
        HandlerError::Retryable(reason.to_string())
    }

    /// A failure that goes straight to the dead letters.
    pub fn terminal(reason: impl std::fmt::Display) -> Self {
        HandlerError::Terminal(reason.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable(_))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::terminal(format!("malformed payload: {e}"))
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidEntry(_) | StoreError::Serialization(_) => {
                HandlerError::terminal(e)
            }
            other => HandlerError::retryable(other),
        }
    }
}

/// Errors raised while wiring consumers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Handler registered twice: {0}")]
    DuplicateHandler(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}
