//! Messaging for the booking system.
//!
//! This crate provides:
//! - [`Publisher`] / [`Subscriber`] with an at-least-once [`InMemoryBus`]
//! - [`OutboxRelay`], which publishes committed outbox entries
//! - [`IdempotentConsumer`], which runs a [`Handler`] once per logical message
//! - [`HandlerRegistry`] for wiring one consumer per handler

pub mod bus;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod relay;

pub use bus::{Delivery, InMemoryBus, Publisher, Subscriber, Subscription};
pub use consumer::{Acknowledgement, ConsumerConfig, IdempotentConsumer};
pub use error::{BusError, HandlerError, RegistryError, RelayError};
pub use handler::{Handler, HandlerContext};
pub use message::{DEAD_LETTER_HANDLER, DEAD_LETTER_REASON, Message, ORIGINAL_TOPIC};
pub use registry::HandlerRegistry;
pub use relay::{OutboxRelay, RelayConfig};
