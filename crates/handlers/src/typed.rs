//! Adapter from typed event handlers to the bus-level [`Handler`] contract.

use async_trait::async_trait;
use booking::DomainEvent;
use messaging::{Handler, HandlerContext, HandlerError, Message};

/// A handler for one event type.
///
/// The topic is the event's [`EventKind`](booking::EventKind), so the
/// subscription cannot disagree with the payload the handler decodes.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Event: DomainEvent;

    /// Consumer group and idempotency scope.
    const NAME: &'static str;

    async fn handle_event(&self, ctx: &HandlerContext, event: Self::Event)
    -> Result<(), HandlerError>;
}

/// Runs an [`EventHandler`] behind the untyped [`Handler`] interface.
pub struct TypedHandler<H> {
    inner: H,
}

impl<H: EventHandler> TypedHandler<H> {
    /// Wraps a typed handler for registration.
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: EventHandler> Handler for TypedHandler<H> {
    fn name(&self) -> &str {
        H::NAME
    }

    fn topic(&self) -> &str {
        <H::Event as DomainEvent>::KIND.as_str()
    }

    async fn handle(&self, ctx: &HandlerContext, message: &Message) -> Result<(), HandlerError> {
        let event: H::Event = message.decode()?;
        self.inner.handle_event(ctx, event).await
    }
}
