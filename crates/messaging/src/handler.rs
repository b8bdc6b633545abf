//! Event handler contract.

use async_trait::async_trait;
use common::CorrelationId;
use store::ProcessedKey;

use crate::error::HandlerError;
use crate::message::Message;

/// What a handler knows about the delivery it is processing.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// The record the consumer writes once the handler succeeds. Handlers
    /// with a local write may commit it themselves in the same transaction.
    pub processed_key: ProcessedKey,
    pub attempt: u32,
    pub correlation_id: Option<CorrelationId>,
}

/// Business logic run by an [`IdempotentConsumer`](crate::IdempotentConsumer).
#[async_trait]
pub trait Handler: Send + Sync {
    /// Unique handler name. Doubles as consumer group and idempotency scope.
    fn name(&self) -> &str;

    /// Topic the handler subscribes to.
    fn topic(&self) -> &str;

    /// Key that identifies a logical message for this handler.
    ///
    /// Defaults to the envelope's idempotency key, then to the message id.
    fn dedup_key(&self, message: &Message) -> String {
        message
            .idempotency_key()
            .map(str::to_string)
            .unwrap_or_else(|| message.id.to_string())
    }

    async fn handle(&self, ctx: &HandlerContext, message: &Message) -> Result<(), HandlerError>;
}
