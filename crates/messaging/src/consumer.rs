//! Deduplicating consumer.

use std::sync::Arc;
use std::time::Duration;

use common::CorrelationId;
use store::{IdempotencyStore, ProcessedKey};
use tokio_util::sync::CancellationToken;

use crate::bus::{Publisher, Subscription};
use crate::error::HandlerError;
use crate::handler::{Handler, HandlerContext};
use crate::message::{DEAD_LETTER_HANDLER, DEAD_LETTER_REASON, Message, ORIGINAL_TOPIC};

/// How a delivery should be settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Ack,
    Nack,
}

/// Retry and dead-letter settings for [`IdempotentConsumer`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Deliveries of one message before a retryable failure is dead-lettered.
    pub max_attempts: u32,
    /// Upper bound on one handler invocation. Exceeding it is retryable.
    pub handler_timeout: Duration,
    /// Pause before a failed delivery is handed back to the bus.
    pub nack_delay: Duration,
    pub dead_letter_topic: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            handler_timeout: Duration::from_secs(10),
            nack_delay: Duration::from_millis(100),
            dead_letter_topic: "dead_letters".to_string(),
        }
    }
}

/// Runs a [`Handler`] at most once per logical message.
///
/// The idempotency record is checked before the handler runs and written
/// after it succeeded, so a redelivered message is acknowledged without
/// repeating the effect, while a failed one is retried.
pub struct IdempotentConsumer {
    handler: Arc<dyn Handler>,
    idempotency: Arc<dyn IdempotencyStore>,
    dead_letters: Arc<dyn Publisher>,
    config: ConsumerConfig,
}

impl IdempotentConsumer {
    /// Wraps `handler`; finished keys go to `idempotency`.
    pub fn new(
        handler: Arc<dyn Handler>,
        idempotency: Arc<dyn IdempotencyStore>,
        dead_letters: Arc<dyn Publisher>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            handler,
            idempotency,
            dead_letters,
            config,
        }
    }

    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }

    /// Processes one delivery and decides how to settle it.
    ///
    /// A message whose key is already recorded is acknowledged without
    /// calling the handler.
    #[tracing::instrument(
        skip(self, message),
        fields(
            handler = %self.handler.name(),
            message_id = %message.id,
            correlation_id = message.correlation_id().unwrap_or_default(),
        )
    )]
    pub async fn on_message(&self, message: &Message, attempt: u32) -> Acknowledgement {
        let handler = self.handler.name();
        let key = ProcessedKey::new(handler, self.handler.dedup_key(message));

        match self.idempotency.is_processed(&key).await {
            Ok(true) => {
                tracing::debug!(%key, "duplicate message skipped");
                metrics::counter!("consumer_duplicates_total", "handler" => handler.to_string())
                    .increment(1);
                return Acknowledgement::Ack;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "idempotency check failed");
                return self.settle_failure(message, attempt, &HandlerError::retryable(e)).await;
            }
        }

        let ctx = HandlerContext {
            processed_key: key,
            attempt,
            correlation_id: message.correlation_id().map(CorrelationId::new),
        };
        let result = tokio::time::timeout(
            self.config.handler_timeout,
            self.handler.handle(&ctx, message),
        )
        .await
        .unwrap_or_else(|_| {
            Err(HandlerError::retryable(format!(
                "handler timed out after {:?}",
                self.config.handler_timeout
            )))
        });

        match result {
            Ok(()) => {
                // The handler may already have written the record itself.
                if let Err(e) = self.idempotency.mark_if_absent(&ctx.processed_key).await {
                    tracing::warn!(error = %e, "failed to record processed message");
                    return Acknowledgement::Nack;
                }
                self.count(handler, "success");
                Acknowledgement::Ack
            }
            Err(e) => self.settle_failure(message, attempt, &e).await,
        }
    }

    async fn settle_failure(
        &self,
        message: &Message,
        attempt: u32,
        error: &HandlerError,
    ) -> Acknowledgement {
        let handler = self.handler.name();
        if error.is_retryable() && attempt < self.config.max_attempts {
            tracing::warn!(%error, attempt, "handler failed, message will be redelivered");
            self.count(handler, "retry");
            return Acknowledgement::Nack;
        }

        let letter = Message {
            id: message.id,
            topic: self.config.dead_letter_topic.clone(),
            payload: message.payload.clone(),
            metadata: message.metadata.clone(),
        }
        .with_metadata(DEAD_LETTER_REASON, error.to_string())
        .with_metadata(DEAD_LETTER_HANDLER, handler)
        .with_metadata(ORIGINAL_TOPIC, message.topic.clone());

        match self.dead_letters.publish(letter).await {
            Ok(()) => {
                tracing::error!(%error, attempt, "message dead-lettered");
                metrics::counter!("consumer_dead_lettered_total", "handler" => handler.to_string())
                    .increment(1);
                self.count(handler, "dead_lettered");
                Acknowledgement::Ack
            }
            Err(e) => {
                tracing::error!(%error, dead_letter_error = %e, "failed to dead-letter message");
                Acknowledgement::Nack
            }
        }
    }

    fn count(&self, handler: &str, outcome: &'static str) {
        metrics::counter!(
            "consumer_messages_total",
            "handler" => handler.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Consumes `subscription` until `shutdown` is cancelled.
    ///
    /// A delivery still in flight at shutdown is left unsettled, so the bus
    /// hands it to the next consumer of the group.
    pub async fn run(&self, subscription: Subscription, shutdown: CancellationToken) {
        tracing::info!(handler = %self.handler.name(), topic = %self.handler.topic(), "consumer started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = subscription.next() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let ack = tokio::select! {
                _ = shutdown.cancelled() => break,
                ack = self.on_message(delivery.message(), delivery.attempt()) => ack,
            };

            match ack {
                Acknowledgement::Ack => delivery.ack(),
                Acknowledgement::Nack => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.nack_delay) => delivery.nack(),
                    }
                }
            }
        }

        tracing::info!(handler = %self.handler.name(), "consumer stopped");
    }
}
