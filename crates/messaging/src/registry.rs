//! Handler registry and consumer wiring.

use std::collections::HashSet;
use std::sync::Arc;

use store::IdempotencyStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{Publisher, Subscriber};
use crate::consumer::{ConsumerConfig, IdempotentConsumer};
use crate::error::RegistryError;
use crate::handler::Handler;

/// The fixed set of handlers a process runs.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler. Names must be unique because they are also the
    /// consumer group and the idempotency scope.
    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<&mut Self, RegistryError> {
        if self.handlers.iter().any(|h| h.name() == handler.name()) {
            return Err(RegistryError::DuplicateHandler(handler.name().to_string()));
        }
        self.handlers.push(handler);
        Ok(self)
    }

    /// Registered handlers in registration order.
    pub fn handlers(&self) -> &[Arc<dyn Handler>] {
        &self.handlers
    }

    /// Handlers subscribed to `topic`.
    pub fn for_topic<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Arc<dyn Handler>> {
        self.handlers.iter().filter(move |h| h.topic() == topic)
    }

    /// Distinct topics with at least one handler.
    pub fn topics(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.handlers
            .iter()
            .map(|h| h.topic())
            .filter(|topic| seen.insert(*topic))
            .collect()
    }

    /// Subscribes every handler to its topic and spawns one consumer task
    /// per handler. The tasks stop when `shutdown` is cancelled.
    pub async fn spawn_consumers<B>(
        &self,
        bus: &B,
        idempotency: Arc<dyn IdempotencyStore>,
        dead_letters: Arc<dyn Publisher>,
        config: ConsumerConfig,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, RegistryError>
    where
        B: Subscriber + ?Sized,
    {
        let mut tasks = Vec::with_capacity(self.handlers.len());

        for handler in &self.handlers {
            let subscription = bus.subscribe(handler.topic(), handler.name()).await?;
            let consumer = IdempotentConsumer::new(
                Arc::clone(handler),
                Arc::clone(&idempotency),
                Arc::clone(&dead_letters),
                config.clone(),
            );
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                consumer.run(subscription, shutdown).await;
            }));
        }

        tracing::info!(consumers = tasks.len(), "consumers started");
        Ok(tasks)
    }
}
