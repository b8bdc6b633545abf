//! Moves committed outbox entries onto the bus.

use std::time::Duration;

use chrono::Utc;
use store::{OutboxEntry, OutboxEntryId, OutboxStore};
use tokio_util::sync::CancellationToken;

use crate::bus::Publisher;
use crate::error::RelayError;
use crate::message::Message;

/// Polling, leasing and backoff settings for [`OutboxRelay`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Pause between polls that found less than a full batch.
    pub poll_interval: Duration,
    /// Entries claimed per poll. Zero is treated as one.
    pub batch_size: usize,
    /// How long a claimed entry stays invisible to other relays.
    pub lease: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Failed publish attempts after which an entry is logged as an error.
    pub alert_after_attempts: i32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 100,
            lease: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            alert_after_attempts: 10,
        }
    }
}

impl RelayConfig {
    fn batch_limit(&self) -> usize {
        self.batch_size.max(1)
    }

    fn backoff(&self, consecutive_failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive_failures.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Publishes every pending outbox entry at least once, in insertion order.
///
/// An entry is marked dispatched only after the bus accepted it. A relay
/// that dies in between leaves the entry leased; once the lease runs out
/// the entry is published again under the same message id.
pub struct OutboxRelay<S, P> {
    store: S,
    publisher: P,
    config: RelayConfig,
}

impl<S, P> OutboxRelay<S, P>
where
    S: OutboxStore,
    P: Publisher,
{
    /// Creates a relay from `store` to `publisher`.
    pub fn new(store: S, publisher: P, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Claims one batch and publishes it.
    ///
    /// Stops at the first publish failure so later entries never overtake an
    /// earlier one; the rest of the batch is released for the next attempt.
    /// Returns the number of entries dispatched.
    #[tracing::instrument(skip(self))]
    pub async fn relay_once(&self) -> Result<usize, RelayError> {
        let claimed = self
            .store
            .claim_pending(self.config.batch_limit(), self.config.lease)
            .await?;

        for (index, entry) in claimed.iter().enumerate() {
            if let Err(e) = self.publisher.publish(Message::from_outbox_entry(entry)).await {
                self.on_publish_failure(entry, &claimed[index + 1..], &e.to_string())
                    .await?;
                return Err(e.into());
            }

            self.store.mark_dispatched(entry.id).await?;
            metrics::counter!("outbox_entries_dispatched_total").increment(1);
            tracing::debug!(entry_id = %entry.id, event_type = %entry.event_type, "outbox entry dispatched");
        }

        Ok(claimed.len())
    }

    async fn on_publish_failure(
        &self,
        entry: &OutboxEntry,
        unpublished: &[OutboxEntry],
        error: &str,
    ) -> Result<(), RelayError> {
        metrics::counter!("outbox_publish_failures_total").increment(1);
        self.store.record_failure(entry.id, error).await?;

        let remaining: Vec<OutboxEntryId> = unpublished.iter().map(|entry| entry.id).collect();
        if !remaining.is_empty() {
            self.store.release(&remaining).await?;
        }

        let attempts = entry.attempts + 1;
        if attempts >= self.config.alert_after_attempts {
            tracing::error!(entry_id = %entry.id, attempts, error, "outbox entry keeps failing to publish");
        } else {
            tracing::warn!(entry_id = %entry.id, attempts, error, "failed to publish outbox entry");
        }
        Ok(())
    }

    /// Relays until `shutdown` is cancelled.
    ///
    /// Full batches are followed immediately by the next poll. Failures back
    /// off exponentially; no entry is ever given up on.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            batch_size = self.config.batch_limit(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "outbox relay started"
        );
        let mut consecutive_failures = 0;

        loop {
            let delay = match self.relay_once().await {
                Ok(dispatched) => {
                    consecutive_failures = 0;
                    if dispatched > 0 && dispatched == self.config.batch_limit() {
                        Duration::ZERO
                    } else {
                        self.config.poll_interval
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    let delay = self.config.backoff(consecutive_failures);
                    tracing::warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "outbox relay iteration failed");
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("outbox relay stopped");
    }

    /// Deletes entries dispatched longer than `older_than` ago.
    pub async fn prune_dispatched(&self, older_than: Duration) -> Result<u64, RelayError> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let pruned = self.store.prune_dispatched(cutoff).await?;
        if pruned > 0 {
            tracing::info!(pruned, "pruned dispatched outbox entries");
        }
        Ok(pruned)
    }
}
