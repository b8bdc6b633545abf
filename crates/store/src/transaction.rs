use async_trait::async_trait;

use crate::{OutboxEntry, ProcessedKey, Result};

/// An atomic unit of work.
///
/// Everything staged through a transaction becomes visible together on
/// [`commit`](Transaction::commit). Dropping a transaction without committing
/// rolls it back, which is also what happens when the future driving it is
/// cancelled.
#[async_trait]
pub trait Transaction: Send {
    /// Stages an outbox entry; the relay only sees it after commit.
    async fn insert_outbox_entry(&mut self, entry: &OutboxEntry) -> Result<()>;

    /// Records `key` as processed unless it already is.
    ///
    /// Returns `true` when the key was absent. Concurrent transactions racing
    /// on the same key resolve so that exactly one observes `true`.
    async fn mark_if_absent(&mut self, key: &ProcessedKey) -> Result<bool>;

    /// Returns whether `key` is recorded as processed.
    async fn is_processed(&mut self, key: &ProcessedKey) -> Result<bool>;

    /// Commits all staged work atomically.
    async fn commit(self) -> Result<()>;
}

/// A store able to open units of work.
#[async_trait]
pub trait Database: Send + Sync {
    type Tx: Transaction + 'static;

    /// Opens a transaction at an isolation level that prevents write skew.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// Stages outbox entries in a transaction of their own, for events that have
/// no accompanying domain write.
#[async_trait]
pub trait OutboxStaging: Send + Sync {
    /// Stages all entries atomically, preserving their order.
    async fn stage_outbox_entries(&self, entries: Vec<OutboxEntry>) -> Result<()>;
}

#[async_trait]
impl<D: Database> OutboxStaging for D {
    async fn stage_outbox_entries(&self, entries: Vec<OutboxEntry>) -> Result<()> {
        let mut tx = self.begin().await?;
        for entry in &entries {
            tx.insert_outbox_entry(entry).await?;
        }
        tx.commit().await
    }
}
