use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::outbox::lease_deadline;
use crate::{
    Database, OutboxEntry, OutboxEntryId, OutboxStore, ProcessedKey, Result, Transaction,
};

#[derive(Debug, Clone)]
struct OutboxRow {
    entry: OutboxEntry,
    locked_until: Option<DateTime<Utc>>,
}

/// Table contents of an in-memory database.
///
/// `D` holds the domain tables of whichever crate owns the database; the
/// outbox and idempotency tables are always present.
#[derive(Debug, Clone, Default)]
pub struct Tables<D> {
    pub domain: D,
    outbox: Vec<OutboxRow>,
    processed: HashMap<ProcessedKey, DateTime<Utc>>,
    next_sequence: i64,
}

/// In-memory database for tests and for running without PostgreSQL.
///
/// Transactions hold an exclusive lock on all tables, which makes every
/// transaction serializable. Reads go straight to the locked tables. The
/// first write takes a private copy that replaces the shared state on
/// commit, so a transaction that is dropped or cancelled leaves nothing
/// behind.
#[derive(Clone, Default)]
pub struct MemoryDatabase<D> {
    tables: Arc<Mutex<Tables<D>>>,
}

impl<D> MemoryDatabase<D>
where
    D: Clone + Default + Send + Sync + 'static,
{
    /// Creates a new empty in-memory database.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
        }
    }

    /// Runs a read against the committed domain tables.
    pub async fn read<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        let tables = self.tables.lock().await;
        f(&tables.domain)
    }

    /// Returns a snapshot of every outbox entry in insertion order.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        let tables = self.tables.lock().await;
        tables.outbox.iter().map(|row| row.entry.clone()).collect()
    }

    /// Returns the number of idempotency records.
    pub async fn processed_count(&self) -> usize {
        self.tables.lock().await.processed.len()
    }

    /// Deletes the idempotency record for `key`, as retention would.
    ///
    /// Returns whether a record existed.
    pub async fn forget_processed(&self, key: &ProcessedKey) -> bool {
        self.tables.lock().await.processed.remove(key).is_some()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        *self.tables.lock().await = Tables::default();
    }
}

/// A serializable unit of work over a [`MemoryDatabase`].
pub struct MemoryTransaction<D> {
    guard: OwnedMutexGuard<Tables<D>>,
    staged: Option<Tables<D>>,
}

impl<D> MemoryTransaction<D> {
    fn tables(&self) -> &Tables<D> {
        self.staged.as_ref().unwrap_or(&*self.guard)
    }

    /// Domain tables as seen by this transaction.
    pub fn domain(&self) -> &D {
        &self.tables().domain
    }
}

impl<D: Clone> MemoryTransaction<D> {
    fn tables_mut(&mut self) -> &mut Tables<D> {
        let guard = &self.guard;
        self.staged.get_or_insert_with(|| (**guard).clone())
    }

    /// Domain tables for writing; copies the tables on first use.
    pub fn domain_mut(&mut self) -> &mut D {
        &mut self.tables_mut().domain
    }
}

#[async_trait]
impl<D> Transaction for MemoryTransaction<D>
where
    D: Clone + Send + Sync + 'static,
{
    async fn insert_outbox_entry(&mut self, entry: &OutboxEntry) -> Result<()> {
        if self.tables().outbox.iter().any(|row| row.entry.id == entry.id) {
            return Ok(());
        }
        let tables = self.tables_mut();
        tables.next_sequence += 1;
        let mut entry = entry.clone();
        entry.sequence = tables.next_sequence;
        tables.outbox.push(OutboxRow {
            entry,
            locked_until: None,
        });
        Ok(())
    }

    async fn mark_if_absent(&mut self, key: &ProcessedKey) -> Result<bool> {
        if self.tables().processed.contains_key(key) {
            return Ok(false);
        }
        self.tables_mut().processed.insert(key.clone(), Utc::now());
        Ok(true)
    }

    async fn is_processed(&mut self, key: &ProcessedKey) -> Result<bool> {
        Ok(self.tables().processed.contains_key(key))
    }

    async fn commit(self) -> Result<()> {
        let Self { mut guard, staged } = self;
        if let Some(staged) = staged {
            *guard = staged;
        }
        Ok(())
    }
}

#[async_trait]
impl<D> Database for MemoryDatabase<D>
where
    D: Clone + Default + Send + Sync + 'static,
{
    type Tx = MemoryTransaction<D>;

    async fn begin(&self) -> Result<Self::Tx> {
        let guard = self.tables.clone().lock_owned().await;
        Ok(MemoryTransaction {
            guard,
            staged: None,
        })
    }
}

#[async_trait]
impl<D> OutboxStore for MemoryDatabase<D>
where
    D: Clone + Default + Send + Sync + 'static,
{
    async fn claim_pending(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxEntry>> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let deadline = lease_deadline(now, lease);

        let claimed = tables
            .outbox
            .iter_mut()
            .filter(|row| row.entry.dispatched_at.is_none())
            .filter(|row| row.locked_until.is_none_or(|until| until <= now))
            .take(limit)
            .map(|row| {
                row.locked_until = Some(deadline);
                row.entry.clone()
            })
            .collect();

        Ok(claimed)
    }

    async fn mark_dispatched(&self, id: OutboxEntryId) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(row) = tables.outbox.iter_mut().find(|row| row.entry.id == id) {
            row.entry.dispatched_at = Some(Utc::now());
            row.locked_until = None;
        }
        Ok(())
    }

    async fn record_failure(&self, id: OutboxEntryId, error: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(row) = tables.outbox.iter_mut().find(|row| row.entry.id == id) {
            row.entry.attempts += 1;
            row.entry.last_error = Some(error.to_string());
            row.locked_until = None;
        }
        Ok(())
    }

    async fn release(&self, ids: &[OutboxEntryId]) -> Result<()> {
        let mut tables = self.tables.lock().await;
        for row in tables.outbox.iter_mut() {
            if ids.contains(&row.entry.id) {
                row.locked_until = None;
            }
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        let tables = self.tables.lock().await;
        let pending = tables
            .outbox
            .iter()
            .filter(|row| row.entry.dispatched_at.is_none())
            .count();
        Ok(pending as u64)
    }

    async fn prune_dispatched(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let len_before = tables.outbox.len();
        tables
            .outbox
            .retain(|row| row.entry.dispatched_at.is_none_or(|at| at >= before));
        Ok((len_before - tables.outbox.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DispatchStatus, IdempotencyStore, OutboxStaging, OutboxWriter};

    type TestDatabase = MemoryDatabase<Vec<String>>;

    fn entry(event_type: &str) -> OutboxEntry {
        OutboxEntry::builder()
            .event_type(event_type)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn commit_publishes_domain_and_outbox_together() {
        let db = TestDatabase::new();

        let mut tx = db.begin().await.unwrap();
        tx.domain_mut().push("row".to_string());
        OutboxWriter::new()
            .append_entry(&mut tx, entry("BookingMade"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(db.read(|rows| rows.len()).await, 1);
        let entries = db.outbox_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[0].status(), DispatchStatus::Pending);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let db = TestDatabase::new();

        {
            let mut tx = db.begin().await.unwrap();
            tx.domain_mut().push("row".to_string());
            tx.insert_outbox_entry(&entry("BookingMade")).await.unwrap();
            tx.mark_if_absent(&ProcessedKey::new("booking", "b-1"))
                .await
                .unwrap();
        }

        assert_eq!(db.read(|rows| rows.len()).await, 0);
        assert!(db.outbox_entries().await.is_empty());
        assert_eq!(db.processed_count().await, 0);
    }

    static CLONES: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    /// Domain tables that count how often they are copied.
    #[derive(Debug, Default)]
    struct CountedClones(Vec<String>);

    impl Clone for CountedClones {
        fn clone(&self) -> Self {
            CLONES.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Self(self.0.clone())
        }
    }

    #[tokio::test]
    async fn reads_do_not_copy_the_tables() {
        use std::sync::atomic::Ordering;

        let db = MemoryDatabase::<CountedClones>::new();
        let key = ProcessedKey::new("issue_receipt", "t-1");
        let mut tx = db.begin().await.unwrap();
        tx.domain_mut().0.push("row".to_string());
        tx.mark_if_absent(&key).await.unwrap();
        tx.commit().await.unwrap();
        let after_write = CLONES.load(Ordering::SeqCst);
        assert_eq!(after_write, 1);

        for _ in 0..3 {
            let mut tx = db.begin().await.unwrap();
            assert_eq!(tx.domain().0.len(), 1);
            assert!(tx.is_processed(&key).await.unwrap());
            tx.commit().await.unwrap();
        }
        assert!(db.is_processed(&key).await.unwrap());

        assert_eq!(CLONES.load(Ordering::SeqCst), after_write);
        assert_eq!(db.read(|rows| rows.0.len()).await, 1);
    }

    #[tokio::test]
    async fn forgotten_record_can_be_marked_again() {
        let db = TestDatabase::new();
        let key = ProcessedKey::new("booking", "b-1");
        assert!(db.mark_if_absent(&key).await.unwrap());

        assert!(db.forget_processed(&key).await);
        assert!(!db.forget_processed(&key).await);
        assert!(db.mark_if_absent(&key).await.unwrap());
    }

    #[tokio::test]
    async fn transactions_are_serialized() {
        let db = TestDatabase::new();
        let tx = db.begin().await.unwrap();

        let second = tokio::time::timeout(Duration::from_millis(20), db.begin()).await;
        assert!(second.is_err(), "second transaction must wait for the first");

        drop(tx);
        assert!(db.begin().await.is_ok());
    }

    #[tokio::test]
    async fn entries_keep_insertion_order() {
        let db = TestDatabase::new();
        let mut tx = db.begin().await.unwrap();
        for name in ["First", "Second", "Third"] {
            tx.insert_outbox_entry(&entry(name)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let claimed = db.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        let types: Vec<_> = claimed.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["First", "Second", "Third"]);
        assert!(claimed.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[tokio::test]
    async fn claimed_entries_are_leased() {
        let db = TestDatabase::new();
        db.stage_outbox_entries(vec![entry("A"), entry("B")])
            .await
            .unwrap();

        let first = db.claim_pending(1, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event_type, "A");

        // A concurrent relay only sees what is not leased.
        let second = db.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event_type, "B");

        assert!(db.claim_pending(10, Duration::from_secs(30)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_lease_makes_entry_claimable_again() {
        let db = TestDatabase::new();
        db.stage_outbox_entries(vec![entry("A")]).await.unwrap();

        let first = db.claim_pending(10, Duration::ZERO).await.unwrap();
        let again = db.claim_pending(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(again.len(), 1);
        assert_eq!(first[0].id, again[0].id);
    }

    #[tokio::test]
    async fn dispatched_entries_are_not_claimed() {
        let db = TestDatabase::new();
        db.stage_outbox_entries(vec![entry("A")]).await.unwrap();

        let claimed = db.claim_pending(10, Duration::ZERO).await.unwrap();
        db.mark_dispatched(claimed[0].id).await.unwrap();

        assert!(db.claim_pending(10, Duration::ZERO).await.unwrap().is_empty());
        assert_eq!(db.pending_count().await.unwrap(), 0);
        assert_eq!(db.outbox_entries().await[0].status(), DispatchStatus::Dispatched);
    }

    #[tokio::test]
    async fn record_failure_counts_attempts_and_releases() {
        let db = TestDatabase::new();
        db.stage_outbox_entries(vec![entry("A")]).await.unwrap();

        let claimed = db.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        db.record_failure(claimed[0].id, "bus unavailable")
            .await
            .unwrap();

        let retried = db.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].attempts, 1);
        assert_eq!(retried[0].last_error.as_deref(), Some("bus unavailable"));
    }

    #[tokio::test]
    async fn release_does_not_count_attempts() {
        let db = TestDatabase::new();
        db.stage_outbox_entries(vec![entry("A")]).await.unwrap();

        let claimed = db.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        db.release(&[claimed[0].id]).await.unwrap();

        let retried = db.claim_pending(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(retried[0].attempts, 0);
    }

    #[tokio::test]
    async fn prune_removes_only_old_dispatched_entries() {
        let db = TestDatabase::new();
        db.stage_outbox_entries(vec![entry("A"), entry("B")])
            .await
            .unwrap();
        let claimed = db.claim_pending(1, Duration::ZERO).await.unwrap();
        db.mark_dispatched(claimed[0].id).await.unwrap();

        let removed = db
            .prune_dispatched(Utc::now() + chrono::TimeDelta::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.outbox_entries().await.len(), 1);
        assert_eq!(db.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_if_absent_is_check_and_set() {
        let db = TestDatabase::new();
        let key = ProcessedKey::new("issue_receipt", "t-1");

        assert!(!db.is_processed(&key).await.unwrap());
        assert!(db.mark_if_absent(&key).await.unwrap());
        assert!(!db.mark_if_absent(&key).await.unwrap());
        assert!(db.is_processed(&key).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_mark_if_absent_has_one_winner() {
        let db = TestDatabase::new();
        let key = ProcessedKey::new("issue_receipt", "t-1");

        let attempts = (0..32).map(|_| {
            let db = db.clone();
            let key = key.clone();
            tokio::spawn(async move { db.mark_if_absent(&key).await.unwrap() })
        });
        let results = futures_util::future::join_all(attempts).await;

        let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(winners, 1);
    }
}
