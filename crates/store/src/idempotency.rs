//! Durable record of operations that already completed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Database, Result, Transaction};

/// Key of an idempotency record.
///
/// `scope` separates independent deduplication domains: the capacity ledger
/// and each consumer group keep their own namespace, so one event delivered
/// to several handlers is processed once per handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessedKey {
    pub scope: String,
    pub key: String,
}

impl ProcessedKey {
    /// Creates the key for `key` within `scope`, usually a handler name.
    pub fn new(scope: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ProcessedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.scope, self.key)
    }
}

/// Standalone check-and-set over idempotency records.
///
/// Use [`Transaction::mark_if_absent`] instead when the record must commit
/// atomically with another write; this trait is the best-effort guard for
/// side effects that live outside the store.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically records `key`. Returns `true` when it was absent.
    async fn mark_if_absent(&self, key: &ProcessedKey) -> Result<bool>;

    async fn is_processed(&self, key: &ProcessedKey) -> Result<bool>;
}

#[async_trait]
impl<D: Database> IdempotencyStore for D {
    async fn mark_if_absent(&self, key: &ProcessedKey) -> Result<bool> {
        let mut tx = self.begin().await?;
        let was_absent = tx.mark_if_absent(key).await?;
        tx.commit().await?;
        Ok(was_absent)
    }

    async fn is_processed(&self, key: &ProcessedKey) -> Result<bool> {
        let mut tx = self.begin().await?;
        let processed = tx.is_processed(key).await?;
        // Read-only; rolling back is enough.
        drop(tx);
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped() {
        let a = ProcessedKey::new("issue_receipt", "t-1");
        let b = ProcessedKey::new("store_tickets", "t-1");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "issue_receipt/t-1");
    }
}
