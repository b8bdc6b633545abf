use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row};
use uuid::Uuid;

use crate::{
    Database, OutboxEntry, OutboxEntryId, OutboxStore, ProcessedKey, Result, Transaction,
};

const OUTBOX_COLUMNS: &str =
    "seq, id, event_type, payload, metadata, created_at, attempts, last_error, dispatched_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PostgresDatabase {
    /// Creates a new PostgreSQL store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Connects a pool to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Bounds how long a transaction waits for row locks before failing
    /// with a retryable conflict.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_entry(row: PgRow) -> Result<OutboxEntry> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, String> = serde_json::from_value(metadata_json)?;

        Ok(OutboxEntry {
            id: OutboxEntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            sequence: row.try_get("seq")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            metadata,
            created_at: row.try_get("created_at")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            dispatched_at: row.try_get("dispatched_at")?,
        })
    }
}

/// A serializable PostgreSQL transaction.
pub struct PgTransaction {
    inner: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    /// Connection for domain queries that belong to this unit of work.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.inner
    }

    /// Rolls back explicitly. Dropping the transaction has the same effect.
    pub async fn rollback(self) -> Result<()> {
        self.inner.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert_outbox_entry(&mut self, entry: &OutboxEntry) -> Result<()> {
        let metadata_json = serde_json::to_value(&entry.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO outbox (id, event_type, payload, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(metadata_json)
        .bind(entry.created_at)
        .execute(&mut *self.inner)
        .await?;

        Ok(())
    }

    async fn mark_if_absent(&mut self, key: &ProcessedKey) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_keys (scope, key)
            VALUES ($1, $2)
            ON CONFLICT (scope, key) DO NOTHING
            "#,
        )
        .bind(&key.scope)
        .bind(&key.key)
        .execute(&mut *self.inner)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_processed(&mut self, key: &ProcessedKey) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM processed_keys WHERE scope = $1 AND key = $2)",
        )
        .bind(&key.scope)
        .bind(&key.key)
        .fetch_one(&mut *self.inner)
        .await?;

        Ok(exists)
    }

    async fn commit(self) -> Result<()> {
        self.inner.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let mut inner = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *inner)
            .await?;

        if let Some(timeout) = self.lock_timeout {
            // SET does not accept bind parameters; the value is an integer.
            let sql = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            sqlx::query(&sql).execute(&mut *inner).await?;
        }

        Ok(PgTransaction { inner })
    }
}

#[async_trait]
impl OutboxStore for PostgresDatabase {
    async fn claim_pending(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxEntry>> {
        let sql = format!(
            r#"
            UPDATE outbox
            SET locked_until = now() + make_interval(secs => $2)
            WHERE id IN (
                SELECT id FROM outbox
                WHERE dispatched_at IS NULL
                  AND (locked_until IS NULL OR locked_until <= now())
                ORDER BY seq ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(lease.as_secs_f64())
            .fetch_all(&self.pool)
            .await?;

        let mut entries = rows
            .into_iter()
            .map(Self::row_to_entry)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING does not preserve the subquery order.
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn mark_dispatched(&self, id: OutboxEntryId) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET dispatched_at = now(), locked_until = NULL WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, id: OutboxEntryId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET attempts = attempts + 1, last_error = $2, locked_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release(&self, ids: &[OutboxEntryId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = ids.iter().map(OutboxEntryId::as_uuid).collect();
        sqlx::query("UPDATE outbox SET locked_until = NULL WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE dispatched_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn prune_dispatched(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox WHERE dispatched_at IS NOT NULL AND dispatched_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl PostgresDatabase {
    /// Returns every outbox entry in insertion order.
    pub async fn outbox_entries(&self) -> Result<Vec<OutboxEntry>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox ORDER BY seq ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }
}
