//! Durable local change queue.
//!
//! Transactions are stored in insertion order and leave the queue only once
//! every operation in them has been resolved. Each row carries a resolution
//! cursor (`resolved`) so an interrupted upload resumes at the first
//! unresolved operation after a restart.

use std::collections::BTreeSet;
use std::sync::Arc;

use sqlx::{Row, SqliteConnection};
use tidepool_engine::{
    Operation, PendingTransaction, RemoteFailure, Schema, Timestamp, Transaction, TransactionId,
};
use tokio::sync::Mutex;

use super::Pool;
use crate::error::{Error, Result};

/// An operation the remote rejected permanently.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscardedOperation {
    pub transaction_id: TransactionId,
    pub index: usize,
    pub operation: Operation,
    /// Remote error code, if the rejection carried one
    pub code: Option<String>,
    pub message: String,
    pub discarded_at: Timestamp,
}

/// Handle to the queue tables. Cheap to clone.
#[derive(Clone)]
pub struct LocalChangeQueue {
    pool: Pool,
    schema: Arc<Schema>,
    write_lock: Arc<Mutex<()>>,
}

impl LocalChangeQueue {
    /// Create the queue tables if needed. Transactions are checked against
    /// `schema` before they are queued.
    pub async fn open(pool: Pool, schema: Arc<Schema>) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tidepool_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operations TEXT NOT NULL,
                op_count INTEGER NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tidepool_discarded (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_id INTEGER NOT NULL,
                op_index INTEGER NOT NULL,
                operation TEXT NOT NULL,
                code TEXT,
                message TEXT NOT NULL,
                discarded_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            schema,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Append a transaction without touching the local tables.
    ///
    /// Fails with a schema violation, and queues nothing, when the
    /// transaction is empty or does not match the schema.
    pub async fn enqueue(&self, transaction: impl Into<Transaction>) -> Result<TransactionId> {
        let transaction = transaction.into();
        self.schema.validate_transaction(&transaction)?;

        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        Self::enqueue_in(&mut conn, transaction.operations()).await
    }

    /// Append already-validated operations on an existing connection,
    /// typically inside a database transaction that also applied them locally.
    pub(crate) async fn enqueue_in(
        conn: &mut SqliteConnection,
        operations: &[Operation],
    ) -> Result<TransactionId> {
        let encoded = serde_json::to_string(operations)?;
        let result = sqlx::query(
            r#"
            INSERT INTO tidepool_transactions (operations, op_count, created_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(encoded)
        .bind(operations.len() as i64)
        .bind(now_millis() as i64)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub(crate) async fn lock_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Oldest transaction that still has unresolved operations.
    pub async fn peek_oldest_pending(&self) -> Result<Option<PendingTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, operations, resolved, created_at
            FROM tidepool_transactions
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let operations: String = row.try_get("operations")?;
        let resolved: i64 = row.try_get("resolved")?;
        let created_at: i64 = row.try_get("created_at")?;

        Ok(Some(PendingTransaction {
            id: row.try_get("id")?,
            operations: serde_json::from_str(&operations)?,
            resolved: resolved as usize,
            created_at: created_at as Timestamp,
        }))
    }

    /// Advance the cursor past operation `index`.
    ///
    /// Marking an already-resolved operation again is a no-op; skipping ahead
    /// is an error.
    pub async fn mark_operation_resolved(
        &self,
        transaction_id: TransactionId,
        index: usize,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        Self::advance(&mut conn, transaction_id, index).await
    }

    async fn advance(
        conn: &mut SqliteConnection,
        transaction_id: TransactionId,
        index: usize,
    ) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE tidepool_transactions
            SET resolved = ?2 + 1
            WHERE id = ?1 AND resolved = ?2 AND ?2 < op_count
            "#,
        )
        .bind(transaction_id)
        .bind(index as i64)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        let row = sqlx::query("SELECT resolved FROM tidepool_transactions WHERE id = ?1")
            .bind(transaction_id)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            None => Err(Error::TransactionNotFound(transaction_id)),
            Some(row) => {
                let resolved: i64 = row.try_get("resolved")?;
                if (index as i64) < resolved {
                    Ok(())
                } else {
                    Err(Error::OperationOutOfOrder {
                        transaction_id,
                        index,
                    })
                }
            }
        }
    }

    /// Record a permanently rejected operation and advance past it.
    pub async fn discard_operation(
        &self,
        transaction_id: TransactionId,
        index: usize,
        operation: &Operation,
        failure: &RemoteFailure,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        Self::advance(&mut tx, transaction_id, index).await?;

        sqlx::query(
            r#"
            INSERT INTO tidepool_discarded
                (transaction_id, op_index, operation, code, message, discarded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(transaction_id)
        .bind(index as i64)
        .bind(serde_json::to_string(operation)?)
        .bind(failure.code.clone())
        .bind(failure.message.clone())
        .bind(now_millis() as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::warn!(
            transaction_id,
            index,
            table = %operation.table,
            record_id = %operation.record_id,
            op = operation.kind_name(),
            error = %failure,
            "Discarded operation rejected by remote"
        );

        Ok(())
    }

    /// Remove a fully resolved transaction.
    ///
    /// Completing a transaction that is already gone is a no-op.
    pub async fn complete_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let deleted = sqlx::query(
            "DELETE FROM tidepool_transactions WHERE id = ?1 AND resolved >= op_count",
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted == 1 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM tidepool_transactions WHERE id = ?1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();

        if exists {
            Err(Error::TransactionIncomplete(transaction_id))
        } else {
            Ok(())
        }
    }

    /// Operations discarded for `transaction_id`, in operation order.
    pub async fn discarded_for(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<DiscardedOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, op_index, operation, code, message, discarded_at
            FROM tidepool_discarded
            WHERE transaction_id = ?1
            ORDER BY op_index ASC
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(read_discarded).collect()
    }

    /// Every discarded operation, oldest first.
    pub async fn discarded(&self) -> Result<Vec<DiscardedOperation>> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, op_index, operation, code, message, discarded_at
            FROM tidepool_discarded
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(read_discarded).collect()
    }

    /// Number of transactions not yet removed from the queue.
    pub async fn pending_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tidepool_transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// `(table, record_id)` of every unresolved operation.
    pub(crate) async fn pending_record_keys(
        conn: &mut SqliteConnection,
    ) -> Result<BTreeSet<(String, String)>> {
        let rows = sqlx::query("SELECT operations, resolved FROM tidepool_transactions")
            .fetch_all(&mut *conn)
            .await?;

        let mut keys = BTreeSet::new();
        for row in rows {
            let operations: String = row.try_get("operations")?;
            let resolved: i64 = row.try_get("resolved")?;
            let operations: Vec<Operation> = serde_json::from_str(&operations)?;
            for op in operations.into_iter().skip(resolved as usize) {
                keys.insert((op.table, op.record_id));
            }
        }
        Ok(keys)
    }
}

fn read_discarded(row: &sqlx::sqlite::SqliteRow) -> Result<DiscardedOperation> {
    let operation: String = row.try_get("operation")?;
    let index: i64 = row.try_get("op_index")?;
    let discarded_at: i64 = row.try_get("discarded_at")?;

    Ok(DiscardedOperation {
        transaction_id: row.try_get("transaction_id")?,
        index: index as usize,
        operation: serde_json::from_str(&operation)?,
        code: row.try_get("code")?,
        message: row.try_get("message")?,
        discarded_at: discarded_at as Timestamp,
    })
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
