//! Local store: the client's SQLite copy of the synchronized tables plus the
//! change queue that feeds the upload pipeline.
//!
//! Every local write goes through [`LocalStore::write_transaction`], which
//! applies the operations and enqueues them in one SQLite transaction, so a
//! row never changes locally without a matching queued change.

use std::sync::Arc;

use tidepool_engine::{Operation, Record, Schema, Transaction, TransactionId};
use tokio::sync::Notify;

use crate::config::ClientConfig;
use crate::db::{self, LocalChangeQueue, Pool};
use crate::error::Result;

/// Handle to the local database. Cheap to clone.
#[derive(Clone)]
pub struct LocalStore {
    pool: Pool,
    schema: Arc<Schema>,
    queue: LocalChangeQueue,
    changed: Arc<Notify>,
}

impl LocalStore {
    /// Open the database at `config.database_url` and materialize the schema.
    pub async fn open(config: &ClientConfig, schema: Schema) -> Result<Self> {
        let pool = db::create_pool(&config.database_url).await?;
        db::create_tables(&pool, &schema).await?;
        let schema = Arc::new(schema);
        let queue = LocalChangeQueue::open(pool.clone(), schema.clone()).await?;

        tracing::info!(
            database = %config.database_url,
            tables = schema.tables().count(),
            "Local store opened"
        );

        Ok(Self {
            pool,
            schema,
            queue,
            changed: Arc::new(Notify::new()),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn queue(&self) -> &LocalChangeQueue {
        &self.queue
    }

    /// Woken whenever a transaction is enqueued.
    pub fn changes(&self) -> Arc<Notify> {
        self.changed.clone()
    }

    /// Validate, apply locally and enqueue a transaction.
    ///
    /// On a schema violation nothing is written and nothing is queued.
    pub async fn write_transaction(
        &self,
        transaction: impl Into<Transaction>,
    ) -> Result<TransactionId> {
        let transaction = transaction.into();
        self.schema.validate_transaction(&transaction)?;

        let id = {
            let _guard = self.queue.lock_writes().await;
            let mut tx = self.pool.begin().await?;
            for op in transaction.operations() {
                db::apply_operation(&mut tx, op).await?;
            }
            let id = LocalChangeQueue::enqueue_in(&mut tx, transaction.operations()).await?;
            tx.commit().await?;
            id
        };

        tracing::debug!(
            transaction_id = id,
            operations = transaction.len(),
            "Transaction queued"
        );
        self.changed.notify_one();

        Ok(id)
    }

    /// Convenience for a single-operation transaction.
    pub async fn write(&self, operation: Operation) -> Result<TransactionId> {
        self.write_transaction(Transaction::single(operation)).await
    }

    pub async fn get(&self, table: &str, id: &str) -> Result<Option<Record>> {
        let table = self.schema.require_table(table)?;
        Ok(db::fetch_row(&self.pool, table, id).await?)
    }

    /// Every local row of `table`, ordered by id.
    pub async fn all(&self, table: &str) -> Result<Vec<Record>> {
        let table = self.schema.require_table(table)?;
        Ok(db::fetch_rows(&self.pool, table).await?)
    }

    /// Replace the local copy of `table` with the rows the remote returned.
    ///
    /// Rows with unresolved local operations are left alone until those
    /// operations upload; every other row takes the remote value, and rows
    /// the remote no longer returns are removed.
    pub async fn apply_remote_rows(&self, table: &str, records: Vec<Record>) -> Result<usize> {
        let definition = self.schema.require_table(table)?;

        let _guard = self.queue.lock_writes().await;
        let mut tx = self.pool.begin().await?;

        let pending = LocalChangeQueue::pending_record_keys(&mut tx).await?;
        let is_pending = |id: &str| pending.contains(&(table.to_string(), id.to_string()));

        let mut applied = 0;
        let mut remote_ids = std::collections::HashSet::new();
        for record in records {
            remote_ids.insert(record.id.clone());
            if is_pending(&record.id) {
                continue;
            }
            // Columns outside the local schema are dropped.
            let fields = record
                .fields
                .into_iter()
                .filter(|(column, _)| definition.column(column).is_some())
                .collect();
            db::upsert_row(&mut tx, table, &record.id, &fields).await?;
            applied += 1;
        }

        for id in db::fetch_row_ids(&mut tx, table).await? {
            if !remote_ids.contains(&id) && !is_pending(&id) {
                db::delete_row(&mut tx, table, &id).await?;
            }
        }

        tx.commit().await?;
        Ok(applied)
    }
}
