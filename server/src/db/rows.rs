//! Row stores.
//!
//! Rows are schemaless at this layer: the column values of every table are
//! kept as one JSON object per `(table, id)`. Validation against the schema
//! and bucket checks happen in the handlers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::types::Json;
use sqlx::Row;
use tidepool_engine::{Fields, Record, RecordId, TableName};

use super::Pool;
use crate::error::Result;

/// Storage for the rows of every synchronized table.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Every row of `table`, ordered by id.
    async fn list(&self, table: &str) -> Result<Vec<Record>>;

    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>>;

    /// Create or replace a row.
    async fn put(&self, record: &Record) -> Result<()>;

    /// Remove a row. Returns whether it existed.
    async fn delete(&self, table: &str, id: &str) -> Result<bool>;
}

/// PostgreSQL row store over the `sync_rows` table.
#[derive(Clone)]
pub struct PgRowStore {
    pool: Pool,
}

impl PgRowStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn decode_row(table: &str, row: &sqlx::postgres::PgRow) -> Result<Record> {
    let id: String = row.try_get("row_id")?;
    let Json(fields): Json<Fields> = row.try_get("data")?;
    Ok(Record::new(table, id, fields))
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn list(&self, table: &str) -> Result<Vec<Record>> {
        let rows = sqlx::query(
            r#"
            SELECT row_id, data FROM sync_rows
            WHERE table_name = $1
            ORDER BY row_id ASC
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| decode_row(table, row)).collect()
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>> {
        let row = sqlx::query(
            r#"
            SELECT row_id, data FROM sync_rows
            WHERE table_name = $1 AND row_id = $2
            "#,
        )
        .bind(table)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_row(table, &row)).transpose()
    }

    async fn put(&self, record: &Record) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_rows (table_name, row_id, data, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (table_name, row_id) DO UPDATE SET
                data = EXCLUDED.data,
                updated_at = NOW()
            "#,
        )
        .bind(&record.table)
        .bind(&record.id)
        .bind(Json(&record.fields))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_rows WHERE table_name = $1 AND row_id = $2")
            .bind(table)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-memory row store for development and tests. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryRowStore {
    tables: DashMap<TableName, BTreeMap<RecordId, Fields>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn list(&self, table: &str) -> Result<Vec<Record>> {
        Ok(self
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(id, fields)| Record::new(table, id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>> {
        Ok(self
            .tables
            .get(table)
            .and_then(|rows| rows.get(id).cloned())
            .map(|fields| Record::new(table, id, fields)))
    }

    async fn put(&self, record: &Record) -> Result<()> {
        self.tables
            .entry(record.table.clone())
            .or_default()
            .insert(record.id.clone(), record.fields.clone());
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool> {
        Ok(self
            .tables
            .get_mut(table)
            .is_some_and(|mut rows| rows.remove(id).is_some()))
    }
}
