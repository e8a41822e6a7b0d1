//! Row handlers.
//!
//! Every request is scoped to the caller's bucket: reads only see rows the
//! bucket rules grant, and writes may only produce or touch such rows.

use tidepool_engine::{Fields, Operation, Record, RowFilter, WireRow};

use crate::db::RowStore;
use crate::error::{AppError, Result};
use crate::rules::SyncRules;

/// Table-level check plus the caller's filter for it.
async fn scope(
    rows: &dyn RowStore,
    rules: &SyncRules,
    table: &str,
    identity: &str,
) -> Result<RowFilter> {
    rules.schema.require_table(table)?;
    rules.filter_for(rows, table, identity).await
}

/// A row the caller can see, or `PGRST116`.
async fn visible_row(
    rows: &dyn RowStore,
    filter: &RowFilter,
    table: &str,
    id: &str,
) -> Result<Record> {
    rows.get(table, id)
        .await?
        .filter(|record| filter.matches(record))
        .ok_or_else(|| AppError::NotFound(format!("{}/{}", table, id)))
}

fn ensure_in_bucket(filter: &RowFilter, record: &Record, identity: &str) -> Result<()> {
    if filter.matches(record) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{}/{} is outside the bucket of {}",
            record.table, record.id, identity
        )))
    }
}

/// GET /rows/{table}
pub async fn handle_list(
    rows: &dyn RowStore,
    rules: &SyncRules,
    identity: &str,
    table: &str,
) -> Result<Vec<WireRow>> {
    let filter = scope(rows, rules, table, identity).await?;
    let visible: Vec<WireRow> = rows
        .list(table)
        .await?
        .iter()
        .filter(|record| filter.matches(record))
        .map(Record::to_wire)
        .collect();

    tracing::debug!(table, identity, rows = visible.len(), "Served rows");
    Ok(visible)
}

/// GET /rows/{table}/{id}
pub async fn handle_get(
    rows: &dyn RowStore,
    rules: &SyncRules,
    identity: &str,
    table: &str,
    id: &str,
) -> Result<WireRow> {
    let filter = scope(rows, rules, table, identity).await?;
    Ok(visible_row(rows, &filter, table, id).await?.to_wire())
}

/// PUT /rows/{table}/{id}: create or replace a row.
pub async fn handle_put(
    rows: &dyn RowStore,
    rules: &SyncRules,
    identity: &str,
    table: &str,
    id: &str,
    fields: Fields,
) -> Result<WireRow> {
    rules
        .schema
        .validate_operation(&Operation::put(table, id, fields.clone()))?;
    let filter = scope(rows, rules, table, identity).await?;

    // Replacing someone else's row is as forbidden as creating one for them.
    if let Some(existing) = rows.get(table, id).await? {
        ensure_in_bucket(&filter, &existing, identity)?;
    }

    let record = Record::new(table, id, fields);
    ensure_in_bucket(&filter, &record, identity)?;
    rows.put(&record).await?;

    tracing::debug!(table, id, identity, "Row replaced");
    Ok(record.to_wire())
}

/// PATCH /rows/{table}/{id}: update some columns of an existing row.
pub async fn handle_patch(
    rows: &dyn RowStore,
    rules: &SyncRules,
    identity: &str,
    table: &str,
    id: &str,
    fields: Fields,
) -> Result<WireRow> {
    rules
        .schema
        .validate_operation(&Operation::patch(table, id, fields.clone()))?;
    let filter = scope(rows, rules, table, identity).await?;

    let mut record = visible_row(rows, &filter, table, id).await?;
    record.apply_patch(&fields);
    ensure_in_bucket(&filter, &record, identity)?;
    rows.put(&record).await?;

    tracing::debug!(table, id, identity, "Row patched");
    Ok(record.to_wire())
}

/// DELETE /rows/{table}/{id}
pub async fn handle_delete(
    rows: &dyn RowStore,
    rules: &SyncRules,
    identity: &str,
    table: &str,
    id: &str,
) -> Result<()> {
    rules.schema.validate_operation(&Operation::delete(table, id))?;
    let filter = scope(rows, rules, table, identity).await?;

    visible_row(rows, &filter, table, id).await?;
    if !rows.delete(table, id).await? {
        return Err(AppError::NotFound(format!("{}/{}", table, id)));
    }

    tracing::debug!(table, id, identity, "Row deleted");
    Ok(())
}
