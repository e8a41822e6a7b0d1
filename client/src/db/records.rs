//! Materialized tables for the synchronized schema.
//!
//! Table and column names come from a checked [`Schema`], so they are safe to
//! interpolate; values are always bound.

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection};
use tidepool_engine::{
    ColumnType, Fields, Operation, OperationKind, Record, Schema, TableDefinition, Value,
    ID_COLUMN,
};

use super::Pool;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Create every table of the schema that does not exist yet.
pub async fn create_tables(pool: &Pool, schema: &Schema) -> Result<(), sqlx::Error> {
    for table in schema.tables() {
        sqlx::query(&create_table_sql(table)).execute(pool).await?;
    }
    Ok(())
}

fn create_table_sql(table: &TableDefinition) -> String {
    let mut columns = vec![format!("{} TEXT PRIMARY KEY NOT NULL", ID_COLUMN)];
    columns.extend(
        table
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.column_type.sql_type())),
    );
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.name,
        columns.join(", ")
    )
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Boolean(b) => query.bind(*b),
        Value::Integer(i) => query.bind(*i),
        Value::Real(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
    }
}

/// Apply one operation to the local copy of its table.
///
/// A patch or delete of a row that is not present locally changes nothing.
pub async fn apply_operation(
    conn: &mut SqliteConnection,
    op: &Operation,
) -> Result<(), sqlx::Error> {
    match &op.kind {
        OperationKind::Put { fields } => upsert_row(conn, &op.table, &op.record_id, fields).await,
        OperationKind::Patch { fields } => {
            let assignments: Vec<String> = fields
                .keys()
                .enumerate()
                .map(|(i, column)| format!("{} = ?{}", column, i + 2))
                .collect();
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?1",
                op.table,
                assignments.join(", "),
                ID_COLUMN
            );

            let mut query = sqlx::query(&sql).bind(op.record_id.clone());
            for value in fields.values() {
                query = bind_value(query, value);
            }
            query.execute(&mut *conn).await?;
            Ok(())
        }
        OperationKind::Delete => delete_row(conn, &op.table, &op.record_id).await,
    }
}

/// Replace a whole row. Columns absent from `fields` become NULL.
pub async fn upsert_row(
    conn: &mut SqliteConnection,
    table: &str,
    id: &str,
    fields: &Fields,
) -> Result<(), sqlx::Error> {
    let mut columns = vec![ID_COLUMN.to_string()];
    columns.extend(fields.keys().cloned());
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();

    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );

    let mut query = sqlx::query(&sql).bind(id.to_string());
    for value in fields.values() {
        query = bind_value(query, value);
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

pub async fn delete_row(
    conn: &mut SqliteConnection,
    table: &str,
    id: &str,
) -> Result<(), sqlx::Error> {
    let sql = format!("DELETE FROM {} WHERE {} = ?1", table, ID_COLUMN);
    sqlx::query(&sql).bind(id.to_string()).execute(&mut *conn).await?;
    Ok(())
}

pub async fn fetch_row(
    pool: &Pool,
    table: &TableDefinition,
    id: &str,
) -> Result<Option<Record>, sqlx::Error> {
    let sql = format!("{} WHERE {} = ?1", select_sql(table), ID_COLUMN);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(|r| read_record(&r, table)).transpose()
}

pub async fn fetch_rows(pool: &Pool, table: &TableDefinition) -> Result<Vec<Record>, sqlx::Error> {
    let sql = format!("{} ORDER BY {}", select_sql(table), ID_COLUMN);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(|r| read_record(r, table)).collect()
}

/// Ids of every row currently stored for `table`.
pub async fn fetch_row_ids(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let sql = format!("SELECT {} FROM {}", ID_COLUMN, table);
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(|r| r.try_get(ID_COLUMN)).collect()
}

fn select_sql(table: &TableDefinition) -> String {
    let mut columns = vec![ID_COLUMN];
    columns.extend(table.column_names());
    format!("SELECT {} FROM {}", columns.join(", "), table.name)
}

fn read_record(row: &SqliteRow, table: &TableDefinition) -> Result<Record, sqlx::Error> {
    let id: String = row.try_get(ID_COLUMN)?;
    let mut fields = Fields::new();

    for column in &table.columns {
        let name = column.name.as_str();
        let value = match column.column_type {
            ColumnType::Text => Value::from(row.try_get::<Option<String>, _>(name)?),
            ColumnType::Integer => Value::from(row.try_get::<Option<i64>, _>(name)?),
            ColumnType::Real => Value::from(row.try_get::<Option<f64>, _>(name)?),
            ColumnType::Boolean => {
                Value::from(row.try_get::<Option<i64>, _>(name)?.map(|v| v != 0))
            }
        };
        fields.insert(column.name.clone(), value);
    }

    Ok(Record::new(table.name.clone(), id, fields))
}
