//! Schema definition and validation.
//!
//! The schema declares which tables are synchronized and the type of every
//! column. It is used to materialize the local store and to reject malformed
//! operations before they are ever queued.

use crate::error::{Error, Result, SchemaViolation};
use crate::{Fields, Operation, OperationKind, TableName, Transaction, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the implicit primary key column every table carries.
pub const ID_COLUMN: &str = "id";

/// Column types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    /// Stored as an integer (0 or 1)
    Boolean,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Text => write!(f, "text"),
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Real => write!(f, "real"),
            ColumnType::Boolean => write!(f, "boolean"),
        }
    }
}

impl ColumnType {
    /// SQL type used when materializing the column.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }

    /// Whether `value` may be stored in a column of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Text, Value::Text(_)) => true,
            (ColumnType::Integer, Value::Integer(_)) => true,
            (ColumnType::Real, Value::Real(_) | Value::Integer(_)) => true,
            (ColumnType::Boolean, Value::Boolean(_)) => true,
            (ColumnType::Boolean, Value::Integer(i)) => *i == 0 || *i == 1,
            _ => false,
        }
    }
}

/// Definition of a column in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Real)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }
}

/// A synchronized table: a name plus an ordered column list.
///
/// Construct with [`define_table`] so names are checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub name: TableName,
    pub columns: Vec<Column>,
}

impl TableDefinition {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Validate a field map against this table.
    pub fn validate_fields(&self, fields: &Fields) -> std::result::Result<(), SchemaViolation> {
        for (name, value) in fields {
            if name == ID_COLUMN {
                return Err(SchemaViolation::ReservedColumn {
                    table: self.name.clone(),
                    column: name.clone(),
                });
            }

            let column = self
                .column(name)
                .ok_or_else(|| SchemaViolation::UnknownColumn {
                    table: self.name.clone(),
                    column: name.clone(),
                })?;

            if !column.column_type.accepts(value) {
                return Err(SchemaViolation::TypeMismatch {
                    table: self.name.clone(),
                    column: name.clone(),
                    expected: column.column_type.to_string(),
                    got: value.type_name().to_string(),
                });
            }
        }

        Ok(())
    }

    fn check(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(Error::InvalidSchema(format!(
                "invalid table name: {:?}",
                self.name
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !is_identifier(&column.name) {
                return Err(Error::InvalidSchema(format!(
                    "invalid column name {:?} in table {}",
                    column.name, self.name
                )));
            }
            if column.name == ID_COLUMN {
                return Err(Error::InvalidSchema(format!(
                    "column '{}' is implicit in table {}",
                    ID_COLUMN, self.name
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate column {} in table {}",
                    column.name, self.name
                )));
            }
        }

        Ok(())
    }
}

/// Identifiers are interpolated into SQL, so only `[A-Za-z_][A-Za-z0-9_]*`.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Define a table.
pub fn define_table(name: impl Into<TableName>, columns: Vec<Column>) -> Result<TableDefinition> {
    let table = TableDefinition {
        name: name.into(),
        columns,
    };
    table.check()?;
    Ok(table)
}

/// Build a schema from a list of table definitions.
pub fn build_schema(tables: Vec<TableDefinition>) -> Result<Schema> {
    let mut schema = Schema::default();
    for table in tables {
        // Definitions may come from deserialized config, so re-check them.
        table.check()?;
        if schema.tables.contains_key(&table.name) {
            return Err(Error::InvalidSchema(format!(
                "duplicate table {}",
                table.name
            )));
        }
        schema.tables.insert(table.name.clone(), table);
    }
    Ok(schema)
}

/// The set of synchronized tables. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    tables: BTreeMap<TableName, TableDefinition>,
}

impl Schema {
    /// Get a table definition by name.
    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    /// All tables, ordered by name.
    pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Look up a table or fail with [`SchemaViolation::UnknownTable`].
    pub fn require_table(&self, name: &str) -> std::result::Result<&TableDefinition, SchemaViolation> {
        self.tables
            .get(name)
            .ok_or_else(|| SchemaViolation::UnknownTable(name.to_string()))
    }

    /// Validate a single operation.
    pub fn validate_operation(&self, op: &Operation) -> std::result::Result<(), SchemaViolation> {
        let table = self.require_table(&op.table)?;

        if op.record_id.is_empty() {
            return Err(SchemaViolation::EmptyRecordId(op.table.clone()));
        }

        match &op.kind {
            OperationKind::Put { fields } => table.validate_fields(fields),
            OperationKind::Patch { fields } => {
                if fields.is_empty() {
                    return Err(SchemaViolation::EmptyPatch {
                        table: op.table.clone(),
                        record_id: op.record_id.clone(),
                    });
                }
                table.validate_fields(fields)
            }
            OperationKind::Delete => Ok(()),
        }
    }

    /// Validate every operation of a transaction.
    pub fn validate_transaction(&self, tx: &Transaction) -> std::result::Result<(), SchemaViolation> {
        if tx.operations().is_empty() {
            return Err(SchemaViolation::EmptyTransaction);
        }
        tx.operations()
            .iter()
            .try_for_each(|op| self.validate_operation(op))
    }
}
