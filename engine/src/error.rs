//! Error types for the Tidepool engine.

use crate::TableName;
use thiserror::Error;

/// A mutation that does not fit the declared schema.
///
/// These are programming or configuration defects: they are raised at
/// enqueue time and never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("unknown table: {0}")]
    UnknownTable(TableName),

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: TableName, column: String },

    #[error("column '{column}' is reserved in table '{table}'")]
    ReservedColumn { table: TableName, column: String },

    #[error("type mismatch for '{table}.{column}': expected {expected}, got {got}")]
    TypeMismatch {
        table: TableName,
        column: String,
        expected: String,
        got: String,
    },

    #[error("record id must not be empty (table '{0}')")]
    EmptyRecordId(TableName),

    #[error("patch for '{table}/{record_id}' has no fields")]
    EmptyPatch { table: TableName, record_id: String },

    #[error("transaction must contain at least one operation")]
    EmptyTransaction,
}

/// All possible errors from the Tidepool engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("schema violation: {0}")]
    SchemaViolation(#[from] SchemaViolation),

    // Definition errors
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid bucket rules: {0}")]
    InvalidBucketRules(String),
}

impl Error {
    /// Whether this error belongs to the schema-violation class.
    pub fn is_schema_violation(&self) -> bool {
        matches!(self, Error::SchemaViolation(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
