//! Operation types for expressing changes.
//!
//! Local mutations are recorded as operations, never as direct writes to the
//! remote. Operations are immutable once recorded and are the only unit of
//! replication.

use crate::{Fields, RecordId, TableName};
use serde::{Deserialize, Serialize};

/// What an operation does to its record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OperationKind {
    /// Create or fully replace the record
    Put { fields: Fields },
    /// Apply a partial field update
    Patch { fields: Fields },
    /// Remove the record
    Delete,
}

/// A single recorded mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Target table
    pub table: TableName,
    /// Client-generated id, stable across local and remote copies
    pub record_id: RecordId,
    #[serde(flatten)]
    pub kind: OperationKind,
}

impl Operation {
    /// Create or replace a record.
    pub fn put(table: impl Into<TableName>, record_id: impl Into<RecordId>, fields: Fields) -> Self {
        Self {
            table: table.into(),
            record_id: record_id.into(),
            kind: OperationKind::Put { fields },
        }
    }

    /// Update some fields of a record.
    pub fn patch(
        table: impl Into<TableName>,
        record_id: impl Into<RecordId>,
        fields: Fields,
    ) -> Self {
        Self {
            table: table.into(),
            record_id: record_id.into(),
            kind: OperationKind::Patch { fields },
        }
    }

    /// Delete a record.
    pub fn delete(table: impl Into<TableName>, record_id: impl Into<RecordId>) -> Self {
        Self {
            table: table.into(),
            record_id: record_id.into(),
            kind: OperationKind::Delete,
        }
    }

    /// Short label for logs: `put`, `patch` or `delete`.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            OperationKind::Put { .. } => "put",
            OperationKind::Patch { .. } => "patch",
            OperationKind::Delete => "delete",
        }
    }

    /// The field payload, if any.
    pub fn fields(&self) -> Option<&Fields> {
        match &self.kind {
            OperationKind::Put { fields } | OperationKind::Patch { fields } => Some(fields),
            OperationKind::Delete => None,
        }
    }

    /// Whether both operations target the same record.
    pub fn same_record(&self, other: &Operation) -> bool {
        self.table == other.table && self.record_id == other.record_id
    }
}
