//! Record types for row data.

use crate::{Fields, RecordId, TableName, Value};
use serde::{Deserialize, Serialize};

/// A row of a synchronized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Table this record belongs to
    pub table: TableName,
    /// Unique identifier, shared by the local and remote copies
    pub id: RecordId,
    /// Column values (the id is not repeated here)
    pub fields: Fields,
}

/// Wire form of a row: the id followed by the column values at the top level.
///
/// ```json
/// {"id": "p-1", "name": "Ada", "doctor_id": "d-1"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRow {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    pub fn new(table: impl Into<TableName>, id: impl Into<RecordId>, fields: Fields) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
            fields,
        }
    }

    /// Get a column value. Missing columns read as `None`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    /// Overlay `patch` onto this record's fields.
    pub fn apply_patch(&mut self, patch: &Fields) {
        for (column, value) in patch {
            self.fields.insert(column.clone(), value.clone());
        }
    }

    pub fn from_wire(table: impl Into<TableName>, row: WireRow) -> Self {
        Self {
            table: table.into(),
            id: row.id,
            fields: row.fields,
        }
    }

    pub fn to_wire(&self) -> WireRow {
        WireRow {
            id: self.id.clone(),
            fields: self.fields.clone(),
        }
    }
}
