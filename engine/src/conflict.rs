//! Conflict resolution hook.
//!
//! The default is remote wins: a downloaded row replaces the local copy. Some
//! text columns hold JSON objects whose top-level keys are edited
//! independently by different actors; for those a patch is shallow-merged
//! into the current remote value before upload instead of replacing it.

use crate::{TableName, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a column behaves when local and remote values diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    RemoteWins,
    ShallowMerge,
}

/// Injectable conflict strategy.
pub trait ConflictStrategy: Send + Sync {
    fn resolution(&self, table: &str, column: &str) -> Resolution;
}

/// Remote value always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl ConflictStrategy for RemoteWins {
    fn resolution(&self, _table: &str, _column: &str) -> Resolution {
        Resolution::RemoteWins
    }
}

/// Remote wins except for the designated `(table, column)` pairs, which are
/// shallow-merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShallowMergeColumns {
    columns: BTreeSet<(TableName, String)>,
}

impl ShallowMergeColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, table: impl Into<TableName>, column: impl Into<String>) -> Self {
        self.columns.insert((table.into(), column.into()));
        self
    }
}

impl ConflictStrategy for ShallowMergeColumns {
    fn resolution(&self, table: &str, column: &str) -> Resolution {
        if self
            .columns
            .contains(&(table.to_string(), column.to_string()))
        {
            Resolution::ShallowMerge
        } else {
            Resolution::RemoteWins
        }
    }
}

/// Merge the top-level keys of `local` over `remote`.
///
/// Both values are expected to be text holding a JSON object. If either side
/// is not an object, the local value is returned unchanged.
pub fn shallow_merge(remote: &Value, local: &Value) -> Value {
    let (Some(remote_text), Some(local_text)) = (remote.as_text(), local.as_text()) else {
        return local.clone();
    };

    let parsed = (
        serde_json::from_str::<serde_json::Value>(remote_text),
        serde_json::from_str::<serde_json::Value>(local_text),
    );
    let (Ok(serde_json::Value::Object(mut merged)), Ok(serde_json::Value::Object(local_obj))) =
        parsed
    else {
        return local.clone();
    };

    for (key, value) in local_obj {
        merged.insert(key, value);
    }

    Value::Text(serde_json::Value::Object(merged).to_string())
}
