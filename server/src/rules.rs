//! Synchronized tables and bucket rules, loaded once at startup.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tidepool_engine::{
    build_schema, BucketRule, BucketRules, Record, RowFilter, Schema, TableDefinition, TableName,
};

use crate::db::RowStore;
use crate::error::Result;

/// On-disk form of the rules file.
#[derive(Debug, Deserialize)]
struct RulesFile {
    tables: Vec<TableDefinition>,
    #[serde(default)]
    buckets: Vec<BucketRule>,
}

/// Errors loading the rules file.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("Failed to read sync rules: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed sync rules: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid sync rules: {0}")]
    Invalid(#[from] tidepool_engine::Error),
}

/// Validated schema plus the bucket rules evaluated against it.
#[derive(Debug, Clone)]
pub struct SyncRules {
    pub schema: Schema,
    pub buckets: BucketRules,
}

impl SyncRules {
    pub fn new(schema: Schema, buckets: Vec<BucketRule>) -> std::result::Result<Self, RulesError> {
        let buckets = BucketRules::new(buckets, &schema)?;
        Ok(Self { schema, buckets })
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, RulesError> {
        let file: RulesFile = serde_json::from_str(json)?;
        Self::new(build_schema(file.tables)?, file.buckets)
    }

    pub fn load(path: &Path) -> std::result::Result<Self, RulesError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Rows of `table` that `identity` may see.
    ///
    /// Loads every ancestor table of `table` so parent predicates can be
    /// resolved against current data.
    pub async fn filter_for(
        &self,
        rows: &dyn RowStore,
        table: &str,
        identity: &str,
    ) -> Result<RowFilter> {
        let mut source: HashMap<TableName, Vec<Record>> = HashMap::new();
        for ancestor in self.buckets.lineage(table) {
            let records = rows.list(&ancestor).await?;
            source.insert(ancestor, records);
        }
        Ok(self.buckets.filter_for(table, identity, &source))
    }
}
