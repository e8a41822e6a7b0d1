//! Bucket rules: which remote rows an identity may see.
//!
//! Each table gets at most one predicate over the authenticated identity.
//! Visibility composes along ownership chains: a leaf table is visible through
//! its parent, which is visible through its own parent, up to a root table
//! owned directly by the identity.
//!
//! ```text
//! doctors       owner  { column: owner_id }                  owner_id == identity
//! patients      parent { column: doctor_id, parent: doctors } doctor_id in visible doctors
//! appointments  parent { column: patient_id, parent: patients }
//! ```
//!
//! Evaluation is the remote's job. The client never re-derives these rules; it
//! only needs to know that rejections caused by them are final.

use crate::error::{Error, Result};
use crate::{Record, Schema, TableName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Row-membership condition for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Predicate {
    /// Rows whose `column` equals the identity (root of a chain)
    Owner { column: String },
    /// Rows whose `column` references a visible row of `parent`
    Parent { column: String, parent: TableName },
    /// Every row
    Public,
}

/// A predicate bound to a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketRule {
    pub table: TableName,
    pub predicate: Predicate,
}

impl BucketRule {
    pub fn owner(table: impl Into<TableName>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicate: Predicate::Owner {
                column: column.into(),
            },
        }
    }

    pub fn parent(
        table: impl Into<TableName>,
        column: impl Into<String>,
        parent: impl Into<TableName>,
    ) -> Self {
        Self {
            table: table.into(),
            predicate: Predicate::Parent {
                column: column.into(),
                parent: parent.into(),
            },
        }
    }

    pub fn public(table: impl Into<TableName>) -> Self {
        Self {
            table: table.into(),
            predicate: Predicate::Public,
        }
    }
}

/// Concrete filter produced for one identity and one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    All,
    Nothing,
    ColumnEquals { column: String, value: String },
    ColumnIn { column: String, values: BTreeSet<String> },
}

impl RowFilter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Nothing => false,
            RowFilter::ColumnEquals { column, value } => record
                .get(column)
                .and_then(|v| v.as_key())
                .is_some_and(|key| &key == value),
            RowFilter::ColumnIn { column, values } => record
                .get(column)
                .and_then(|v| v.as_key())
                .is_some_and(|key| values.contains(&key)),
        }
    }
}

/// Read access to the rows a parent predicate needs.
pub trait RowSource {
    fn rows(&self, table: &str) -> &[Record];
}

impl RowSource for HashMap<TableName, Vec<Record>> {
    fn rows(&self, table: &str) -> &[Record] {
        self.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Validated rule set. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketRules {
    rules: BTreeMap<TableName, Predicate>,
}

impl BucketRules {
    /// Validate `rules` against `schema`.
    ///
    /// Every referenced table and column must exist, each table may have one
    /// rule, and every parent chain must end at an owner or public root.
    pub fn new(rules: Vec<BucketRule>, schema: &Schema) -> Result<Self> {
        let mut map = BTreeMap::new();

        for rule in rules {
            let table = schema.table(&rule.table).ok_or_else(|| {
                Error::InvalidBucketRules(format!("unknown table {}", rule.table))
            })?;

            match &rule.predicate {
                Predicate::Owner { column } | Predicate::Parent { column, .. }
                    if table.column(column).is_none() =>
                {
                    return Err(Error::InvalidBucketRules(format!(
                        "unknown column {}.{}",
                        rule.table, column
                    )));
                }
                Predicate::Parent { parent, .. } if !schema.contains(parent) => {
                    return Err(Error::InvalidBucketRules(format!(
                        "unknown parent table {} for {}",
                        parent, rule.table
                    )));
                }
                _ => {}
            }

            if map.insert(rule.table.clone(), rule.predicate).is_some() {
                return Err(Error::InvalidBucketRules(format!(
                    "more than one rule for {}",
                    rule.table
                )));
            }
        }

        let rules = Self { rules: map };
        for table in rules.rules.keys() {
            rules.check_chain(table)?;
        }
        Ok(rules)
    }

    fn check_chain(&self, table: &str) -> Result<()> {
        let mut seen = HashSet::new();
        let mut current = table;

        while let Some(Predicate::Parent { parent, .. }) = self.rules.get(current) {
            if !seen.insert(current) {
                return Err(Error::InvalidBucketRules(format!(
                    "ownership cycle through {}",
                    current
                )));
            }
            if !self.rules.contains_key(parent) {
                return Err(Error::InvalidBucketRules(format!(
                    "parent {} of {} has no rule",
                    parent, current
                )));
            }
            current = parent.as_str();
        }

        Ok(())
    }

    pub fn predicate(&self, table: &str) -> Option<&Predicate> {
        self.rules.get(table)
    }

    /// Ancestor tables of `table`, root first. Excludes `table` itself.
    pub fn lineage(&self, table: &str) -> Vec<TableName> {
        let mut chain = Vec::new();
        let mut current = table;
        while let Some(Predicate::Parent { parent, .. }) = self.rules.get(current) {
            chain.push(parent.clone());
            current = parent.as_str();
        }
        chain.reverse();
        chain
    }

    /// Evaluate the filter `identity` gets for `table`.
    ///
    /// `source` must hold every table in [`lineage`](Self::lineage).
    pub fn filter_for(&self, table: &str, identity: &str, source: &impl RowSource) -> RowFilter {
        match self.rules.get(table) {
            None => RowFilter::Nothing,
            Some(Predicate::Public) => RowFilter::All,
            Some(Predicate::Owner { column }) => RowFilter::ColumnEquals {
                column: column.clone(),
                value: identity.to_string(),
            },
            Some(Predicate::Parent { column, parent }) => {
                let parent_filter = self.filter_for(parent, identity, source);
                let values = source
                    .rows(parent)
                    .iter()
                    .filter(|r| parent_filter.matches(r))
                    .map(|r| r.id.clone())
                    .collect();
                RowFilter::ColumnIn {
                    column: column.clone(),
                    values,
                }
            }
        }
    }
}
