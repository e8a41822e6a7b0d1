//! Sync transactions.
//!
//! A transaction is an ordered, non-empty group of operations uploaded and
//! acknowledged as a unit. The queue only advances past a transaction once
//! every operation in it has been resolved (applied or discarded).

use crate::{Operation, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};

/// A group of operations that has not been queued yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    operations: Vec<Operation>,
}

impl Transaction {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    /// Single-operation transaction.
    pub fn single(operation: Operation) -> Self {
        Self {
            operations: vec![operation],
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl From<Vec<Operation>> for Transaction {
    fn from(operations: Vec<Operation>) -> Self {
        Self::new(operations)
    }
}

/// Upload state of a transaction.
///
/// There is no failed state: a transient failure puts the transaction back
/// to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Uploading,
    Completed,
    Discarded,
}

/// How a single operation was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Applied,
    Discarded,
}

impl TransactionState {
    /// Terminal state for a fully resolved transaction.
    ///
    /// Discarded only if nothing in it was applied.
    pub fn from_outcomes(outcomes: &[OperationOutcome]) -> Self {
        if !outcomes.is_empty() && outcomes.iter().all(|o| *o == OperationOutcome::Discarded) {
            TransactionState::Discarded
        } else {
            TransactionState::Completed
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Completed | TransactionState::Discarded)
    }
}

/// A queued transaction together with its resolution cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub id: TransactionId,
    pub operations: Vec<Operation>,
    /// Operations `[0, resolved)` are resolved
    pub resolved: usize,
    pub created_at: Timestamp,
}

impl PendingTransaction {
    /// Index of the first operation still waiting for the remote.
    pub fn next_unresolved(&self) -> Option<usize> {
        (self.resolved < self.operations.len()).then_some(self.resolved)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved >= self.operations.len()
    }

    /// Unresolved operations with their indexes, in upload order.
    pub fn remaining(&self) -> impl Iterator<Item = (usize, &Operation)> {
        self.operations.iter().enumerate().skip(self.resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fields;

    fn pending(resolved: usize) -> PendingTransaction {
        PendingTransaction {
            id: 1,
            operations: vec![
                Operation::put("patients", "p-1", Fields::new()),
                Operation::delete("patients", "p-2"),
            ],
            resolved,
            created_at: 1000,
        }
    }

    #[test]
    fn cursor() {
        let tx = pending(0);
        assert_eq!(tx.next_unresolved(), Some(0));
        assert_eq!(tx.remaining().count(), 2);

        let tx = pending(1);
        assert_eq!(tx.next_unresolved(), Some(1));
        assert_eq!(tx.remaining().next().unwrap().0, 1);

        let tx = pending(2);
        assert!(tx.is_resolved());
        assert_eq!(tx.next_unresolved(), None);
    }

    #[test]
    fn terminal_state() {
        use OperationOutcome::*;
        assert_eq!(
            TransactionState::from_outcomes(&[Discarded, Applied]),
            TransactionState::Completed
        );
        assert_eq!(
            TransactionState::from_outcomes(&[Discarded, Discarded]),
            TransactionState::Discarded
        );
        assert!(TransactionState::Discarded.is_terminal());
        assert!(!TransactionState::Uploading.is_terminal());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_remaining_matches_cursor(len in 1usize..20, resolved in 0usize..25) {
                let operations = (0..len)
                    .map(|i| Operation::delete("patients", format!("p-{}", i)))
                    .collect();
                let tx = PendingTransaction { id: 7, operations, resolved, created_at: 0 };

                let remaining: Vec<usize> = tx.remaining().map(|(i, _)| i).collect();
                prop_assert_eq!(remaining.len(), len.saturating_sub(resolved));
                prop_assert_eq!(tx.is_resolved(), resolved >= len);
                prop_assert_eq!(tx.next_unresolved(), remaining.first().copied());
            }
        }
    }
}
