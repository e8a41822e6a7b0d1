//! # Tidepool Engine
//!
//! Core types for a local-first sync engine that reconciles an offline
//! client store with a remote multi-tenant row store.
//!
//! This crate holds the parts of the system that are pure logic. The async
//! machinery (durable queue, upload pipeline, connection lifecycle) lives in
//! `tidepool-client`; the remote row store lives in `tidepool-server`.
//!
//! ## Design Principles
//!
//! - **No IO**: no files, network, clocks or runtimes
//! - **Deterministic**: classification and rule evaluation depend only on inputs
//! - **Closed data model**: row values are a fixed sum type checked against the schema
//!
//! ## Core Concepts
//!
//! ### Schema
//!
//! [`define_table`] and [`build_schema`] declare the synchronized tables.
//! Every [`Operation`] is validated against the [`Schema`] before it is
//! queued; a mismatch is a [`SchemaViolation`].
//!
//! ### Operations and Transactions
//!
//! Local mutations are [`Operation`]s (`Put`, `Patch`, `Delete`) grouped into
//! [`Transaction`]s. Transactions upload strictly in order, one at a time;
//! [`PendingTransaction`] carries the resolution cursor.
//!
//! ### Bucket Rules
//!
//! [`BucketRules`] map an identity to the rows it may see, following
//! ownership chains up to a tenant root.
//!
//! ### Classification
//!
//! [`classify`] sorts every [`RemoteFailure`] into fatal (discard the
//! operation) or transient (retry the transaction with [`RetryPolicy`]).
//!
//! ## Quick Start
//!
//! ```rust
//! use tidepool_engine::{
//!     build_schema, define_table, fields, Column, Operation, SchemaViolation, Transaction,
//! };
//!
//! // 1. Declare the schema
//! let schema = build_schema(vec![define_table(
//!     "patients",
//!     vec![Column::text("name"), Column::text("status")],
//! )
//! .unwrap()])
//! .unwrap();
//!
//! // 2. Record a transaction
//! let tx = Transaction::new(vec![
//!     Operation::put("patients", "p-1", fields([("name", "Ada")])),
//!     Operation::patch("patients", "p-1", fields([("status", "done")])),
//! ]);
//! assert!(schema.validate_transaction(&tx).is_ok());
//!
//! // 3. Unknown tables never reach the queue
//! let bad = Transaction::single(Operation::delete("unknown_table", "r2"));
//! assert_eq!(
//!     schema.validate_transaction(&bad),
//!     Err(SchemaViolation::UnknownTable("unknown_table".into()))
//! );
//! ```

pub mod bucket;
pub mod classify;
pub mod conflict;
pub mod error;
pub mod operation;
pub mod record;
pub mod retry;
pub mod schema;
pub mod session;
pub mod status;
pub mod transaction;
pub mod value;

// Re-export main types at crate root
pub use bucket::{BucketRule, BucketRules, Predicate, RowFilter, RowSource};
pub use classify::{classify, Disposition, ErrorKind, RemoteFailure};
pub use conflict::{shallow_merge, ConflictStrategy, RemoteWins, Resolution, ShallowMergeColumns};
pub use error::{Error, SchemaViolation};
pub use operation::{Operation, OperationKind};
pub use record::{Record, WireRow};
pub use retry::RetryPolicy;
pub use schema::{build_schema, define_table, Column, ColumnType, Schema, TableDefinition, ID_COLUMN};
pub use session::Session;
pub use status::{ConnectionState, SyncStatus};
pub use transaction::{OperationOutcome, PendingTransaction, Transaction, TransactionState};
pub use value::{fields, Fields, Value};

/// Type aliases for clarity
pub type TableName = String;
pub type RecordId = String;
pub type Identity = String;
pub type TransactionId = i64;
/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
