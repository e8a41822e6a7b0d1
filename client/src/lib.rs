//! # Tidepool Client
//!
//! Offline-first sync client. Application code writes to a local SQLite
//! store; every write is queued durably and uploaded to the remote row store
//! in order once a session is available.
//!
//! ## Components
//!
//! - [`LocalStore`]: local tables plus the [`LocalChangeQueue`]
//! - [`SessionProvider`]: identity and short-lived sync tokens
//! - [`UploadPipeline`]: drains the queue, classifying every remote failure
//! - [`ConnectionManager`]: initialization, connect/disconnect, reconnects
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidepool_client::{ClientConfig, ConnectionManager, HttpAuthBackend, HttpRemote};
//! use tidepool_engine::{build_schema, define_table, fields, Column, Operation};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let schema = build_schema(vec![define_table("notes", vec![Column::text("body")])?])?;
//!
//! let auth = Arc::new(HttpAuthBackend::new(&config)?);
//! auth.sign_in("alice", "secret");
//! let remote = Arc::new(HttpRemote::new(&config)?);
//!
//! let manager = ConnectionManager::global_or_init(|| {
//!     ConnectionManager::new(config, schema, remote, auth)
//! });
//! manager
//!     .write_transaction(vec![Operation::put("notes", "n-1", fields([("body", "hi")]))])
//!     .await?;
//! manager.connect(false).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod connector;
pub mod db;
pub mod download;
pub mod error;
pub mod remote;
pub mod session;
pub mod status;
pub mod store;

pub use config::{ClientConfig, ConfigError};
pub use connection::{ConnectOutcome, ConnectionManager};
pub use connector::{DrainOutcome, UploadOutcome, UploadPipeline};
pub use db::{DiscardedOperation, LocalChangeQueue};
pub use download::sync_down;
pub use error::{Error, Result, SharedResult};
pub use remote::{HttpAuthBackend, HttpRemote, RemoteResult, RemoteStore};
pub use session::{AuthBackend, Credential, SessionProvider};
pub use status::StatusHandle;
pub use store::LocalStore;
