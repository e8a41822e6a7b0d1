//! Remote row store seam.
//!
//! The upload pipeline and the initial download talk to the remote only
//! through [`RemoteStore`], so tests can script failures and production code
//! can use [`HttpRemote`].

mod http;

pub use http::{HttpAuthBackend, HttpRemote};

use async_trait::async_trait;
use tidepool_engine::{Fields, Record, RemoteFailure, Session};

/// Result of a remote call.
pub type RemoteResult<T> = std::result::Result<T, RemoteFailure>;

/// A multi-tenant row store reachable with a session token.
///
/// Every call is scoped by the session: the remote only shows and accepts
/// rows inside the session identity's bucket.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or replace a whole row.
    async fn upsert(
        &self,
        session: &Session,
        table: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<()>;

    /// Overwrite the given columns of an existing row.
    async fn update(
        &self,
        session: &Session,
        table: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<()>;

    async fn delete(&self, session: &Session, table: &str, id: &str) -> RemoteResult<()>;

    /// Every row of `table` visible to the session.
    async fn select(&self, session: &Session, table: &str) -> RemoteResult<Vec<Record>>;

    async fn fetch(&self, session: &Session, table: &str, id: &str)
        -> RemoteResult<Option<Record>>;
}

/// Bound a remote call by `limit`; an elapsed deadline is a transient failure.
pub(crate) async fn with_timeout<T>(
    limit: std::time::Duration,
    call: impl std::future::Future<Output = RemoteResult<T>>,
) -> RemoteResult<T> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(RemoteFailure::timeout()))
}
