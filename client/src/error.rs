//! Error handling for the sync client.

use std::sync::Arc;

use tidepool_engine::{ErrorKind, RemoteFailure, TransactionId};

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] tidepool_engine::Error),

    #[error("Local store error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Authentication backend error: {0}")]
    Auth(String),

    #[error("Remote error: {0}")]
    Remote(RemoteFailure),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Operation {index} of transaction {transaction_id} resolved out of order")]
    OperationOutOfOrder {
        transaction_id: TransactionId,
        index: usize,
    },

    #[error("Transaction {0} still has unresolved operations")]
    TransactionIncomplete(TransactionId),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Shared(Arc<Error>),
}

impl From<tidepool_engine::SchemaViolation> for Error {
    fn from(violation: tidepool_engine::SchemaViolation) -> Self {
        Error::Engine(violation.into())
    }
}

impl Error {
    /// Status-surface class of this error, where one applies.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Engine(e) if e.is_schema_violation() => Some(ErrorKind::SchemaViolation),
            Error::Unauthenticated => Some(ErrorKind::Unauthenticated),
            Error::Remote(failure) => Some(failure.disposition().error_kind()),
            Error::Shared(inner) => inner.kind(),
            _ => None,
        }
    }

    /// Take back an error produced by a shared attempt.
    pub fn from_shared(err: Arc<Error>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(Error::Shared)
    }

    pub fn is_schema_violation(&self) -> bool {
        self.kind() == Some(ErrorKind::SchemaViolation)
    }
}

/// Result of a memoized attempt shared by every caller that awaited it.
pub type SharedResult<T> = std::result::Result<T, Arc<Error>>;

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;
