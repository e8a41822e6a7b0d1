//! Error taxonomy and remote failure classification.
//!
//! Every failed remote call is classified as exactly one of [`Disposition::Fatal`]
//! (discard the operation, keep going) or [`Disposition::Transient`] (stop and
//! retry the transaction later). Classification only looks at the remote error
//! code and HTTP status, using a fixed catalogue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error classes surfaced through the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown table or column at enqueue time
    SchemaViolation,
    /// No valid identity or session
    Unauthenticated,
    /// The remote rejected an operation for a structural reason
    FatalRemoteRejection,
    /// Network trouble, overload, anything worth retrying
    TransientRemoteFailure,
    /// A connect call dropped by the cooldown window
    ConnectionThrottled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SchemaViolation => "schema violation",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::FatalRemoteRejection => "fatal remote rejection",
            ErrorKind::TransientRemoteFailure => "transient remote failure",
            ErrorKind::ConnectionThrottled => "connection throttled",
        };
        f.write_str(name)
    }
}

/// Outcome of classifying a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Retrying cannot succeed; discard the operation
    Fatal,
    /// Retry the transaction after a backoff
    Transient,
}

impl Disposition {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Disposition::Fatal => ErrorKind::FatalRemoteRejection,
            Disposition::Transient => ErrorKind::TransientRemoteFailure,
        }
    }
}

/// SQLSTATE classes that describe a defect in the request itself:
/// `22` data exception, `23` integrity constraint violation,
/// `42` syntax error or access rule violation.
pub const FATAL_CODE_CLASSES: &[&str] = &["22", "23", "42"];

/// Non-SQLSTATE codes that are fatal: no matching row, unknown column.
pub const FATAL_CODES: &[&str] = &["PGRST116", "PGRST204"];

/// Codes meaning the token was not accepted.
pub const UNAUTHORIZED_CODES: &[&str] = &["PGRST301", "PGRST302"];

/// HTTP statuses that are fatal when the response carries no code.
pub const FATAL_STATUSES: &[u16] = &[400, 403, 404, 409, 422];

/// A failed remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFailure {
    /// Remote error code (SQLSTATE or gateway code), if the remote sent one
    pub code: Option<String>,
    /// HTTP status, if the call reached the remote
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteFailure {
    /// The request never got an answer.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: None,
            message: message.into(),
        }
    }

    /// The call exceeded its deadline.
    pub fn timeout() -> Self {
        Self::network("request timed out")
    }

    /// A rejection carrying a remote error code.
    pub fn coded(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            status: None,
            message: message.into(),
        }
    }

    /// A rejection described by its HTTP status and optional code.
    pub fn http(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether the remote refused the session token.
    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
            || self
                .code
                .as_deref()
                .is_some_and(|c| UNAUTHORIZED_CODES.contains(&c))
    }

    pub fn disposition(&self) -> Disposition {
        classify(self)
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, self.status) {
            (Some(code), Some(status)) => write!(f, "[{} {}] {}", status, code, self.message),
            (Some(code), None) => write!(f, "[{}] {}", code, self.message),
            (None, Some(status)) => write!(f, "[{}] {}", status, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteFailure {}

/// Classify a failed remote call.
pub fn classify(failure: &RemoteFailure) -> Disposition {
    if failure.is_unauthorized() {
        return Disposition::Transient;
    }

    if let Some(code) = failure.code.as_deref() {
        if FATAL_CODES.contains(&code) {
            return Disposition::Fatal;
        }
        // SQLSTATE codes are five characters; the first two are the class.
        if code.len() == 5
            && code.is_ascii()
            && FATAL_CODE_CLASSES.contains(&&code[..2])
        {
            return Disposition::Fatal;
        }
        return Disposition::Transient;
    }

    match failure.status {
        Some(status) if FATAL_STATUSES.contains(&status) => Disposition::Fatal,
        _ => Disposition::Transient,
    }
}
