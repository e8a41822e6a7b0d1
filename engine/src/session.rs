//! Authenticated sessions.

use crate::{Identity, Timestamp};
use serde::{Deserialize, Serialize};

/// An identity plus a short-lived sync token.
///
/// Sessions are values: a refresh produces a new `Session`, it never mutates
/// an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub identity: Identity,
    pub token: String,
    /// Expiry in milliseconds since the epoch
    pub expires_at: Timestamp,
}

impl Session {
    pub fn new(identity: impl Into<Identity>, token: impl Into<String>, expires_at: Timestamp) -> Self {
        Self {
            identity: identity.into(),
            token: token.into(),
            expires_at,
        }
    }

    /// A stale session counts as absent, never as valid-but-expired.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }

    /// Valid for at least `margin_ms` more milliseconds.
    pub fn is_fresh_at(&self, now: Timestamp, margin_ms: u64) -> bool {
        now.saturating_add(margin_ms) < self.expires_at
    }
}
