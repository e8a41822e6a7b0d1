//! Short-lived opaque sync tokens.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tidepool_engine::{Identity, Timestamp};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Grant {
    identity: Identity,
    expires_at: DateTime<Utc>,
}

/// A token handed to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    /// Expiry in milliseconds since the Unix epoch
    pub expires_at: Timestamp,
}

/// Tokens issued by this process. Tokens do not survive a restart; clients
/// treat the resulting 401 as a signal to fetch a new one.
pub struct TokenRegistry {
    grants: DashMap<String, Grant>,
    ttl: Duration,
}

impl TokenRegistry {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            grants: DashMap::new(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1)),
        }
    }

    /// Issue a fresh token for `identity`.
    pub fn issue(&self, identity: &str) -> IssuedToken {
        self.issue_at(identity, Utc::now())
    }

    fn issue_at(&self, identity: &str, now: DateTime<Utc>) -> IssuedToken {
        let token = Uuid::new_v4().to_string();
        let expires_at = now + self.ttl;
        self.grants.insert(
            token.clone(),
            Grant {
                identity: identity.to_string(),
                expires_at,
            },
        );

        IssuedToken {
            token,
            expires_at: expires_at.timestamp_millis().max(0) as Timestamp,
        }
    }

    /// Identity behind `token`, if it is known and unexpired.
    pub fn resolve(&self, token: &str) -> Option<Identity> {
        self.resolve_at(token, Utc::now())
    }

    fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> Option<Identity> {
        let grant = self.grants.get(token)?.value().clone();
        if grant.expires_at <= now {
            self.grants.remove(token);
            return None;
        }
        Some(grant.identity)
    }

    /// Drop expired grants. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.grants.len();
        self.grants.retain(|_, grant| grant.expires_at > now);
        before - self.grants.len()
    }
}
