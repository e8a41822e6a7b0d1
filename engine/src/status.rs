//! Connection state machine and the read-only sync status surface.

use crate::{ErrorKind, Timestamp};
use serde::{Deserialize, Serialize};

/// Process-wide connection state.
///
/// `Uninitialized -> Initializing -> Idle` once, then
/// `Idle <-> Connecting <-> Connected`. Any state may fall back to `Idle`
/// on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Initializing,
    Idle,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Idle) => !matches!(self, Uninitialized),
            (Uninitialized, Initializing) => true,
            (Initializing, Uninitialized) => true,
            (Idle, Connecting) | (Connected, Connecting) => true,
            (Connecting, Connected) => true,
            _ => false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        !matches!(
            self,
            ConnectionState::Uninitialized | ConnectionState::Initializing
        )
    }
}

/// Snapshot consumed by UI status indicators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub connection: ConnectionState,
    pub connected: bool,
    pub uploading: bool,
    pub pending_transactions: u64,
    pub last_error: Option<ErrorKind>,
    pub last_synced_at: Option<Timestamp>,
    pub consecutive_failures: u32,
    /// Set once consecutive transient failures reach the configured threshold
    pub persistent_failure: bool,
}

impl SyncStatus {
    /// True when nothing is waiting for upload and the last attempt succeeded.
    pub fn is_synced(&self) -> bool {
        self.connected && self.pending_transactions == 0 && self.last_error.is_none()
    }
}
