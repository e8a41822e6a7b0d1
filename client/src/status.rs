//! Observable sync status.

use std::sync::Arc;

use tidepool_engine::{ConnectionState, SyncStatus};
use tokio::sync::watch;

/// Writer side of the status surface. Cheap to clone.
#[derive(Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SyncStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    pub fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        self.tx.send_modify(f);
    }

    /// Move the connection state machine. Illegal transitions are ignored.
    pub fn transition(&self, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|status| {
            if status.connection == next || !status.connection.can_transition_to(next) {
                return false;
            }
            status.connection = next;
            status.connected = next == ConnectionState::Connected;
            true
        })
    }

    pub fn connection(&self) -> ConnectionState {
        self.tx.borrow().connection
    }
}
