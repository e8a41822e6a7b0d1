//! Connection lifecycle.
//!
//! One [`ConnectionManager`] per process owns the local store, the session
//! provider and the sync channel (initial download plus the upload task).
//!
//! - Initialization runs once; concurrent callers await the same attempt and a
//!   failed attempt can be retried.
//! - Non-forced connects coalesce onto an in-flight attempt and are throttled
//!   by a cooldown measured from the last attempt. Forced connects bypass both.
//! - Opening a channel closes the previous one first, so there is never more
//!   than one upload task.

use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use tidepool_engine::{
    ConflictStrategy, ConnectionState, Identity, Operation, RemoteWins, Schema, Session,
    SyncStatus, Transaction, TransactionId,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::connector::UploadPipeline;
use crate::db::now_millis;
use crate::download::sync_down;
use crate::error::{Error, Result, SharedResult};
use crate::remote::RemoteStore;
use crate::session::{AuthBackend, SessionProvider};
use crate::status::StatusHandle;
use crate::store::LocalStore;

static GLOBAL: OnceLock<Arc<ConnectionManager>> = OnceLock::new();

type SharedAttempt<T> = Shared<BoxFuture<'static, SharedResult<T>>>;

/// What a call to [`ConnectionManager::connect`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new channel was opened
    Connected,
    /// A channel was already open; nothing changed
    AlreadyConnected,
    /// Dropped by the cooldown window
    Throttled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
    /// Coalesces and honors the cooldown
    Throttled,
    /// Coalesces but ignores the cooldown
    SessionStarted,
    /// Always opens a new channel
    Forced,
}

/// An open sync channel: the identity it was opened for and its upload task.
struct SyncChannel {
    identity: Identity,
    upload: JoinHandle<()>,
}

impl SyncChannel {
    fn close(self) {
        self.upload.abort();
        tracing::info!(identity = %self.identity, "Sync channel closed");
    }
}

#[derive(Default)]
struct ConnectSlot {
    in_flight: Option<SharedAttempt<ConnectOutcome>>,
    last_attempt: Option<Instant>,
}

/// Process-wide connection manager.
pub struct ConnectionManager {
    config: ClientConfig,
    schema: Schema,
    remote: Arc<dyn RemoteStore>,
    sessions: SessionProvider,
    status: StatusHandle,
    conflicts: Arc<dyn ConflictStrategy>,
    store: OnceCell<LocalStore>,
    init: Mutex<Option<SharedAttempt<()>>>,
    connect_slot: Mutex<ConnectSlot>,
    channel: Mutex<Option<SyncChannel>>,
    watcher: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        config: ClientConfig,
        schema: Schema,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthBackend>,
    ) -> Self {
        let sessions = SessionProvider::new(auth, config.session_refresh_margin);
        Self {
            config,
            schema,
            remote,
            sessions,
            status: StatusHandle::new(),
            conflicts: Arc::new(RemoteWins),
            store: OnceCell::new(),
            init: Mutex::new(None),
            connect_slot: Mutex::new(ConnectSlot::default()),
            channel: Mutex::new(None),
            watcher: StdMutex::new(None),
        }
    }

    pub fn with_conflict_strategy(mut self, conflicts: Arc<dyn ConflictStrategy>) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// The process-wide manager, created by `init` on first use.
    pub fn global_or_init(init: impl FnOnce() -> ConnectionManager) -> Arc<ConnectionManager> {
        GLOBAL.get_or_init(|| Arc::new(init())).clone()
    }

    /// The process-wide manager, if one was created.
    pub fn global() -> Option<Arc<ConnectionManager>> {
        GLOBAL.get().cloned()
    }

    pub fn sessions(&self) -> &SessionProvider {
        &self.sessions
    }

    pub fn status(&self) -> SyncStatus {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// The local store, opened on first use.
    pub async fn get_local_store(&self) -> Result<LocalStore> {
        self.store
            .get_or_try_init(|| LocalStore::open(&self.config, self.schema.clone()))
            .await
            .cloned()
    }

    /// Open the local store and start watching for session changes.
    ///
    /// Runs at most once successfully. Concurrent callers share one attempt;
    /// after a failure the next call starts a new one.
    pub async fn init_once(self: &Arc<Self>) -> SharedResult<()> {
        let attempt = {
            let mut slot = self.init.lock().await;
            match slot.as_ref() {
                Some(attempt) => attempt.clone(),
                None => {
                    let this = Arc::clone(self);
                    let attempt = async move { this.initialize().await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        let result = attempt.clone().await;
        if result.is_err() {
            let mut slot = self.init.lock().await;
            if slot.as_ref().is_some_and(|a| a.ptr_eq(&attempt)) {
                *slot = None;
            }
        }
        result
    }

    async fn initialize(self: Arc<Self>) -> Result<()> {
        self.status.transition(ConnectionState::Initializing);

        let pending = match self.count_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "Initialization failed");
                self.status.transition(ConnectionState::Uninitialized);
                return Err(e);
            }
        };
        self.status.update(|s| s.pending_transactions = pending);

        let watcher = self.spawn_session_watcher();
        if let Ok(mut slot) = self.watcher.lock() {
            if let Some(previous) = slot.replace(watcher) {
                previous.abort();
            }
        }

        self.status.transition(ConnectionState::Idle);
        tracing::info!(pending, "Sync client initialized");
        Ok(())
    }

    async fn count_pending(&self) -> Result<u64> {
        self.get_local_store().await?.queue().pending_count().await
    }

    /// Open a sync channel.
    ///
    /// Without `force`, a call while a connect is in flight awaits that
    /// attempt, a call while connected is a no-op, and a call within the
    /// cooldown of the last attempt is dropped.
    pub async fn connect(self: &Arc<Self>, force: bool) -> SharedResult<ConnectOutcome> {
        let mode = if force {
            ConnectMode::Forced
        } else {
            ConnectMode::Throttled
        };
        self.connect_with(mode).await
    }

    async fn connect_with(self: &Arc<Self>, mode: ConnectMode) -> SharedResult<ConnectOutcome> {
        self.init_once().await?;

        let attempt = {
            let mut slot = self.connect_slot.lock().await;

            let coalesced = match mode {
                ConnectMode::Forced => None,
                _ => slot.in_flight.clone(),
            };
            match coalesced {
                Some(in_flight) => in_flight,
                None => {
                    if mode != ConnectMode::Forced
                        && self.status.connection() == ConnectionState::Connected
                    {
                        return Ok(ConnectOutcome::AlreadyConnected);
                    }
                    if mode == ConnectMode::Throttled {
                        if let Some(last) = slot.last_attempt {
                            if last.elapsed() < self.config.connect_cooldown {
                                tracing::debug!("Connect throttled");
                                return Ok(ConnectOutcome::Throttled);
                            }
                        }
                    }

                    slot.last_attempt = Some(Instant::now());
                    let this = Arc::clone(self);
                    let attempt = async move { this.open_channel().await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    slot.in_flight = Some(attempt.clone());
                    attempt
                }
            }
        };

        let result = attempt.clone().await;

        let mut slot = self.connect_slot.lock().await;
        if slot.in_flight.as_ref().is_some_and(|a| a.ptr_eq(&attempt)) {
            slot.in_flight = None;
        }
        result
    }

    async fn open_channel(self: Arc<Self>) -> Result<ConnectOutcome> {
        let mut channel = self.channel.lock().await;
        if let Some(previous) = channel.take() {
            previous.close();
        }

        self.status.transition(ConnectionState::Connecting);

        match self.start_sync().await {
            Ok(opened) => {
                tracing::info!(identity = %opened.identity, "Sync channel open");
                *channel = Some(opened);
                self.status.transition(ConnectionState::Connected);
                Ok(ConnectOutcome::Connected)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Connect failed");
                self.status.transition(ConnectionState::Idle);
                self.status.update(|s| s.last_error = e.kind());
                Err(e)
            }
        }
    }

    async fn start_sync(&self) -> Result<SyncChannel> {
        let store = self.get_local_store().await?;
        let session = self
            .sessions
            .get_session()
            .await?
            .ok_or(Error::Unauthenticated)?;

        sync_down(
            &store,
            self.remote.as_ref(),
            &session,
            self.config.request_timeout,
        )
        .await?;
        self.status.update(|s| s.last_synced_at = Some(now_millis()));

        let pipeline = UploadPipeline::new(
            store,
            self.remote.clone(),
            self.sessions.clone(),
            self.status.clone(),
            &self.config,
        )
        .with_conflict_strategy(self.conflicts.clone());

        Ok(SyncChannel {
            identity: session.identity,
            upload: tokio::spawn(pipeline.run()),
        })
    }

    /// Close the sync channel. Local writes keep queueing.
    pub async fn disconnect(&self) {
        if let Some(channel) = self.channel.lock().await.take() {
            channel.close();
        }
        self.status.transition(ConnectionState::Idle);
    }

    /// Apply a transaction locally and queue it for upload.
    pub async fn write_transaction(
        self: &Arc<Self>,
        operations: Vec<Operation>,
    ) -> Result<TransactionId> {
        self.init_once().await.map_err(Error::from_shared)?;
        let store = self.get_local_store().await?;
        let id = store.write_transaction(Transaction::new(operations)).await?;

        let pending = store.queue().pending_count().await?;
        self.status.update(|s| s.pending_transactions = pending);
        Ok(id)
    }

    fn spawn_session_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let mut changes = self.sessions.subscribe();

        tokio::spawn(async move {
            loop {
                let session = match changes.recv().await {
                    Ok(session) => session,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return,
                };
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                manager.on_session_change(session).await;
            }
        })
    }

    /// Reconnect when a session appears while idle, or when the identity
    /// behind the open channel changes.
    async fn on_session_change(self: &Arc<Self>, session: Session) {
        let connected_as = self
            .channel
            .lock()
            .await
            .as_ref()
            .map(|c| c.identity.clone());

        let result = match (self.status.connection(), connected_as) {
            // A new session outranks the cooldown left by a failed attempt.
            (ConnectionState::Idle, _) => self.connect_with(ConnectMode::SessionStarted).await,
            (_, Some(identity)) if identity != session.identity => {
                tracing::info!(from = %identity, to = %session.identity, "Identity changed");
                self.connect(true).await
            }
            _ => return,
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "Reconnect after session change failed");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(slot) = self.watcher.get_mut() {
            if let Some(watcher) = slot.take() {
                watcher.abort();
            }
        }
        if let Some(channel) = self.channel.get_mut().take() {
            channel.upload.abort();
        }
    }
}
