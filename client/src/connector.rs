//! Upload pipeline.
//!
//! Drains the change queue one transaction at a time, oldest first, and one
//! operation at a time within a transaction. Each operation ends in one of
//! three ways:
//!
//! - **Applied**: the cursor advances
//! - **Fatal rejection**: the operation is discarded and logged, the cursor
//!   advances, the rest of the transaction still uploads
//! - **Transient failure**: the pipeline stops and retries the same operation
//!   after a backoff; nothing behind it moves
//!
//! A transaction leaves the queue only once every operation is resolved, so
//! an uploaded change is never lost and never reordered.

use std::sync::Arc;
use std::time::Duration;

use tidepool_engine::{
    shallow_merge, ConflictStrategy, Disposition, ErrorKind, Fields, Operation, OperationKind,
    PendingTransaction, RemoteFailure, RemoteWins, Resolution, RetryPolicy, Session,
    TransactionState, Value,
};
use tokio::sync::broadcast::error::RecvError;

use crate::config::ClientConfig;
use crate::db::{duration_millis, now_millis};
use crate::download::sync_down;
use crate::error::{Error, Result};
use crate::remote::{with_timeout, RemoteResult, RemoteStore};
use crate::session::SessionProvider;
use crate::status::StatusHandle;
use crate::store::LocalStore;

/// Result of one pass over the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// The queue is empty
    Drained,
    /// A transient failure stopped the pass; retry after a backoff
    Retry(RemoteFailure),
    /// No session is available; wait for one
    Halted,
}

/// Result of uploading a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Every operation was resolved and the transaction left the queue
    Finished {
        state: TransactionState,
        /// Operations of this transaction the remote rejected
        discarded: usize,
    },
    Retry(RemoteFailure),
    Halted,
}

/// Uploads queued transactions to a [`RemoteStore`].
#[derive(Clone)]
pub struct UploadPipeline {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    sessions: SessionProvider,
    status: StatusHandle,
    conflicts: Arc<dyn ConflictStrategy>,
    retry: RetryPolicy,
    request_timeout: Duration,
    download_interval: Option<Duration>,
}

impl UploadPipeline {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        sessions: SessionProvider,
        status: StatusHandle,
        config: &ClientConfig,
    ) -> Self {
        Self {
            store,
            remote,
            sessions,
            status,
            conflicts: Arc::new(RemoteWins),
            retry: config.retry,
            request_timeout: config.request_timeout,
            download_interval: config.download_interval,
        }
    }

    /// Columns this strategy marks for shallow merge are merged into the
    /// current remote value before a patch uploads.
    pub fn with_conflict_strategy(mut self, conflicts: Arc<dyn ConflictStrategy>) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// Upload the unresolved operations of `transaction`, in order.
    pub async fn upload_transaction(
        &self,
        transaction: &PendingTransaction,
    ) -> Result<UploadOutcome> {
        let queue = self.store.queue();

        for (index, op) in transaction.remaining() {
            // Fetched per operation so a rotated token takes effect
            // mid-transaction.
            let session = match self.sessions.get_session().await {
                Ok(Some(session)) => session,
                Ok(None) => return Ok(UploadOutcome::Halted),
                Err(Error::Remote(failure)) => return Ok(UploadOutcome::Retry(failure)),
                Err(e) => return Err(e),
            };

            match self.send(&session, op).await {
                Ok(()) => {
                    queue.mark_operation_resolved(transaction.id, index).await?;
                    tracing::debug!(
                        transaction_id = transaction.id,
                        index,
                        op = op.kind_name(),
                        table = %op.table,
                        record_id = %op.record_id,
                        "Operation applied"
                    );
                }
                Err(failure) => {
                    if failure.is_unauthorized() {
                        self.sessions.invalidate().await;
                    }

                    match failure.disposition() {
                        Disposition::Fatal => {
                            queue
                                .discard_operation(transaction.id, index, op, &failure)
                                .await?;
                            self.status.update(|s| {
                                s.last_error = Some(ErrorKind::FatalRemoteRejection)
                            });
                        }
                        Disposition::Transient => return Ok(UploadOutcome::Retry(failure)),
                    }
                }
            }
        }

        let discarded = queue.discarded_for(transaction.id).await?.len();
        let state = if discarded == transaction.operations.len() {
            TransactionState::Discarded
        } else {
            TransactionState::Completed
        };
        queue.complete_transaction(transaction.id).await?;

        tracing::info!(
            transaction_id = transaction.id,
            operations = transaction.operations.len(),
            discarded,
            state = ?state,
            "Transaction uploaded"
        );

        Ok(UploadOutcome::Finished { state, discarded })
    }

    /// Upload until the queue is empty or something stops the pass.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        let outcome = self.drain_inner().await;
        let pending = self.store.queue().pending_count().await?;
        self.status.update(|s| {
            s.uploading = false;
            s.pending_transactions = pending;
        });
        outcome
    }

    async fn drain_inner(&self) -> Result<DrainOutcome> {
        while let Some(transaction) = self.store.queue().peek_oldest_pending().await? {
            self.status.update(|s| s.uploading = true);

            match self.upload_transaction(&transaction).await? {
                UploadOutcome::Finished { discarded, .. } => {
                    let pending = self.store.queue().pending_count().await?;
                    self.status.update(|s| {
                        s.pending_transactions = pending;
                        s.last_synced_at = Some(now_millis());
                        s.consecutive_failures = 0;
                        s.persistent_failure = false;
                        if discarded == 0 {
                            s.last_error = None;
                        }
                    });
                }
                UploadOutcome::Retry(failure) => return Ok(DrainOutcome::Retry(failure)),
                UploadOutcome::Halted => {
                    self.status
                        .update(|s| s.last_error = Some(ErrorKind::Unauthenticated));
                    return Ok(DrainOutcome::Halted);
                }
            }
        }

        Ok(DrainOutcome::Drained)
    }

    /// Run until aborted: drain, back off on transient failures, wait for a
    /// session when there is none, and wait for new writes when idle.
    pub async fn run(self) {
        let changes = self.store.changes();
        let mut sessions = self.sessions.subscribe();
        let mut failures: u32 = 0;

        loop {
            match self.drain().await {
                Ok(DrainOutcome::Drained) => {
                    failures = 0;
                    match self.download_interval {
                        Some(interval) => {
                            tokio::select! {
                                _ = changes.notified() => {}
                                _ = tokio::time::sleep(interval) => self.periodic_download().await,
                            }
                        }
                        None => changes.notified().await,
                    }
                }
                Ok(DrainOutcome::Retry(failure)) => {
                    failures = failures.saturating_add(1);
                    let kind = failure.disposition().error_kind();
                    self.back_off(failures, &failure.to_string(), kind).await;
                }
                Ok(DrainOutcome::Halted) => {
                    tracing::info!("Upload paused until a session is available");
                    tokio::select! {
                        changed = sessions.recv() => {
                            if matches!(changed, Err(RecvError::Closed)) {
                                return;
                            }
                        }
                        _ = tokio::time::sleep(self.retry.cap) => {}
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let kind = e.kind().unwrap_or(ErrorKind::TransientRemoteFailure);
                    self.back_off(failures, &e.to_string(), kind).await;
                }
            }
        }
    }

    async fn back_off(&self, failures: u32, reason: &str, kind: ErrorKind) {
        let delay = self.retry.delay_for(failures);
        let persistent = self.retry.is_persistent(failures);

        self.status.update(|s| {
            s.last_error = Some(kind);
            s.consecutive_failures = failures;
            s.persistent_failure = persistent;
        });

        let delay_ms = duration_millis(delay);
        if persistent {
            tracing::error!(failures, delay_ms, error = %reason, "Upload failing persistently");
        } else {
            tracing::warn!(failures, delay_ms, error = %reason, "Upload failed, retrying");
        }

        tokio::time::sleep(delay).await;
    }

    async fn periodic_download(&self) {
        let session = match self.sessions.get_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Periodic download skipped");
                return;
            }
        };

        match sync_down(&self.store, self.remote.as_ref(), &session, self.request_timeout).await {
            Ok(_) => self.status.update(|s| s.last_synced_at = Some(now_millis())),
            Err(e) => tracing::warn!(error = %e, "Periodic download failed"),
        }
    }

    async fn send(&self, session: &Session, op: &Operation) -> RemoteResult<()> {
        let remote = self.remote.as_ref();
        let (table, id) = (op.table.as_str(), op.record_id.as_str());

        match &op.kind {
            OperationKind::Put { fields } => {
                with_timeout(self.request_timeout, remote.upsert(session, table, id, fields)).await
            }
            OperationKind::Patch { fields } => {
                let fields = self.merge_patch(session, table, id, fields).await?;
                with_timeout(self.request_timeout, remote.update(session, table, id, &fields))
                    .await
            }
            OperationKind::Delete => {
                with_timeout(self.request_timeout, remote.delete(session, table, id)).await
            }
        }
    }

    /// Shallow-merge designated columns of a patch into the remote row.
    async fn merge_patch(
        &self,
        session: &Session,
        table: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<Fields> {
        let merged_columns: Vec<&String> = fields
            .keys()
            .filter(|column| self.conflicts.resolution(table, column) == Resolution::ShallowMerge)
            .collect();

        if merged_columns.is_empty() {
            return Ok(fields.clone());
        }

        let Some(current) =
            with_timeout(self.request_timeout, self.remote.fetch(session, table, id)).await?
        else {
            return Ok(fields.clone());
        };

        let mut patch = fields.clone();
        for column in merged_columns {
            let remote_value = current.get(column).cloned().unwrap_or(Value::Null);
            let merged = shallow_merge(&remote_value, &fields[column.as_str()]);
            patch.insert(column.clone(), merged);
        }
        Ok(patch)
    }
}
