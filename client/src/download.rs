//! Download: pull every table visible to the session into the local store.

use std::time::Duration;

use tidepool_engine::Session;

use crate::error::{Error, Result};
use crate::remote::{with_timeout, RemoteStore};
use crate::store::LocalStore;

/// Replace the local copy of every schema table with the remote rows.
///
/// Rows with queued local changes keep their local value. Returns the number
/// of rows written.
pub async fn sync_down(
    store: &LocalStore,
    remote: &dyn RemoteStore,
    session: &Session,
    request_timeout: Duration,
) -> Result<usize> {
    let mut written = 0;

    for table in store.schema().tables() {
        let rows = with_timeout(request_timeout, remote.select(session, &table.name))
            .await
            .map_err(Error::Remote)?;
        let count = rows.len();
        written += store.apply_remote_rows(&table.name, rows).await?;

        tracing::debug!(table = %table.name, rows = count, "Downloaded table");
    }

    tracing::info!(identity = %session.identity, rows = written, "Download complete");
    Ok(written)
}
