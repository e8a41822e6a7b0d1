//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tidepool_client::{
    AuthBackend, ClientConfig, Credential, Error, RemoteResult, RemoteStore, Result,
};
use tidepool_engine::{
    build_schema, define_table, Column, Fields, Identity, Record, RemoteFailure, RetryPolicy,
    Schema, Session,
};

pub fn test_schema() -> Schema {
    build_schema(vec![
        define_table(
            "patients",
            vec![
                Column::text("name"),
                Column::integer("age"),
                Column::text("meta"),
            ],
        )
        .unwrap(),
        define_table("notes", vec![Column::text("body")]).unwrap(),
    ])
    .unwrap()
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        database_url: "sqlite::memory:".to_string(),
        retry: RetryPolicy {
            base: Duration::from_millis(5),
            cap: Duration::from_millis(20),
            persistent_failure_after: 3,
        },
        request_timeout: Duration::from_secs(2),
        download_interval: None,
        ..Default::default()
    }
}

/// A database file unique to one test.
pub fn temp_database_url() -> String {
    let path = std::env::temp_dir().join(format!("tidepool-{}.db", uuid::Uuid::new_v4()));
    format!("sqlite://{}", path.display())
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub table: String,
    pub id: String,
    pub token: String,
}

/// In-memory remote with scripted failures.
///
/// Failures queued with [`MockRemote::fail_next`] are returned by write calls
/// (upsert, update, delete) in order before any write succeeds.
/// [`MockRemote::fail_writes_to`] targets one record id, and
/// [`MockRemote::lose_acks`] fails writes after they were applied.
#[derive(Default)]
pub struct MockRemote {
    rows: Mutex<HashMap<String, BTreeMap<String, Fields>>>,
    failures: Mutex<VecDeque<RemoteFailure>>,
    failures_by_id: Mutex<HashMap<String, VecDeque<RemoteFailure>>>,
    lost_acks: Mutex<VecDeque<RemoteFailure>>,
    calls: Mutex<Vec<Call>>,
    selects: AtomicUsize,
    select_delay: Mutex<Option<Duration>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, times: usize, failure: RemoteFailure) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..times {
            failures.push_back(failure.clone());
        }
    }

    pub fn fail_writes_to(&self, id: &str, times: usize, failure: RemoteFailure) {
        let mut failures = self.failures_by_id.lock().unwrap();
        let queue = failures.entry(id.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(failure.clone());
        }
    }

    /// The next `times` writes are applied but reported as failed.
    pub fn lose_acks(&self, times: usize, failure: RemoteFailure) {
        let mut lost = self.lost_acks.lock().unwrap();
        for _ in 0..times {
            lost.push_back(failure.clone());
        }
    }

    pub fn set_select_delay(&self, delay: Duration) {
        *self.select_delay.lock().unwrap() = Some(delay);
    }

    pub fn seed(&self, table: &str, id: &str, fields: Fields) {
        self.rows
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Fields> {
        self.rows
            .lock()
            .unwrap()
            .get(table)
            .and_then(|rows| rows.get(id).cloned())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Ids of write calls in the order they were made.
    pub fn write_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != "select" && c.method != "fetch")
            .map(|c| c.id)
            .collect()
    }

    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    fn record(&self, method: &'static str, session: &Session, table: &str, id: &str) {
        self.calls.lock().unwrap().push(Call {
            method,
            table: table.to_string(),
            id: id.to_string(),
            token: session.token.clone(),
        });
    }

    fn scripted_failure(&self, id: &str) -> RemoteResult<()> {
        let targeted = self
            .failures_by_id
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front);
        match targeted.or_else(|| self.failures.lock().unwrap().pop_front()) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn acknowledge(&self) -> RemoteResult<()> {
        match self.lost_acks.lock().unwrap().pop_front() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn not_found(table: &str, id: &str) -> RemoteFailure {
        RemoteFailure::http(
            404,
            Some("PGRST116".to_string()),
            format!("{}/{} not found", table, id),
        )
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn upsert(
        &self,
        session: &Session,
        table: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<()> {
        self.record("upsert", session, table, id);
        self.scripted_failure(id)?;
        self.seed(table, id, fields.clone());
        self.acknowledge()
    }

    async fn update(
        &self,
        session: &Session,
        table: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<()> {
        self.record("update", session, table, id);
        self.scripted_failure(id)?;

        {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(table)
                .and_then(|rows| rows.get_mut(id))
                .ok_or_else(|| Self::not_found(table, id))?;
            for (column, value) in fields {
                row.insert(column.clone(), value.clone());
            }
        }
        self.acknowledge()
    }

    async fn delete(&self, session: &Session, table: &str, id: &str) -> RemoteResult<()> {
        self.record("delete", session, table, id);
        self.scripted_failure(id)?;

        self.rows
            .lock()
            .unwrap()
            .get_mut(table)
            .and_then(|rows| rows.remove(id))
            .ok_or_else(|| Self::not_found(table, id))?;
        self.acknowledge()
    }

    async fn select(&self, session: &Session, table: &str) -> RemoteResult<Vec<Record>> {
        self.record("select", session, table, "");
        self.selects.fetch_add(1, Ordering::SeqCst);

        let delay = *self.select_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(id, fields)| Record::new(table, id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch(
        &self,
        session: &Session,
        table: &str,
        id: &str,
    ) -> RemoteResult<Option<Record>> {
        self.record("fetch", session, table, id);
        Ok(self
            .row(table, id)
            .map(|fields| Record::new(table, id, fields)))
    }
}

/// Auth backend issuing `tok-1`, `tok-2`, ... for whoever is signed in.
pub struct MockAuth {
    identity: Mutex<Option<Identity>>,
    issued: AtomicUsize,
    ttl: Duration,
}

impl MockAuth {
    pub fn signed_in(identity: &str) -> Self {
        Self {
            identity: Mutex::new(Some(identity.to_string())),
            issued: AtomicUsize::new(0),
            ttl: Duration::from_secs(3600),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            identity: Mutex::new(None),
            issued: AtomicUsize::new(0),
            ttl: Duration::from_secs(3600),
        }
    }

    pub fn set_identity(&self, identity: Option<&str>) {
        *self.identity.lock().unwrap() = identity.map(str::to_string);
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBackend for MockAuth {
    async fn current_identity(&self) -> Result<Option<Identity>> {
        Ok(self.identity.lock().unwrap().clone())
    }

    async fn refresh_token(&self, identity: &str) -> Result<Credential> {
        if self.identity.lock().unwrap().as_deref() != Some(identity) {
            return Err(Error::Unauthenticated);
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let now = chrono::Utc::now().timestamp_millis() as u64;
        Ok(Credential {
            token: format!("tok-{}", n),
            expires_at: now + self.ttl.as_millis() as u64,
        })
    }
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
