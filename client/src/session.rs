//! Session provider: the identity the user is signed in as, plus a
//! short-lived sync token refreshed on demand.
//!
//! Changes are broadcast so the connection manager can reconnect when the
//! token rotates or the identity changes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tidepool_engine::{Identity, Session, Timestamp};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::db::{duration_millis, now_millis};
use crate::error::{Error, Result};

/// A freshly issued sync token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Timestamp,
}

/// Source of identities and sync tokens.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The identity currently signed in, if any.
    async fn current_identity(&self) -> Result<Option<Identity>>;

    /// Issue a new token for `identity`.
    async fn refresh_token(&self, identity: &str) -> Result<Credential>;
}

struct Inner {
    backend: Arc<dyn AuthBackend>,
    cached: RwLock<Option<Session>>,
    refresh_lock: Mutex<()>,
    changes: broadcast::Sender<Session>,
    refresh_margin: Duration,
}

/// Shared session cache. Cheap to clone.
#[derive(Clone)]
pub struct SessionProvider {
    inner: Arc<Inner>,
}

impl SessionProvider {
    pub fn new(backend: Arc<dyn AuthBackend>, refresh_margin: Duration) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                backend,
                cached: RwLock::new(None),
                refresh_lock: Mutex::new(()),
                changes,
                refresh_margin,
            }),
        }
    }

    /// A valid session, refreshing the token if it is close to expiry.
    ///
    /// Returns `None` when nobody is signed in.
    pub async fn get_session(&self) -> Result<Option<Session>> {
        let identity = match self.inner.backend.current_identity().await? {
            Some(identity) => identity,
            None => {
                self.invalidate().await;
                return Ok(None);
            }
        };

        if let Some(session) = self.fresh_cached(&identity).await {
            return Ok(Some(session));
        }

        match self.refresh().await {
            Ok(session) => Ok(Some(session)),
            Err(Error::Unauthenticated) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Issue a new token for the current identity unless a fresh one is
    /// already cached. Call [`invalidate`](Self::invalidate) first to force one.
    ///
    /// Concurrent callers share one refresh: whoever waits on the lock reuses
    /// the session the first caller produced.
    pub async fn refresh(&self) -> Result<Session> {
        let _guard = self.inner.refresh_lock.lock().await;

        let identity = self
            .inner
            .backend
            .current_identity()
            .await?
            .ok_or(Error::Unauthenticated)?;

        if let Some(session) = self.fresh_cached(&identity).await {
            return Ok(session);
        }

        let credential = self.inner.backend.refresh_token(&identity).await?;
        let session = Session::new(identity, credential.token, credential.expires_at);

        let previous = self.inner.cached.write().await.replace(session.clone());
        let rotated = previous.as_ref().map(|s| &s.token) != Some(&session.token);

        if rotated {
            tracing::info!(
                identity = %session.identity,
                expires_at = session.expires_at,
                "Session refreshed"
            );
            // No subscribers is fine.
            let _ = self.inner.changes.send(session.clone());
        }

        Ok(session)
    }

    /// Drop the cached session, e.g. after the remote rejected its token.
    pub async fn invalidate(&self) {
        if self.inner.cached.write().await.take().is_some() {
            tracing::debug!("Cached session invalidated");
        }
    }

    /// Sessions produced by future refreshes.
    pub fn subscribe(&self) -> broadcast::Receiver<Session> {
        self.inner.changes.subscribe()
    }

    async fn fresh_cached(&self, identity: &str) -> Option<Session> {
        let margin = duration_millis(self.inner.refresh_margin);
        self.inner
            .cached
            .read()
            .await
            .as_ref()
            .filter(|s| s.identity == identity && s.is_fresh_at(now_millis(), margin))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct CountingAuth {
        identity: StdMutex<Option<String>>,
        issued: AtomicUsize,
        ttl_ms: u64,
    }

    #[async_trait]
    impl AuthBackend for CountingAuth {
        async fn current_identity(&self) -> Result<Option<Identity>> {
            Ok(self.identity.lock().unwrap().clone())
        }

        async fn refresh_token(&self, identity: &str) -> Result<Credential> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential {
                token: format!("{}-token-{}", identity, n),
                expires_at: now_millis() + self.ttl_ms,
            })
        }
    }

    fn provider(ttl_ms: u64) -> (Arc<CountingAuth>, SessionProvider) {
        let auth = Arc::new(CountingAuth {
            identity: StdMutex::new(Some("alice".into())),
            issued: AtomicUsize::new(0),
            ttl_ms,
        });
        let provider = SessionProvider::new(auth.clone(), Duration::from_millis(100));
        (auth, provider)
    }

    #[tokio::test]
    async fn caches_fresh_sessions() {
        let (auth, provider) = provider(60_000);

        let first = provider.get_session().await.unwrap().unwrap();
        let second = provider.get_session().await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(auth.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_sessions_are_replaced() {
        let (auth, provider) = provider(50);

        let first = provider.get_session().await.unwrap().unwrap();
        let second = provider.get_session().await.unwrap().unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(auth.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn signed_out_means_no_session() {
        let (auth, provider) = provider(60_000);
        provider.get_session().await.unwrap().unwrap();

        *auth.identity.lock().unwrap() = None;
        assert!(provider.get_session().await.unwrap().is_none());
        assert!(matches!(provider.refresh().await, Err(Error::Unauthenticated)));
    }

    #[tokio::test]
    async fn rotation_is_broadcast() {
        let (_auth, provider) = provider(60_000);
        let mut changes = provider.subscribe();

        let session = provider.refresh().await.unwrap();
        assert_eq!(changes.recv().await.unwrap(), session);

        provider.invalidate().await;
        let rotated = provider.refresh().await.unwrap();
        assert_ne!(rotated.token, session.token);
        assert_eq!(changes.recv().await.unwrap(), rotated);
    }

    #[tokio::test]
    async fn concurrent_refreshes_collapse() {
        let (auth, provider) = provider(60_000);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.refresh().await.unwrap() })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(auth.issued.load(Ordering::SeqCst), 1);
    }
}
