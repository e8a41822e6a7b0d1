//! HTTP transport for `tidepool-server`.

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tidepool_engine::{Fields, Identity, Record, RemoteFailure, Session, WireRow};

use super::{RemoteResult, RemoteStore};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::{AuthBackend, Credential};

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: String,
}

fn http_client(config: &ClientConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| Error::Config(format!("HTTP client: {}", e)))
}

fn transport_failure(err: reqwest::Error) -> RemoteFailure {
    if err.is_timeout() {
        RemoteFailure::timeout()
    } else {
        RemoteFailure::network(err.to_string())
    }
}

/// Turn a non-success response into a [`RemoteFailure`].
async fn check(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let failure = match response.json::<ErrorBody>().await {
        Ok(body) => RemoteFailure::http(status.as_u16(), body.code, body.message),
        Err(_) => RemoteFailure::http(
            status.as_u16(),
            None,
            status.canonical_reason().unwrap_or("request failed"),
        ),
    };
    Err(failure)
}

/// [`RemoteStore`] backed by the row endpoints of `tidepool-server`.
pub struct HttpRemote {
    client: Client,
    endpoint: String,
}

impl HttpRemote {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, session: &Session, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.endpoint, path))
            .bearer_auth(&session.token)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request.send().await.map_err(transport_failure)?;
        check(response).await
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn upsert(
        &self,
        session: &Session,
        table: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<()> {
        let path = format!("/rows/{}/{}", table, id);
        self.send(self.request(Method::PUT, session, &path).json(fields))
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        session: &Session,
        table: &str,
        id: &str,
        fields: &Fields,
    ) -> RemoteResult<()> {
        let path = format!("/rows/{}/{}", table, id);
        self.send(self.request(Method::PATCH, session, &path).json(fields))
            .await?;
        Ok(())
    }

    async fn delete(&self, session: &Session, table: &str, id: &str) -> RemoteResult<()> {
        let path = format!("/rows/{}/{}", table, id);
        self.send(self.request(Method::DELETE, session, &path))
            .await?;
        Ok(())
    }

    async fn select(&self, session: &Session, table: &str) -> RemoteResult<Vec<Record>> {
        let path = format!("/rows/{}", table);
        let rows: Vec<WireRow> = self
            .send(self.request(Method::GET, session, &path))
            .await?
            .json()
            .await
            .map_err(transport_failure)?;

        Ok(rows
            .into_iter()
            .map(|row| Record::from_wire(table, row))
            .collect())
    }

    async fn fetch(
        &self,
        session: &Session,
        table: &str,
        id: &str,
    ) -> RemoteResult<Option<Record>> {
        let path = format!("/rows/{}/{}", table, id);
        let response = self
            .request(Method::GET, session, &path)
            .send()
            .await
            .map_err(transport_failure)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let row: WireRow = check(response)
            .await?
            .json()
            .await
            .map_err(transport_failure)?;
        Ok(Some(Record::from_wire(table, row)))
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    identity: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: String,
    expires_at: u64,
}

/// Password-style sign-in against `POST /auth/token`.
///
/// The signed-in identity and its secret live in memory only; tokens are
/// issued per refresh.
pub struct HttpAuthBackend {
    client: Client,
    endpoint: String,
    credentials: RwLock<Option<(Identity, String)>>,
}

impl HttpAuthBackend {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            credentials: RwLock::new(None),
        })
    }

    pub fn sign_in(&self, identity: impl Into<Identity>, secret: impl Into<String>) {
        let identity = identity.into();
        tracing::info!(identity = %identity, "Signed in");
        if let Ok(mut credentials) = self.credentials.write() {
            *credentials = Some((identity, secret.into()));
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut credentials) = self.credentials.write() {
            if credentials.take().is_some() {
                tracing::info!("Signed out");
            }
        }
    }

    fn credentials(&self) -> Option<(Identity, String)> {
        self.credentials.read().ok().and_then(|c| c.clone())
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn current_identity(&self) -> Result<Option<Identity>> {
        Ok(self.credentials().map(|(identity, _)| identity))
    }

    async fn refresh_token(&self, identity: &str) -> Result<Credential> {
        let (signed_in, secret) = self.credentials().ok_or(Error::Unauthenticated)?;
        if signed_in != identity {
            return Err(Error::Unauthenticated);
        }

        let response = self
            .client
            .post(format!("{}/auth/token", self.endpoint))
            .json(&TokenRequest {
                identity,
                secret: &secret,
            })
            .send()
            .await
            .map_err(|e| Error::Remote(transport_failure(e)))?;

        let response = check(response).await.map_err(|failure| {
            if failure.is_unauthorized() {
                Error::Unauthenticated
            } else {
                Error::Remote(failure)
            }
        })?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;

        Ok(Credential {
            token: body.token,
            expires_at: body.expires_at,
        })
    }
}
