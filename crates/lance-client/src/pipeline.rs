//! Authenticated request pipeline
//!
//! A decorator around `Transport`: attach the stored bearer token, send, and
//! on a 401 ask the coordinator for a fresh token and replay the request once.
//! When the store already holds a newer token than the one the request
//! carried, the replay uses it without starting another refresh.
//! The retry-once flag lives on the request itself (`PendingRequest`), never
//! on shared state.

use std::sync::Arc;

use lance_auth::CredentialStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};

/// A request plus whether it has already been replayed after a refresh.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    request: ApiRequest,
    retried: bool,
}

impl PendingRequest {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    /// A request that has already used its single retry. A 401 on it is
    /// passed straight through.
    pub fn already_retried(request: ApiRequest) -> Self {
        Self {
            request,
            retried: true,
        }
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }
}

/// HTTP client for the Lance backend with transparent token refresh.
#[derive(Clone)]
pub struct AuthClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl AuthClient {
    /// The pipeline reads tokens from the coordinator's store, so both always
    /// agree on the current credential.
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            store: Arc::clone(coordinator.store()),
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve `path` against the base URL. Absolute URLs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send a request that has not been retried yet.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.dispatch(PendingRequest::new(request)).await
    }

    /// Send `pending`, recovering from one 401 via the refresh coordinator.
    ///
    /// Returns the backend response. A 401 that could not be recovered comes
    /// back unchanged; only transport failures are errors.
    #[instrument(skip_all, fields(method = %pending.request.method, url = %pending.request.url))]
    pub async fn dispatch(&self, mut pending: PendingRequest) -> Result<ApiResponse> {
        if let Some(token) = self.store.get() {
            pending.request.set_bearer(token.expose())?;
        }

        let response = self.transport.send(&pending.request).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if pending.retried {
            debug!("401 on an already-retried request, passing through");
            return Ok(response);
        }
        pending.retried = true;

        // A refresh or sign-in may have landed while this request was in flight
        let sent = pending.request.bearer().map(str::to_owned);
        let fresh = match self.store.get() {
            Some(current) if sent.as_deref() != Some(current.expose()) => {
                debug!("token rotated while request was in flight");
                Ok(current)
            }
            _ => self.coordinator.ensure_fresh_token().await,
        };

        match fresh {
            Ok(token) => {
                pending.request.set_bearer(token.expose())?;
                debug!("replaying request with refreshed token");
                Ok(self.transport.send(&pending.request).await?)
            }
            Err(e) => {
                debug!(error = %e, "token not recoverable, returning original 401");
                Ok(response)
            }
        }
    }

    /// `GET path` and decode a JSON body, mapping non-2xx to errors.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(ApiRequest::get(self.url(path))).await?;
        decode(expect_success(response)?)
    }

    /// `POST path` with a JSON body and decode the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = ApiRequest::post(self.url(path)).json(body)?;
        let response = self.send(request).await?;
        decode(expect_success(response)?)
    }
}

/// Map a non-2xx response to an error. A 401 here means recovery already failed.
pub fn expect_success(response: ApiResponse) -> Result<ApiResponse> {
    if response.is_success() {
        return Ok(response);
    }
    if response.is_unauthorized() {
        return Err(Error::AuthenticationFailure);
    }
    Err(Error::Status {
        status: response.status.as_u16(),
        body: response.text(),
    })
}

fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<T> {
    response
        .json()
        .map_err(|e| Error::Decode(format!("{e}")))
}
