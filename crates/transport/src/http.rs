//! reqwest-backed transport
//!
//! Sends an `ApiRequest` with a per-request timeout and buffers the full
//! response. Every status code is returned as a response; only network-level
//! failures become errors.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::{ApiRequest, ApiResponse, Result, Transport, TransportError};

pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Wrap a shared client. The client should carry the cookie jar used for
    /// refresh, so cookies set by the backend flow through both paths.
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Transport for ReqwestTransport {
    fn id(&self) -> &str {
        "reqwest"
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(self.send_inner(request))
    }
}

impl ReqwestTransport {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn send_inner(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(format!("{}s: {e}", self.timeout.as_secs()))
            } else if e.is_builder() {
                TransportError::InvalidRequest(e.to_string())
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        debug!(status = status.as_u16(), bytes = body.len(), "backend responded");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
