//! Request forwarding
//!
//! Receives inbound requests, strips hop-by-hop headers and any caller
//! credentials, and sends them to the Lance backend through the authenticated
//! pipeline. The pipeline attaches the session token and recovers from one
//! 401 per request. Backend responses, error statuses included, are returned
//! verbatim.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use lance_client::AuthClient;
use tracing::{debug, error, instrument, warn};
use transport::{ApiRequest, is_hop_by_hop};

use crate::metrics;

/// Largest request body the gateway will buffer for replay.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state for the forwarding handler
#[derive(Clone)]
pub struct GatewayState {
    pub client: AuthClient,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

impl GatewayState {
    pub fn new(client: AuthClient) -> Self {
        Self {
            client,
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decrements the in-flight gauge when the request finishes, however it ends.
struct InFlightGuard(Arc<AtomicU64>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// JSON error body: {"error":{"type":"gateway_error","message":"...","request_id":"req_..."}}
pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "gateway_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Headers forwarded to the backend. The session token is the only
/// credential the backend sees, so inbound `authorization` is dropped.
fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if is_hop_by_hop(name.as_str()) || name == header::HOST || name == header::AUTHORIZATION
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Forward one inbound request to the backend.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn forward_request(
    state: &GatewayState,
    request: Request<Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let _in_flight = InFlightGuard::enter(&state.in_flight);

    let method = request.method().clone();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut outbound = ApiRequest::new(method.clone(), state.client.url(&path_and_query));
    outbound.headers = forwardable_headers(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.record_error();
            warn!(error = %e, "failed to read request body");
            return finish(
                error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid request body: {e}"),
                    &request_id,
                ),
                &method,
                started,
            );
        }
    };
    if !body.is_empty() {
        outbound.body = Some(body);
    }

    let response = match state.client.send(outbound).await {
        Ok(backend) => {
            debug!(status = %backend.status, "backend responded");
            let mut response = Response::builder().status(backend.status);
            for (name, value) in &backend.headers {
                if !is_hop_by_hop(name.as_str()) {
                    response = response.header(name, value);
                }
            }
            response.body(Body::from(backend.body)).unwrap_or_else(|e| {
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("response build error: {e}"),
                    &request_id,
                )
            })
        }
        Err(lance_client::Error::Transport(e)) if e.is_timeout() => {
            state.record_error();
            metrics::record_upstream_error("timeout");
            error!(error = %e, "backend timeout");
            error_response(
                StatusCode::GATEWAY_TIMEOUT,
                &format!("backend timeout: {e}"),
                &request_id,
            )
        }
        Err(e) => {
            state.record_error();
            metrics::record_upstream_error("connection");
            error!(error = %e, "backend request failed");
            error_response(
                StatusCode::BAD_GATEWAY,
                &format!("backend error: {e}"),
                &request_id,
            )
        }
    };

    finish(response, &method, started)
}

fn finish(response: Response, method: &axum::http::Method, started: Instant) -> Response {
    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}
