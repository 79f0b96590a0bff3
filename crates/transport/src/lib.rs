//! Transport abstraction for calls to the Lance backend
//!
//! Defines the owned request/response types that flow through the
//! authenticated pipeline, and the `Transport` trait that actually puts them
//! on the wire. `ReqwestTransport` is the production implementation; tests
//! substitute scripted transports to drive the pipeline deterministically.

pub mod http;
pub mod request;

pub use http::ReqwestTransport;
pub use request::{ApiRequest, ApiResponse, is_hop_by_hop};

use std::future::Future;
use std::pin::Pin;

/// Errors from dispatching a request. A response with any status code,
/// including 401, is not an error at this layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Sends a fully formed request and returns the buffered response.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "reqwest")
    fn id(&self) -> &str;

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;
}
