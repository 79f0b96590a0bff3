//! Service-specific error types

use axum::http::StatusCode;
use thiserror::Error;

/// Errors from the session management endpoints.
///
/// Per-request forwarding failures (timeouts, connection errors, oversized
/// bodies) are turned into JSON error responses by the gateway handler and
/// never propagate as Rust errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("access_token must not be empty")]
    EmptyToken,

    #[error("access_token contains characters not allowed in a header value")]
    InvalidToken,

    #[error("refresh_cookie must look like name=value, got: {0}")]
    InvalidCookie(String),

    #[error("backend api_url is not a valid URL: {0}")]
    InvalidBackendUrl(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::EmptyToken | Error::InvalidToken | Error::InvalidCookie(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::InvalidBackendUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
