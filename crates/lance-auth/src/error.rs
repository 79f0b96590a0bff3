//! Error types for credential and refresh operations

/// Errors from credential storage and the refresh endpoint.
///
/// `Clone` so a single refresh outcome can be fanned out to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("refresh rejected ({status}): {body}")]
    RefreshRejected { status: u16, body: String },

    #[error("refresh failed ({status}): {body}")]
    RefreshFailed { status: u16, body: String },

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
