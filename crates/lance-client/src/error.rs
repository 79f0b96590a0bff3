//! Error types for the authenticated client

use transport::TransportError;

/// Errors surfaced to callers of the authenticated client.
///
/// `Clone` because a refresh outcome is shared by every request waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("authentication failed: backend returned 401")]
    AuthenticationFailure,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("token refresh retry budget exceeded, sign in again")]
    RetryBudgetExceeded,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("job {id} failed: {message}")]
    JobFailed { id: String, message: String },

    #[error("job {id} did not finish after {attempts} polls")]
    PollTimeout { id: String, attempts: u32 },
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
