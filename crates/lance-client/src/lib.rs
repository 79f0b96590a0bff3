//! Authenticated client for the Lance backend API
//!
//! Wraps every outgoing request with the stored bearer token and recovers from
//! expired tokens transparently. When many requests fail with 401 at once, a
//! single refresh call is made and every caller shares its outcome.
//!
//! Request lifecycle:
//! 1. `AuthClient::send` attaches `Authorization: Bearer <token>` from the store
//! 2. Non-401 responses are returned unchanged
//! 3. A 401 on a request not yet retried asks `RefreshCoordinator` for a fresh token
//! 4. The coordinator starts a refresh or joins the one already in flight
//! 5. On success the request is replayed once with the new token
//! 6. On failure the original 401 is returned, the store is cleared, and a
//!    single delayed redirect to the login route is scheduled per episode

pub mod coordinator;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod redirect;

#[cfg(test)]
mod testing;

pub use coordinator::{CoordinatorSettings, RefreshCoordinator, SessionStatus};
pub use error::{Error, Result};
pub use jobs::{JobState, JobStatus, PollOptions, poll_job_status};
pub use pipeline::{AuthClient, PendingRequest};
pub use redirect::{Navigator, SessionNotifier};
