//! Lance session credentials
//!
//! Owns the access token lifecycle primitives: the persistent credential
//! store, the refresh endpoint call, and the `TokenRefresher` seam the
//! refresh coordinator drives. This crate knows nothing about retries or
//! single-flight; that policy lives in `lance-client`.
//!
//! Credential flow:
//! 1. Sign-in stores the access token via `CredentialStore::set()`
//! 2. Every outgoing request reads it with `CredentialStore::get()`
//! 3. On a 401 the coordinator calls `TokenRefresher::refresh()`
//! 4. The new token replaces the old one; on failure the store is cleared

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{AccessToken, CredentialStore};
pub use error::{Error, Result};
pub use token::{HttpRefresher, TokenRefresher, TokenResponse, refresh_access_token};
