//! Side channels used when the session cannot be recovered
//!
//! The coordinator decides *when* to send the user back to sign in; the host
//! application decides *how*. A browser shell navigates, the gateway flips its
//! health state, a CLI prints a login hint.

/// Performs the client-side navigation to the login entry point.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// Surfaces a user-visible "session expired" notice before the redirect.
///
/// Errors are logged by the caller and never block the redirect.
pub trait SessionNotifier: Send + Sync {
    fn session_expired(&self, reason: &str) -> Result<(), String>;
}
