//! Gateway-side handling of unrecoverable sessions
//!
//! There is no browser to navigate, so "redirect to login" means flipping the
//! gateway into a re-authentication-required state that `/health` reports,
//! together with the login URL an operator should open.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use lance_client::{Navigator, SessionNotifier};
use tracing::warn;

/// Records that the session must be re-established through the web app.
pub struct GatewayNavigator {
    app_url: String,
    reauth_required: AtomicBool,
    login_url: Mutex<Option<String>>,
}

impl GatewayNavigator {
    pub fn new(app_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
            reauth_required: AtomicBool::new(false),
            login_url: Mutex::new(None),
        }
    }

    pub fn reauth_required(&self) -> bool {
        self.reauth_required.load(Ordering::SeqCst)
    }

    /// Login URL from the most recent navigation, if re-authentication is pending.
    pub fn login_url(&self) -> Option<String> {
        if !self.reauth_required() {
            return None;
        }
        self.login_url
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Called after a successful sign-in or an explicit sign-out.
    pub fn reset(&self) {
        self.reauth_required.store(false, Ordering::SeqCst);
        *self.login_url.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl Navigator for GatewayNavigator {
    fn navigate(&self, route: &str) {
        let url = format!("{}{}", self.app_url.trim_end_matches('/'), route);
        warn!(login_url = %url, "session expired, re-authentication required");
        *self.login_url.lock().unwrap_or_else(|e| e.into_inner()) = Some(url);
        self.reauth_required.store(true, Ordering::SeqCst);
    }
}

/// Logs the session-expired notice. The gateway has no UI to show it in.
pub struct LogNotifier;

impl SessionNotifier for LogNotifier {
    fn session_expired(&self, reason: &str) -> Result<(), String> {
        warn!(reason, "Session expired, please sign in again");
        Ok(())
    }
}
