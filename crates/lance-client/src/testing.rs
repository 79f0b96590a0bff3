//! Fakes for the coordinator and pipeline seams

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lance_auth::{AccessToken, TokenRefresher};
use transport::{ApiRequest, ApiResponse, Transport};

use crate::redirect::{Navigator, SessionNotifier};

/// What the fake refresh endpoint does on every call.
pub enum RefreshBehavior {
    Succeed(&'static str),
    Fail,
    /// Rejects the first call, then issues the token
    FailOnce(&'static str),
    Hang,
}

/// Counts refresh calls and answers after `delay`.
pub struct FakeRefresher {
    behavior: RefreshBehavior,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Leaves the in-flight count when the refresh future completes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeRefresher {
    pub fn new(behavior: RefreshBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::from_millis(20),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most refresh calls ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for FakeRefresher {
    fn refresh(
        &self,
    ) -> Pin<Box<dyn Future<Output = lance_auth::Result<AccessToken>> + Send + '_>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            let _in_flight = InFlight(&self.in_flight);

            tokio::time::sleep(self.delay).await;
            let rejected = || {
                Err(lance_auth::Error::RefreshRejected {
                    status: 401,
                    body: "refresh cookie revoked".into(),
                })
            };
            match self.behavior {
                RefreshBehavior::Succeed(token) => Ok(AccessToken::new(token)),
                RefreshBehavior::Fail => rejected(),
                RefreshBehavior::FailOnce(_) if call == 0 => rejected(),
                RefreshBehavior::FailOnce(token) => Ok(AccessToken::new(token)),
                RefreshBehavior::Hang => std::future::pending().await,
            }
        })
    }
}

/// Records every navigation.
#[derive(Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<String> {
        self.routes.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: &str) {
        self.routes.lock().unwrap().push(route.to_string());
    }
}

/// Notifier whose delivery always fails.
#[derive(Default)]
pub struct FailingNotifier {
    pub attempts: AtomicUsize,
}

impl SessionNotifier for FailingNotifier {
    fn session_expired(&self, _reason: &str) -> Result<(), String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err("toast channel closed".into())
    }
}

/// Backend that answers 200 only for the currently valid token and 401
/// otherwise. Records the bearer of every call it sees.
pub struct FakeBackend {
    valid_token: Mutex<String>,
    seen: Mutex<Vec<Option<String>>>,
}

impl FakeBackend {
    pub fn accepting(token: &str) -> Self {
        Self {
            valid_token: Mutex::new(token.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }
}

impl Transport for FakeBackend {
    fn id(&self) -> &str {
        "fake"
    }

    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + 'a>> {
        let bearer = request.bearer().map(str::to_string);
        self.seen.lock().unwrap().push(bearer.clone());
        let valid = bearer.as_deref() == Some(self.valid_token.lock().unwrap().as_str());
        Box::pin(async move {
            if valid {
                Ok(ApiResponse::new(
                    reqwest::StatusCode::OK,
                    format!(r#"{{"url":"{}"}}"#, request.url),
                ))
            } else {
                Ok(ApiResponse::new(
                    reqwest::StatusCode::UNAUTHORIZED,
                    r#"{"error":"token expired"}"#,
                ))
            }
        })
    }
}
