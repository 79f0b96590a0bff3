//! Single-flight token refresh
//!
//! However many requests fail authentication at the same moment, at most one
//! refresh call is outstanding. The first caller starts it; everyone arriving
//! while it runs awaits the same shared result.
//!
//! Phases:
//! - Idle → Refreshing (401 observed, budget remains)
//! - Refreshing → Idle (success: token stored, retry_count reset)
//! - Refreshing → Idle (failure: token cleared, retry_count kept, redirect scheduled)
//! - Idle → Terminal (retry_count reached `max_retries`)
//! - Terminal → Idle (only through `sign_in` / `sign_out`)
//!
//! `sign_in` and `sign_out` abort the in-flight refresh task and any pending
//! redirect, so nothing from the previous session outlives it.
//!
//! The state lock is never held across the refresh call itself, only across
//! the check-and-set that decides whether to start or join one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use lance_auth::{
    AccessToken, CredentialStore, DEFAULT_LOGIN_ROUTE, DEFAULT_REDIRECT_DELAY_MS,
    DEFAULT_REFRESH_TIMEOUT_SECS, MAX_REFRESH_RETRIES, TokenRefresher,
};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::redirect::{Navigator, SessionNotifier};

type SharedRefresh = Shared<BoxFuture<'static, Result<AccessToken>>>;

/// Tunables for the refresh coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Refresh attempts allowed since the last successful refresh.
    pub max_retries: u32,
    /// Pause between the session-expired notice and the navigation.
    pub redirect_delay: Duration,
    /// Upper bound on one refresh call. A hung refresh would otherwise hold
    /// every waiter forever.
    pub refresh_timeout: Duration,
    /// Route handed to the `Navigator` when the session is unrecoverable.
    pub login_route: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_retries: MAX_REFRESH_RETRIES,
            redirect_delay: Duration::from_millis(DEFAULT_REDIRECT_DELAY_MS),
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
        }
    }
}

/// Coarse session state for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No token and no failure in progress
    SignedOut,
    /// A token is stored
    Active,
    /// A refresh call is in flight
    Refreshing,
    /// Refresh failed or the retry budget is spent; re-authentication required
    Expired,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::SignedOut => "signed_out",
            SessionStatus::Active => "active",
            SessionStatus::Refreshing => "refreshing",
            SessionStatus::Expired => "expired",
        }
    }
}

enum Phase {
    Idle,
    Refreshing {
        shared: SharedRefresh,
        task: AbortHandle,
    },
    Terminal,
}

struct RefreshState {
    phase: Phase,
    retry_count: u32,
    redirecting: bool,
    /// Delayed navigation scheduled in the current episode
    redirect: Option<AbortHandle>,
    /// Bumped by sign-in/sign-out so a refresh started in an older session
    /// cannot overwrite the newer one when it lands.
    generation: u64,
}

struct Inner {
    store: Arc<CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    navigator: Arc<dyn Navigator>,
    notifier: Option<Arc<dyn SessionNotifier>>,
    settings: CoordinatorSettings,
    state: Mutex<RefreshState>,
}

/// Owns the refresh state for one client session. Cheap to clone; clones
/// share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        navigator: Arc<dyn Navigator>,
        notifier: Option<Arc<dyn SessionNotifier>>,
        settings: CoordinatorSettings,
    ) -> Self {
        info!(
            max_retries = settings.max_retries,
            refresh_timeout_secs = settings.refresh_timeout.as_secs(),
            login_route = %settings.login_route,
            "refresh coordinator initialized"
        );
        Self {
            inner: Arc::new(Inner {
                store,
                refresher,
                navigator,
                notifier,
                settings,
                state: Mutex::new(RefreshState {
                    phase: Phase::Idle,
                    retry_count: 0,
                    redirecting: false,
                    redirect: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Return a fresh access token, refreshing at most once across all
    /// concurrent callers.
    ///
    /// Joins an in-flight refresh if there is one. Otherwise fails with
    /// `RetryBudgetExceeded` (clearing the store and scheduling the redirect)
    /// once `max_retries` refreshes have failed, or starts a new refresh.
    #[instrument(skip_all)]
    pub async fn ensure_fresh_token(&self) -> Result<AccessToken> {
        let pending = {
            let mut state = self.inner.state.lock().await;
            if let Phase::Refreshing { shared, .. } = &state.phase {
                debug!("joining in-flight refresh");
                shared.clone()
            } else if matches!(state.phase, Phase::Terminal)
                || state.retry_count >= self.inner.settings.max_retries
            {
                warn!(
                    retry_count = state.retry_count,
                    max_retries = self.inner.settings.max_retries,
                    "refresh retry budget exceeded"
                );
                self.inner.store.clear();
                state.retry_count = 0;
                state.phase = Phase::Terminal;
                metrics::counter!("lance_token_refresh_total", "outcome" => "budget_exceeded")
                    .increment(1);
                self.inner
                    .schedule_redirect(&mut state, "refresh retry budget exceeded");
                return Err(Error::RetryBudgetExceeded);
            } else {
                state.retry_count += 1;
                info!(
                    attempt = state.retry_count,
                    max_retries = self.inner.settings.max_retries,
                    "starting token refresh"
                );
                let task = tokio::spawn(Arc::clone(&self.inner).run_refresh(state.generation));
                let abort = task.abort_handle();
                let shared = async move {
                    task.await.unwrap_or_else(|e| {
                        Err(Error::RefreshFailed(format!("refresh task aborted: {e}")))
                    })
                }
                .boxed()
                .shared();
                state.phase = Phase::Refreshing {
                    shared: shared.clone(),
                    task: abort,
                };
                shared
            }
        };
        pending.await
    }

    /// Start a new session with `token`, ending any failure episode.
    pub async fn sign_in(&self, token: AccessToken) {
        let mut state = self.inner.state.lock().await;
        self.inner.store.set(token);
        state.reset();
        info!("signed in, session reset");
    }

    /// Drop the stored token and reset refresh state.
    pub async fn sign_out(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.store.clear();
        state.reset();
        info!("signed out");
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.inner.state.lock().await;
        match state.phase {
            Phase::Refreshing { .. } => SessionStatus::Refreshing,
            Phase::Terminal => SessionStatus::Expired,
            Phase::Idle if !self.inner.store.is_empty() => SessionStatus::Active,
            Phase::Idle if state.redirecting => SessionStatus::Expired,
            Phase::Idle => SessionStatus::SignedOut,
        }
    }

    /// Refresh attempts since the last success.
    pub async fn retry_count(&self) -> u32 {
        self.inner.state.lock().await.retry_count
    }

    /// Whether a redirect has been scheduled in the current episode.
    pub async fn is_redirecting(&self) -> bool {
        self.inner.state.lock().await.redirecting
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.inner.settings
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }
}

impl RefreshState {
    fn reset(&mut self) {
        if let Phase::Refreshing { task, .. } = &self.phase {
            debug!("aborting refresh from the previous session");
            task.abort();
        }
        self.phase = Phase::Idle;
        self.retry_count = 0;
        self.cancel_redirect();
        self.generation += 1;
    }

    fn cancel_redirect(&mut self) {
        if let Some(redirect) = self.redirect.take() {
            redirect.abort();
        }
        self.redirecting = false;
    }
}

impl Inner {
    /// Perform one refresh call and publish its outcome.
    async fn run_refresh(self: Arc<Self>, generation: u64) -> Result<AccessToken> {
        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.settings.refresh_timeout, self.refresher.refresh())
                .await
            {
                Ok(Ok(token)) => Ok(token),
                Ok(Err(e)) => Err(Error::RefreshFailed(e.to_string())),
                Err(_) => Err(Error::RefreshFailed(format!(
                    "timed out after {}ms",
                    self.settings.refresh_timeout.as_millis()
                ))),
            };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("session changed during refresh, discarding result");
            return outcome;
        }
        state.phase = Phase::Idle;

        match &outcome {
            Ok(token) => {
                self.store.set(token.clone());
                state.retry_count = 0;
                state.cancel_redirect();
                metrics::counter!("lance_token_refresh_total", "outcome" => "success")
                    .increment(1);
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "token refresh succeeded"
                );
            }
            Err(e) => {
                self.store.clear();
                metrics::counter!("lance_token_refresh_total", "outcome" => "failure")
                    .increment(1);
                warn!(
                    error = %e,
                    retry_count = state.retry_count,
                    max_retries = self.settings.max_retries,
                    "token refresh failed, credentials cleared"
                );
                self.schedule_redirect(&mut state, "token refresh failed");
            }
        }
        outcome
    }

    /// Notify, then navigate to the login route after `redirect_delay`.
    /// Fires at most once per episode.
    fn schedule_redirect(&self, state: &mut RefreshState, reason: &str) {
        if state.redirecting {
            debug!(reason, "redirect already scheduled");
            return;
        }
        state.redirecting = true;
        metrics::counter!("lance_session_redirects_total").increment(1);

        if let Some(notifier) = &self.notifier
            && let Err(e) = notifier.session_expired(reason)
        {
            warn!(error = %e, "session-expired notice not delivered");
        }

        let navigator = Arc::clone(&self.navigator);
        let route = self.settings.login_route.clone();
        let delay = self.settings.redirect_delay;
        info!(reason, route = %route, delay_ms = delay.as_millis() as u64, "redirect scheduled");
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            navigator.navigate(&route);
        });
        state.redirect = Some(task.abort_handle());
    }
}
