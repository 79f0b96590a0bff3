//! Lance API Gateway
//!
//! Single-binary Rust service that:
//! 1. Holds the Lance session (access token plus refresh cookie)
//! 2. Listens for local requests
//! 3. Attaches the session token and forwards them to the Lance backend
//! 4. Refreshes the token once per expiry, however many requests hit it
//! 5. Reports "re-authentication required" on /health when the session is gone

mod admin;
mod config;
mod error;
mod gateway;
mod metrics;
mod session;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use lance_auth::{AccessToken, CredentialStore, HttpRefresher};
use lance_client::{AuthClient, CoordinatorSettings, RefreshCoordinator, SessionStatus};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::cookie::Jar;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::ReqwestTransport;

use crate::admin::AdminState;
use crate::config::{BackendConfig, Config};
use crate::gateway::GatewayState;
use crate::session::{GatewayNavigator, LogNotifier};

/// How long in-flight requests may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    gateway: GatewayState,
    navigator: Arc<GatewayNavigator>,
    /// Configured login URL, reported while no navigation has happened yet
    login_url: String,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

impl AppState {
    fn coordinator(&self) -> &RefreshCoordinator {
        self.gateway.client.coordinator()
    }
}

/// Wire the store, refresher, coordinator and pipeline together.
///
/// One cookie jar is shared by the refresh call and the session API, so a
/// refresh cookie posted to `/session` is sent on the next refresh.
fn assemble(
    backend: &BackendConfig,
    settings: CoordinatorSettings,
    timeout: Duration,
    store: Arc<CredentialStore>,
    prometheus: PrometheusHandle,
) -> Result<(AppState, AdminState)> {
    let cookies = Arc::new(Jar::default());
    let http = reqwest::Client::builder()
        .cookie_provider(Arc::clone(&cookies))
        .build()
        .context("failed to build HTTP client")?;

    let login_url = format!(
        "{}{}",
        backend.app_url.trim_end_matches('/'),
        settings.login_route
    );
    let refresher = Arc::new(HttpRefresher::new(
        http.clone(),
        &backend.api_url,
        &backend.refresh_path,
    ));
    let navigator = Arc::new(GatewayNavigator::new(backend.app_url.clone()));
    let coordinator = RefreshCoordinator::new(
        store,
        refresher,
        navigator.clone(),
        Some(Arc::new(LogNotifier)),
        settings,
    );

    let transport = Arc::new(ReqwestTransport::new(http, timeout));
    let client = AuthClient::new(backend.api_url.clone(), transport, coordinator.clone());

    let admin = AdminState::new(coordinator, navigator.clone(), cookies, &backend.api_url)
        .context("invalid backend configuration")?;

    let app = AppState {
        gateway: GatewayState::new(client),
        navigator,
        login_url,
        started_at: Instant::now(),
        prometheus,
    };
    Ok((app, admin))
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit covers every route, session endpoints included.
fn build_router(state: AppState, admin: AdminState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(gateway_handler)
        .with_state(state)
        .merge(admin::build_admin_router(admin))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL or RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting lance-gateway");

    // Recorder must exist before the coordinator emits its first counter
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.gateway.listen_addr,
        api_url = %config.backend.api_url,
        login_url = %config.login_url(),
        persisted = config.session.credentials_path.is_some(),
        "configuration loaded"
    );

    let store = match &config.session.credentials_path {
        Some(path) => CredentialStore::load(path.clone())
            .with_context(|| format!("failed to load credentials from {}", path.display()))?,
        None => CredentialStore::in_memory(),
    };
    if let Some(seed) = &config.session.seed_token {
        store.set(AccessToken::new(seed.expose().as_str()));
        info!("access token seeded from LANCE_ACCESS_TOKEN");
    }

    let (app_state, admin_state) = assemble(
        &config.backend,
        config.coordinator_settings(),
        Duration::from_secs(config.gateway.timeout_secs),
        Arc::new(store),
        prometheus_handle,
    )?;
    let in_flight = app_state.gateway.in_flight.clone();

    let app = build_router(app_state, admin_state, config.gateway.max_connections);

    let listen_addr = config.gateway.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                remaining = in_flight.load(Ordering::Relaxed),
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: session state, uptime and request counters.
/// Returns 200 while the session is usable, 503 when it is signed out or expired.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.coordinator().status().await;
    let retry_count = state.coordinator().retry_count().await;
    let usable = matches!(session, SessionStatus::Active | SessionStatus::Refreshing);

    let mut body = serde_json::json!({
        "status": if usable { "healthy" } else { "degraded" },
        "session": session.label(),
        "retry_count": retry_count,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.gateway.requests_total.load(Ordering::Relaxed),
        "errors_total": state.gateway.errors_total.load(Ordering::Relaxed),
    });
    if !usable {
        body["login_url"] = serde_json::Value::String(
            state
                .navigator
                .login_url()
                .unwrap_or_else(|| state.login_url.clone()),
        );
    }

    let status_code = if usable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status_code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that forwards every other request to the backend.
async fn gateway_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    gateway::forward_request(&state.gateway, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
