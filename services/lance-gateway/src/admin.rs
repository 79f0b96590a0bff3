//! Session management API
//!
//! Endpoints:
//! - POST   /session: sign in with an access token and optional refresh cookie
//! - DELETE /session: sign out and forget the token
//! - GET    /session: current session status
//!
//! Tokens are accepted but never echoed back.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use lance_auth::AccessToken;
use lance_client::RefreshCoordinator;
use reqwest::Url;
use reqwest::cookie::Jar;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::session::GatewayNavigator;

/// Shared state for session handlers.
#[derive(Clone)]
pub struct AdminState {
    coordinator: RefreshCoordinator,
    navigator: Arc<GatewayNavigator>,
    cookies: Arc<Jar>,
    api_url: Url,
}

impl AdminState {
    pub fn new(
        coordinator: RefreshCoordinator,
        navigator: Arc<GatewayNavigator>,
        cookies: Arc<Jar>,
        api_url: &str,
    ) -> Result<Self> {
        let api_url = Url::parse(api_url).map_err(|e| Error::InvalidBackendUrl(e.to_string()))?;
        Ok(Self {
            coordinator,
            navigator,
            cookies,
            api_url,
        })
    }
}

/// Build the session router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/session",
            get(session_status).post(sign_in).delete(sign_out),
        )
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Request body for POST /session.
#[derive(Deserialize)]
struct SignInRequest {
    access_token: String,
    /// `name=value` cookie the backend's refresh endpoint expects
    #[serde(default)]
    refresh_cookie: Option<String>,
}

fn validate_token(raw: &str) -> Result<AccessToken> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(Error::EmptyToken);
    }
    HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| Error::InvalidToken)?;
    Ok(AccessToken::new(token))
}

fn validate_cookie(raw: &str) -> Result<&str> {
    let cookie = raw.trim();
    match cookie.split_once('=') {
        Some((name, _)) if !name.trim().is_empty() => Ok(cookie),
        _ => {
            let name = cookie.split(['=', ';']).next().unwrap_or_default();
            Err(Error::InvalidCookie(name.to_string()))
        }
    }
}

/// POST /session: store the token (and refresh cookie) and start a new episode.
async fn sign_in(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<SignInRequest>,
) -> Response {
    let prepared = validate_token(&body.access_token).and_then(|token| {
        let cookie = body.refresh_cookie.as_deref().map(validate_cookie).transpose()?;
        Ok((token, cookie))
    });

    let (token, cookie) = match prepared {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "rejected sign-in");
            return json_response(e.status(), serde_json::json!({ "error": e.to_string() }));
        }
    };

    if let Some(cookie) = cookie {
        state.cookies.add_cookie_str(cookie, &state.api_url);
    }
    state.coordinator.sign_in(token).await;
    state.navigator.reset();
    info!(refresh_cookie = cookie.is_some(), "session established");

    json_response(
        StatusCode::OK,
        serde_json::json!({ "status": state.coordinator.status().await.label() }),
    )
}

/// DELETE /session: forget the token.
async fn sign_out(State(state): State<AdminState>) -> Response {
    state.coordinator.sign_out().await;
    state.navigator.reset();
    json_response(
        StatusCode::OK,
        serde_json::json!({ "status": state.coordinator.status().await.label() }),
    )
}

/// GET /session: session status without exposing the token.
async fn session_status(State(state): State<AdminState>) -> Response {
    let status = state.coordinator.status().await;
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": status.label(),
            "retry_count": state.coordinator.retry_count().await,
            "max_retries": state.coordinator.settings().max_retries,
            "reauth_required": state.navigator.reauth_required(),
            "login_url": state.navigator.login_url(),
        }),
    )
}
