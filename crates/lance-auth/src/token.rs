//! Access token refresh
//!
//! The refresh credential is an HTTP-only cookie set by the backend at sign-in.
//! This module never reads it: the shared `reqwest::Client` carries it in its
//! cookie jar, and the refresh call is a bare `POST` to the refresh endpoint.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::credentials::AccessToken;
use crate::error::{Error, Result};

/// Successful refresh response body.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
}

/// Obtains a new access token. The coordinator calls this at most once at a
/// time; implementations do not need their own single-flight guard.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn TokenRefresher>`).
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken>> + Send + '_>>;
}

/// Refresh an access token against `endpoint`.
///
/// Any non-2xx status or network failure is a refresh failure. 401/403 means
/// the refresh cookie is missing, expired or revoked.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    endpoint: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::RefreshRejected {
                status: status.as_u16(),
                body,
            });
        }

        return Err(Error::RefreshFailed {
            status: status.as_u16(),
            body,
        });
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("decoding refresh response: {e}")))?;

    if token.access_token.is_empty() {
        return Err(Error::InvalidResponse("empty access_token".into()));
    }
    Ok(token)
}

/// `TokenRefresher` backed by the backend refresh endpoint.
pub struct HttpRefresher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRefresher {
    /// `api_url` and `refresh_path` are joined; a trailing slash on the URL is ignored.
    pub fn new(client: reqwest::Client, api_url: &str, refresh_path: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}{}", api_url.trim_end_matches('/'), refresh_path),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl TokenRefresher for HttpRefresher {
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken>> + Send + '_>> {
        Box::pin(self.refresh_inner())
    }
}

impl HttpRefresher {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn refresh_inner(&self) -> Result<AccessToken> {
        let response = refresh_access_token(&self.client, &self.endpoint).await?;
        debug!("refresh endpoint issued a new access token");
        Ok(AccessToken::new(response.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Mock refresh endpoint: issues `T2` only when the refresh cookie is present.
    async fn start_refresh_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new()
                .route(
                    "/auth/refresh",
                    axum::routing::post(|headers: HeaderMap| async move {
                        let has_cookie = headers
                            .get("cookie")
                            .and_then(|v| v.to_str().ok())
                            .is_some_and(|c| c.contains("lance_refresh=rt_1"));
                        if has_cookie {
                            (StatusCode::OK, r#"{"accessToken":"T2"}"#)
                        } else {
                            (StatusCode::UNAUTHORIZED, r#"{"error":"no refresh cookie"}"#)
                        }
                    }),
                )
                .route(
                    "/broken/refresh",
                    axum::routing::post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
                )
                .route(
                    "/empty/refresh",
                    axum::routing::post(|| async { (StatusCode::OK, r#"{"access_token":""}"#) }),
                );
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_with_cookie(base: &str) -> reqwest::Client {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let url = reqwest::Url::parse(base).unwrap();
        jar.add_cookie_str("lance_refresh=rt_1; HttpOnly; Path=/", &url);
        reqwest::Client::builder()
            .cookie_provider(jar)
            .build()
            .unwrap()
    }

    #[test]
    fn token_response_accepts_both_field_spellings() {
        let snake: TokenResponse = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        let camel: TokenResponse = serde_json::from_str(r#"{"accessToken":"b"}"#).unwrap();
        assert_eq!(snake.access_token, "a");
        assert_eq!(camel.access_token, "b");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let refresher = HttpRefresher::new(
            reqwest::Client::new(),
            "https://api.lance.test/",
            "/auth/refresh",
        );
        assert_eq!(refresher.endpoint(), "https://api.lance.test/auth/refresh");
    }

    #[tokio::test]
    async fn refresh_sends_cookie_and_returns_token() {
        let base = start_refresh_server().await;
        let refresher = HttpRefresher::new(client_with_cookie(&base), &base, "/auth/refresh");

        let token = refresher.refresh().await.unwrap();
        assert_eq!(token.expose(), "T2");
    }

    #[tokio::test]
    async fn refresh_without_cookie_is_rejected() {
        let base = start_refresh_server().await;
        let refresher = HttpRefresher::new(reqwest::Client::new(), &base, "/auth/refresh");

        let err = refresher.refresh().await.unwrap_err();
        assert!(
            matches!(err, Error::RefreshRejected { status: 401, .. }),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn server_error_is_refresh_failure() {
        let base = start_refresh_server().await;
        let err = refresh_access_token(&reqwest::Client::new(), &format!("{base}/broken/refresh"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::RefreshFailed { status: 502, .. }),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn empty_token_is_invalid_response() {
        let base = start_refresh_server().await;
        let err = refresh_access_token(&reqwest::Client::new(), &format!("{base}/empty/refresh"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let err = refresh_access_token(&reqwest::Client::new(), "http://127.0.0.1:1/auth/refresh")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got: {err:?}");
    }
}
