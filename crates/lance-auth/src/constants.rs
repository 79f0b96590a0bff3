//! Fixed names and defaults shared by the client and the gateway

/// Key under which the access token is persisted.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Refresh endpoint path, relative to the backend API URL.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Client-side route of the login/onboarding entry point.
pub const DEFAULT_LOGIN_ROUTE: &str = "/onboarding";

/// Refresh attempts allowed since the last successful refresh.
pub const MAX_REFRESH_RETRIES: u32 = 3;

/// Delay between the session-expired notice and the redirect, in milliseconds.
pub const DEFAULT_REDIRECT_DELAY_MS: u64 = 1500;

/// Upper bound on a single refresh call, in seconds.
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;
