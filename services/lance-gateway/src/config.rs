//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! An initial access token may be seeded from LANCE_ACCESS_TOKEN; it is
//! never read from the TOML to avoid committing tokens to config files.

use common::Secret;
use lance_auth::{
    DEFAULT_LOGIN_ROUTE, DEFAULT_REDIRECT_DELAY_MS, DEFAULT_REFRESH_PATH,
    DEFAULT_REFRESH_TIMEOUT_SECS, MAX_REFRESH_RETRIES,
};
use lance_client::CoordinatorSettings;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Local listener settings
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Lance backend location
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the REST API, e.g. https://api.lance.so
    pub api_url: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Base URL of the web app hosting the login route
    pub app_url: String,
}

/// Session and refresh policy
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Where the access token is persisted. In-memory only when unset.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_redirect_delay_ms")]
    pub redirect_delay_ms: u64,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
    #[serde(default = "default_login_route")]
    pub login_route: String,
    #[serde(skip)]
    pub seed_token: Option<Secret<String>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials_path: None,
            max_retries: default_max_retries(),
            redirect_delay_ms: default_redirect_delay_ms(),
            refresh_timeout_secs: default_refresh_timeout(),
            login_route: default_login_route(),
            seed_token: None,
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_string()
}

fn default_max_retries() -> u32 {
    MAX_REFRESH_RETRIES
}

fn default_redirect_delay_ms() -> u64 {
    DEFAULT_REDIRECT_DELAY_MS
}

fn default_refresh_timeout() -> u64 {
    DEFAULT_REFRESH_TIMEOUT_SECS
}

fn default_login_route() -> String {
    DEFAULT_LOGIN_ROUTE.to_string()
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        for (field, url) in [
            ("api_url", &config.backend.api_url),
            ("app_url", &config.backend.app_url),
        ] {
            if !is_http_url(url) {
                return Err(common::Error::Config(format!(
                    "{field} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if !config.backend.refresh_path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "refresh_path must start with '/', got: {}",
                config.backend.refresh_path
            )));
        }

        if !config.session.login_route.starts_with('/') {
            return Err(common::Error::Config(format!(
                "login_route must start with '/', got: {}",
                config.session.login_route
            )));
        }

        if config.gateway.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.gateway.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.session.max_retries == 0 {
            return Err(common::Error::Config(
                "max_retries must be greater than 0".into(),
            ));
        }

        if config.session.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Ok(token) = std::env::var("LANCE_ACCESS_TOKEN") {
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.session.seed_token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("lance-gateway.toml")
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            max_retries: self.session.max_retries,
            redirect_delay: Duration::from_millis(self.session.redirect_delay_ms),
            refresh_timeout: Duration::from_secs(self.session.refresh_timeout_secs),
            login_route: self.session.login_route.clone(),
        }
    }

    /// Absolute URL of the login entry point shown to operators.
    pub fn login_url(&self) -> String {
        format!(
            "{}{}",
            self.backend.app_url.trim_end_matches('/'),
            self.session.login_route
        )
    }
}
