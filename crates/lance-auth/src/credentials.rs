//! Access token storage
//!
//! Holds the single active access token in memory and, when backed by a file,
//! mirrors it to a small JSON document keyed by `ACCESS_TOKEN_KEY`. All writes
//! use atomic temp-file + rename so a crash never leaves a half-written file.
//!
//! Access is synchronous: the pipeline reads the token before every request
//! and must not yield while doing so. Persistence failures are logged and do
//! not fail the caller; the in-memory value is authoritative for the process.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use common::Secret;
use tracing::{debug, info, warn};

use crate::constants::ACCESS_TOKEN_KEY;
use crate::error::{Error, Result};

/// An opaque bearer token. Never printed by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(Secret<String>);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken({})", self.0)
    }
}

/// Process-wide store for the current access token.
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: Mutex<Option<AccessToken>>,
}

impl CredentialStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(None),
        }
    }

    /// Load the persisted token from `path`.
    ///
    /// A missing file is a cold start with no token. A file that exists but
    /// cannot be read or parsed is an error.
    pub fn load(path: PathBuf) -> Result<Self> {
        let token = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let entries: BTreeMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            let token = entries
                .get(ACCESS_TOKEN_KEY)
                .filter(|t| !t.is_empty())
                .map(AccessToken::new);
            info!(
                path = %path.display(),
                has_token = token.is_some(),
                "loaded credentials"
            );
            token
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            None
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(token),
        })
    }

    /// The stored token, if any.
    pub fn get(&self) -> Option<AccessToken> {
        self.lock().clone()
    }

    /// Store `token`, replacing any previous value.
    pub fn set(&self, token: AccessToken) {
        let mut state = self.lock();
        *state = Some(token);
        debug!("access token stored");
        self.persist(state.as_ref());
    }

    /// Remove the stored token.
    pub fn clear(&self) {
        let mut state = self.lock();
        if state.take().is_some() {
            debug!("access token cleared");
        }
        self.persist(None);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AccessToken>> {
        // A panic while holding the guard cannot leave the Option half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, token: Option<&AccessToken>) {
        let Some(path) = &self.path else {
            return;
        };
        let mut entries = BTreeMap::new();
        if let Some(token) = token {
            entries.insert(ACCESS_TOKEN_KEY.to_string(), token.expose().to_string());
        }
        if let Err(e) = write_atomic(path, &entries) {
            warn!(path = %path.display(), error = %e, "failed to persist credentials");
        }
    }
}

/// Write credentials to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 since the file holds a bearer
/// token.
fn write_atomic(path: &Path, data: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
