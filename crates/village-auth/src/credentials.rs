//! Session storage
//!
//! Persists the current session as a JSON object with three string keys:
//! `access_token`, `refresh_token` and `user` (the JSON-encoded profile).
//! All writes replace or remove the three keys together and go through an
//! atomic temp-file + rename, so a crash never leaves a new access token next
//! to an old refresh token. A tokio Mutex serializes writers.
//!
//! The store can also run purely in memory, for embedders that keep the
//! session elsewhere and for tests.

use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::{Profile, Session};

/// In-memory view of the three persisted keys.
///
/// Keys are individually optional because the file may have been edited or
/// written by an older client; `read()` only yields a `Session` when all
/// three are present and the profile parses.
#[derive(Default)]
struct Keys {
    access_token: Option<Secret<String>>,
    refresh_token: Option<Secret<String>>,
    user: Option<String>,
}

#[derive(Serialize)]
struct KeysOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Deserialize)]
struct KeysIn {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

impl From<KeysIn> for Keys {
    fn from(raw: KeysIn) -> Self {
        Self {
            access_token: raw.access_token.map(Secret::new),
            refresh_token: raw.refresh_token.map(Secret::new),
            user: raw.user,
        }
    }
}

impl Keys {
    fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }
}

/// Thread-safe session store.
///
/// Reads take the lock briefly and clone, so request-time reads never wait
/// on anything longer than a concurrent write.
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: Mutex<Keys>,
}

impl CredentialStore {
    /// Load the session file at `path`.
    ///
    /// If the file doesn't exist it is created as `{}` (logged out).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let keys = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let raw: KeysIn = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing session file: {e}")))?;
            let keys = Keys::from(raw);
            info!(
                path = %path.display(),
                logged_in = keys.access_token.is_some(),
                "loaded session file"
            );
            keys
        } else {
            info!(path = %path.display(), "session file not found, starting logged out");
            let keys = Keys::default();
            write_atomic(&path, &keys).await?;
            keys
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(keys),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(Keys::default()),
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The full session, or `None` if any of the three keys is missing or the
    /// stored profile does not parse.
    pub async fn read(&self) -> Option<Session> {
        let state = self.state.lock().await;
        let access_token = state.access_token.clone()?;
        let refresh_token = state.refresh_token.clone()?;
        let user = match serde_json::from_str::<Profile>(state.user.as_deref()?) {
            Ok(user) => user,
            Err(e) => {
                debug!(error = %e, "stored user profile does not parse");
                return None;
            }
        };
        Some(Session {
            access_token,
            refresh_token,
            user,
        })
    }

    /// Current access token, if stored.
    pub async fn access_token(&self) -> Option<Secret<String>> {
        self.state.lock().await.access_token.clone()
    }

    /// Current refresh token, if stored.
    pub async fn refresh_token(&self) -> Option<Secret<String>> {
        self.state.lock().await.refresh_token.clone()
    }

    /// Cached profile of the logged-in user.
    pub async fn user(&self) -> Option<Profile> {
        let state = self.state.lock().await;
        serde_json::from_str(state.user.as_deref()?).ok()
    }

    /// Whether nothing at all is stored.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }

    /// Replace all three keys with `session`.
    ///
    /// The in-memory state is updated before persisting, so a disk error
    /// still leaves the new session usable for this process.
    pub async fn write_all(&self, session: &Session) -> Result<()> {
        let user = serde_json::to_string(&session.user)
            .map_err(|e| Error::CredentialParse(format!("serializing user profile: {e}")))?;
        let mut state = self.state.lock().await;
        *state = Keys {
            access_token: Some(session.access_token.clone()),
            refresh_token: Some(session.refresh_token.clone()),
            user: Some(user),
        };
        debug!("stored session");
        self.persist(&state).await
    }

    /// Remove all three keys.
    pub async fn clear_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = Keys::default();
        debug!("cleared session");
        self.persist(&state).await
    }

    /// Replace the session only if the stored refresh token is still
    /// `expected`.
    ///
    /// Returns `Ok(false)` without writing when the session changed in the
    /// meantime (logout, or a login as someone else). On `Err` the in-memory
    /// state has already been replaced.
    pub async fn replace_if_current(
        &self,
        expected: &Secret<String>,
        session: &Session,
    ) -> Result<bool> {
        let user = serde_json::to_string(&session.user)
            .map_err(|e| Error::CredentialParse(format!("serializing user profile: {e}")))?;
        let mut state = self.state.lock().await;
        if state.refresh_token.as_ref() != Some(expected) {
            debug!("refresh token changed underneath, not replacing session");
            return Ok(false);
        }
        *state = Keys {
            access_token: Some(session.access_token.clone()),
            refresh_token: Some(session.refresh_token.clone()),
            user: Some(user),
        };
        debug!("rotated session");
        self.persist(&state).await.map(|()| true)
    }

    /// Remove all three keys only if the stored refresh token is still
    /// `expected`.
    pub async fn clear_if_current(&self, expected: &Secret<String>) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.refresh_token.as_ref() != Some(expected) {
            debug!("refresh token changed underneath, not clearing session");
            return Ok(false);
        }
        *state = Keys::default();
        debug!("cleared session");
        self.persist(&state).await.map(|()| true)
    }

    /// Remove leftover keys when no refresh token is stored.
    ///
    /// Returns `Ok(true)` only if something was removed. A stored refresh
    /// token (a login that just landed) or an already empty store leaves the
    /// state untouched.
    pub async fn clear_if_no_refresh_token(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.refresh_token.is_some() || state.is_empty() {
            return Ok(false);
        }
        *state = Keys::default();
        debug!("cleared session without refresh token");
        self.persist(&state).await.map(|()| true)
    }

    async fn persist(&self, keys: &Keys) -> Result<()> {
        match &self.path {
            Some(path) => write_atomic(path, keys).await.inspect_err(|e| {
                warn!(path = %path.display(), error = %e, "failed to persist session");
            }),
            None => Ok(()),
        }
    }
}

/// Write the session keys to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 since the file holds bearer tokens.
async fn write_atomic(path: &Path, keys: &Keys) -> Result<()> {
    let out = KeysOut {
        access_token: keys.access_token.as_ref().map(|s| s.expose().as_str()),
        refresh_token: keys.refresh_token.as_ref().map(|s| s.expose().as_str()),
        user: keys.user.as_deref(),
    };
    let json = serde_json::to_string_pretty(&out)
        .map_err(|e| Error::CredentialParse(format!("serializing session: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
