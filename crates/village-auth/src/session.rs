//! Session data model
//!
//! A `Session` is the unit the credential store persists and the refresh
//! path replaces: access token, refresh token and cached user profile always
//! travel together.

use common::Secret;
use serde::{Deserialize, Serialize};

/// Cached profile of the logged-in user.
///
/// Only the fields the client itself looks at are typed. Everything else the
/// backend sends (id, phone, village assignments, ...) is kept verbatim in
/// `extra` so the profile round-trips through storage unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Profile {
    /// Backend user id, when present.
    pub fn id(&self) -> Option<&serde_json::Value> {
        self.extra.get("id")
    }
}

/// Access token, refresh token and cached profile, treated as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub user: Profile,
}

impl Session {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        user: Profile,
    ) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: Secret::new(refresh_token.into()),
            user,
        }
    }
}

/// `data` payload of a successful login or refresh envelope.
#[derive(Deserialize)]
pub(crate) struct SessionPayload {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Profile,
}

impl From<SessionPayload> for Session {
    fn from(payload: SessionPayload) -> Self {
        Session::new(payload.access_token, payload.refresh_token, payload.user)
    }
}
