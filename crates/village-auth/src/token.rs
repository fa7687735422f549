//! Auth endpoint calls
//!
//! Login and refresh both answer with the same envelope:
//! `{ "success": true, "data": { "access_token", "refresh_token", "user" } }`.
//! Anything else, including a 2xx with `success: false`, is a failure.
//! These functions make exactly one HTTP call each and never touch the
//! credential store.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use crate::error::{Error, Result};
use crate::session::{Session, SessionPayload};

/// Response envelope of the auth endpoints.
#[derive(Deserialize)]
struct AuthEnvelope {
    #[serde(default)]
    success: bool,
    data: Option<SessionPayload>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Join the API base URL and an endpoint path without doubling slashes.
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Trade a refresh token for a new session (`POST /auth/refresh`).
pub async fn refresh_session(
    client: &reqwest::Client,
    base_url: &str,
    refresh: &str,
) -> Result<Session> {
    let response = client
        .post(endpoint_url(base_url, REFRESH_PATH))
        .json(&RefreshRequest {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    read_session(response, "refresh").await
}

/// Exchange email and password for a session (`POST /auth/login`).
pub async fn login(
    client: &reqwest::Client,
    base_url: &str,
    email: &str,
    password: &str,
) -> Result<Session> {
    let response = client
        .post(endpoint_url(base_url, LOGIN_PATH))
        .json(&LoginRequest { email, password })
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    read_session(response, "login").await
}

/// Revoke a refresh token server-side (`POST /auth/logout`).
///
/// The access token is attached when available; the response body is ignored.
pub async fn logout(
    client: &reqwest::Client,
    base_url: &str,
    access: Option<&str>,
    refresh: &str,
) -> Result<()> {
    let mut request = client
        .post(endpoint_url(base_url, LOGOUT_PATH))
        .json(&RefreshRequest {
            refresh_token: refresh,
        });
    if let Some(access) = access {
        request = request.bearer_auth(access);
    }
    let response = request
        .send()
        .await
        .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Rejected {
            status: status.as_u16(),
            message: format!("logout returned {status}"),
        });
    }
    Ok(())
}

/// Decode a login/refresh response into a `Session`.
async fn read_session(response: reqwest::Response, operation: &str) -> Result<Session> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Http(format!("reading {operation} response: {e}")))?;
    let envelope = serde_json::from_slice::<AuthEnvelope>(&body);

    if !status.is_success() {
        let message = envelope
            .ok()
            .and_then(|env| env.message)
            .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));

        // 401/403 means the refresh token (or password) is no good
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "{operation} rejected ({status}): {message}"
            )));
        }
        return Err(Error::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    let envelope =
        envelope.map_err(|e| Error::Malformed(format!("invalid {operation} response: {e}")))?;
    match envelope {
        AuthEnvelope {
            success: true,
            data: Some(payload),
            ..
        } => {
            debug!(operation, "auth endpoint issued a new session");
            Ok(Session::from(payload))
        }
        AuthEnvelope { message, .. } => Err(Error::Malformed(format!(
            "{operation} response without session data: {}",
            message.unwrap_or_else(|| "no message".into())
        ))),
    }
}
