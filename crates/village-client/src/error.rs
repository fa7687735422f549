//! Error taxonomy for API calls and session refresh
//!
//! Both enums are `Clone`: one refresh outcome is fanned out to every caller
//! that queued behind it, and the retry path hands the original 401 back
//! unchanged.

use serde_json::Value;

/// Failure of an API call, as seen by domain services.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No HTTP response was obtained (connect failure, timeout, TLS, reset).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-2xx status.
    #[error("{message} (HTTP {status})")]
    Api {
        status: u16,
        message: String,
        /// Parsed error body, when it was JSON.
        data: Option<Value>,
    },

    /// A 2xx response whose body is not the expected JSON envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built (bad header value, unserializable body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The session could not be read from or written to the credential store.
    #[error("credential store error: {0}")]
    Credential(String),

    /// The caller's cancellation token fired before the call completed.
    #[error("request cancelled")]
    Cancelled,
}

impl Error {
    /// HTTP status of the failure; 0 when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            Error::Api { status, .. } => *status,
            _ => 0,
        }
    }

    /// Whether the backend rejected the access token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Api { status: 401, .. })
    }

    /// JSON error body returned by the backend, if any.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Error::Api { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

impl From<village_auth::Error> for Error {
    fn from(err: village_auth::Error) -> Self {
        match err {
            village_auth::Error::Http(msg) => Error::Network(msg),
            village_auth::Error::InvalidCredentials(message) => Error::Api {
                status: 401,
                message,
                data: None,
            },
            village_auth::Error::Rejected { status, message } => Error::Api {
                status,
                message,
                data: None,
            },
            village_auth::Error::Malformed(msg) => Error::InvalidResponse(msg),
            village_auth::Error::CredentialParse(msg) | village_auth::Error::Io(msg) => {
                Error::Credential(msg)
            }
        }
    }
}

/// Why a refresh episode did not produce a new session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh token rejected: {0}")]
    InvalidRefreshToken(String),

    #[error("refresh endpoint returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("malformed refresh response: {0}")]
    Malformed(String),

    /// The session was replaced or cleared while the refresh was in flight,
    /// so the refreshed tokens were discarded.
    #[error("session changed during refresh")]
    Superseded,

    #[error("refresh task aborted")]
    Aborted,
}

impl From<village_auth::Error> for RefreshError {
    fn from(err: village_auth::Error) -> Self {
        match err {
            village_auth::Error::Http(msg) => RefreshError::Network(msg),
            village_auth::Error::InvalidCredentials(msg) => RefreshError::InvalidRefreshToken(msg),
            village_auth::Error::Rejected { status, message } => {
                RefreshError::Rejected { status, message }
            }
            village_auth::Error::Malformed(msg)
            | village_auth::Error::CredentialParse(msg)
            | village_auth::Error::Io(msg) => RefreshError::Malformed(msg),
        }
    }
}

/// Result alias for API calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_zero_without_response() {
        assert_eq!(Error::Network("connection refused".into()).status(), 0);
        assert_eq!(Error::InvalidResponse("eof".into()).status(), 0);
        assert_eq!(Error::Cancelled.status(), 0);
    }

    #[test]
    fn api_error_carries_status_and_body() {
        let err = Error::Api {
            status: 422,
            message: "Check-in date is in the past".into(),
            data: Some(serde_json::json!({"field": "check_in"})),
        };
        assert_eq!(err.status(), 422);
        assert!(!err.is_unauthorized());
        assert_eq!(err.data().unwrap()["field"], "check_in");
        assert_eq!(err.to_string(), "Check-in date is in the past (HTTP 422)");
    }

    #[test]
    fn only_api_401_is_unauthorized() {
        let unauthorized = Error::Api {
            status: 401,
            message: "Token expired".into(),
            data: None,
        };
        assert!(unauthorized.is_unauthorized());
        assert!(!Error::Network("401".into()).is_unauthorized());
    }

    #[test]
    fn auth_errors_map_onto_api_errors() {
        let err = Error::from(village_auth::Error::InvalidCredentials("bad password".into()));
        assert_eq!(err.status(), 401);

        let err = Error::from(village_auth::Error::Http("refused".into()));
        assert!(matches!(err, Error::Network(_)));

        let err = Error::from(village_auth::Error::Rejected {
            status: 503,
            message: "maintenance".into(),
        });
        assert_eq!(err.status(), 503);
    }

    #[test]
    fn refresh_401_maps_to_invalid_refresh_token() {
        let err = RefreshError::from(village_auth::Error::InvalidCredentials("expired".into()));
        assert!(matches!(err, RefreshError::InvalidRefreshToken(_)));
    }
}
