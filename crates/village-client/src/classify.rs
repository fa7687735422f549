//! Response classification
//!
//! Turns one HTTP exchange into either a decoded envelope or an `Error`.
//! A 401 is singled out because it is the only status the retry path acts
//! on; every other non-2xx is surfaced to the caller as-is.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::request::ApiResponse;

/// What the client does with a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx: decode the envelope.
    Success,
    /// 401: access token rejected, eligible for refresh and one replay.
    Unauthorized,
    /// Any other status: surfaced to the caller without retry.
    Failure,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 => StatusClass::Unauthorized,
        _ => StatusClass::Failure,
    }
}

/// Decode a response body according to its status.
///
/// A 2xx with an empty body stands for `{ "success": true }`. A non-2xx
/// takes its message from the body's `message` field when the body is JSON,
/// and falls back to `HTTP error <status>` otherwise.
pub fn parse_response(status: u16, body: &[u8]) -> Result<ApiResponse<Value>> {
    match classify_status(status) {
        StatusClass::Success => {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(ApiResponse::empty_success());
            }
            serde_json::from_slice(body).map_err(|e| {
                Error::InvalidResponse(format!("HTTP {status} body is not a JSON envelope: {e}"))
            })
        }
        StatusClass::Unauthorized | StatusClass::Failure => {
            let data = serde_json::from_slice::<Value>(body).ok();
            let message = data
                .as_ref()
                .and_then(|d| d.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| format!("HTTP error {status}"));
            Err(Error::Api {
                status,
                message,
                data,
            })
        }
    }
}

/// Map a transport failure to `Error::Network`.
pub fn transport_error(err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Network(format!("request timed out: {err}"))
    } else if err.is_connect() {
        Error::Network(format!("connection failed: {err}"))
    } else {
        Error::Network(err.to_string())
    }
}
