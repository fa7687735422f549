//! Authenticated API client for the village management backend
//!
//! Every domain service (apartments, bookings, payments, ...) talks to the
//! backend through one `ApiClient`. The client attaches the stored bearer
//! token, and when the backend answers 401 it refreshes the session
//! transparently, retrying the original request once with the new token.
//!
//! Request lifecycle:
//! 1. `ApiClient::execute` reads the access token from the credential store
//! 2. `executor` sends one attempt and parses the JSON envelope
//! 3. 401 with a refresh token stored → `retry` asks the `refresh`
//!    coordinator for a new session; concurrent callers share one
//!    `POST /auth/refresh`
//! 4. Success: store updated, observer notified, request replayed once
//! 5. Failure: store cleared, observer told the session expired, caller
//!    gets the original 401

pub mod classify;
pub mod client;
pub mod error;
mod executor;
pub mod metrics;
pub mod observer;
mod refresh;
pub mod request;
mod retry;

#[cfg(test)]
mod test_support;

pub use classify::{StatusClass, classify_status};
pub use client::{ApiClient, ClientBuilder};
pub use error::{Error, RefreshError, Result};
pub use observer::{CallbackObserver, SessionObserver};
pub use request::{ApiResponse, Pagination, RequestDescriptor};
pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;
pub use village_auth::{CredentialStore, Profile, Session};
