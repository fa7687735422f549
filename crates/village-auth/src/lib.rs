//! Session credentials for the village management API
//!
//! Owns the persisted session (access token, refresh token, cached user
//! profile) and the raw `/auth/*` wire calls. This crate has no notion of
//! retries or concurrency control; `village-client` builds the
//! single-flight refresh on top of it.
//!
//! Session lifecycle:
//! 1. `token::login()` exchanges email/password for a `Session`
//! 2. Session stored via `credentials::CredentialStore::write_all()`
//! 3. On expiry, `token::refresh_session()` trades the refresh token for a
//!    new `Session`, which replaces the old one wholesale
//! 4. Refresh failure or logout calls `CredentialStore::clear_all()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod session;
pub mod token;

pub use constants::*;
pub use credentials::CredentialStore;
pub use error::{Error, Result};
pub use session::{Profile, Session};
pub use token::{endpoint_url, login, logout, refresh_session};
