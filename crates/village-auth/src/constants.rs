//! Backend auth routes, relative to the configured API base URL

/// Exchange a refresh token for a new session
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Exchange email and password for a session
pub const LOGIN_PATH: &str = "/auth/login";

/// Revoke the refresh token server-side
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Current user; a 2xx here means the access token is live
pub const ME_PATH: &str = "/auth/me";
