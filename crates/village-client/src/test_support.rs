//! In-process mock of the village backend for tests
//!
//! Token model: access tokens are valid only once granted; exactly one
//! refresh token is accepted at a time (initially `rt_1`). Each successful
//! refresh or login issues generation N+1 as `at_N` / `rt_N` and makes the
//! previous refresh token worthless.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use village_auth::{CredentialStore, Profile, Session};

use crate::client::ApiClient;
use crate::observer::SessionObserver;

/// One request as the mock saw it.
#[derive(Debug, Clone)]
pub(crate) struct Seen {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub request_id: Option<String>,
    pub body: Option<Value>,
}

struct Tokens {
    valid_access: HashSet<String>,
    current_refresh: Option<String>,
    generation: u32,
}

pub(crate) struct MockState {
    tokens: Mutex<Tokens>,
    refresh_delay: Mutex<Duration>,
    refresh_fails: AtomicBool,
    refresh_calls: AtomicUsize,
    revoked_attempts: AtomicUsize,
    requests: Mutex<Vec<Seen>>,
}

impl MockState {
    fn new() -> Self {
        Self {
            tokens: Mutex::new(Tokens {
                valid_access: HashSet::new(),
                current_refresh: Some("rt_1".into()),
                generation: 1,
            }),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_fails: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            revoked_attempts: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Make `token` a live access token.
    pub(crate) fn grant(&self, token: &str) {
        self.tokens
            .lock()
            .unwrap()
            .valid_access
            .insert(token.to_string());
    }

    /// Expire an access token.
    pub(crate) fn revoke(&self, token: &str) {
        self.tokens.lock().unwrap().valid_access.remove(token);
    }

    /// Hold every refresh response for `delay`.
    pub(crate) fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    /// Answer every refresh with 401.
    pub(crate) fn fail_refreshes(&self) {
        self.refresh_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented to `/auth/refresh`, in arrival order.
    pub(crate) fn refresh_tokens_seen(&self) -> Vec<String> {
        self.requests_to("/auth/refresh")
            .into_iter()
            .filter_map(|seen| seen.body?["refresh_token"].as_str().map(str::to_owned))
            .collect()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<Seen> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| seen.path == path)
            .cloned()
            .collect()
    }

    /// Authorization headers sent to `path`, in arrival order.
    pub(crate) fn bearers_for(&self, path: &str) -> Vec<Option<String>> {
        self.requests_to(path)
            .into_iter()
            .map(|seen| seen.authorization)
            .collect()
    }

    fn record(&self, method: &str, uri: &Uri, headers: &HeaderMap, body: Option<Value>) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        self.requests.lock().unwrap().push(Seen {
            method: method.to_string(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_owned),
            authorization: header("authorization"),
            request_id: header("x-request-id"),
            body,
        });
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        else {
            return false;
        };
        self.tokens.lock().unwrap().valid_access.contains(token)
    }

    /// Rotate to the next generation, optionally only if `presented` is the
    /// current refresh token.
    fn issue(&self, presented: Option<&str>) -> Option<(String, String)> {
        let mut tokens = self.tokens.lock().unwrap();
        if let Some(presented) = presented
            && tokens.current_refresh.as_deref() != Some(presented)
        {
            return None;
        }
        tokens.generation += 1;
        let access = format!("at_{}", tokens.generation);
        let refresh = format!("rt_{}", tokens.generation);
        tokens.valid_access.insert(access.clone());
        tokens.current_refresh = Some(refresh.clone());
        Some((access, refresh))
    }
}

pub(crate) struct MockBackend {
    pub url: String,
    pub state: Arc<MockState>,
}

impl MockBackend {
    pub(crate) async fn start() -> Self {
        let state = Arc::new(MockState::new());
        let app = Router::new()
            .route("/auth/refresh", post(refresh))
            .route("/auth/login", post(login))
            .route("/auth/logout", post(logout))
            .route("/auth/me", get(me))
            .route("/apartments", get(apartments))
            .route("/bookings", post(create_booking))
            .route(
                "/bookings/{id}",
                put(update_booking)
                    .patch(update_booking)
                    .delete(delete_booking),
            )
            .route("/revoked", get(revoked))
            .route("/broken", get(broken))
            .route("/bad-gateway", get(bad_gateway))
            .route("/not-json", get(not_json))
            .route("/slow", get(slow))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { url, state }
    }
}

type Shared = State<Arc<MockState>>;

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"success": false, "message": message})),
    )
        .into_response()
}

fn session_body(access: String, refresh: String) -> Response {
    Json(json!({
        "success": true,
        "data": {
            "access_token": access,
            "refresh_token": refresh,
            "user": {"id": 1, "email": "host@village.test", "name": "Giulia", "role": "manager"}
        }
    }))
    .into_response()
}

async fn refresh(
    State(state): Shared,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", &uri, &headers, Some(body.clone()));
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = *state.refresh_delay.lock().unwrap();
    tokio::time::sleep(delay).await;

    if state.refresh_fails.load(Ordering::SeqCst) {
        return unauthorized("Refresh token expired");
    }
    match state.issue(Some(body["refresh_token"].as_str().unwrap_or_default())) {
        Some((access, refresh)) => session_body(access, refresh),
        None => unauthorized("Invalid refresh token"),
    }
}

async fn login(
    State(state): Shared,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", &uri, &headers, Some(body.clone()));
    if body["password"] != "secret" {
        return unauthorized("Invalid credentials");
    }
    match state.issue(None) {
        Some((access, refresh)) => session_body(access, refresh),
        None => unauthorized("Invalid credentials"),
    }
}

async fn logout(
    State(state): Shared,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", &uri, &headers, Some(body));
    Json(json!({"success": true, "message": "Logged out"})).into_response()
}

async fn me(State(state): Shared, uri: Uri, headers: HeaderMap) -> Response {
    state.record("GET", &uri, &headers, None);
    if !state.authorized(&headers) {
        return unauthorized("Token expired");
    }
    Json(json!({"success": true, "data": {"id": 1, "email": "host@village.test"}}))
        .into_response()
}

async fn apartments(State(state): Shared, uri: Uri, headers: HeaderMap) -> Response {
    state.record("GET", &uri, &headers, None);
    if !state.authorized(&headers) {
        return unauthorized("Token expired");
    }
    Json(json!({
        "success": true,
        "data": [{"id": 1, "name": "Casa Olivo"}],
        "pagination": {"page": 1, "limit": 10, "total": 1, "totalPages": 1}
    }))
    .into_response()
}

async fn create_booking(
    State(state): Shared,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", &uri, &headers, Some(body.clone()));
    if !state.authorized(&headers) {
        return unauthorized("Token expired");
    }
    (
        StatusCode::CREATED,
        Json(json!({"success": true, "data": body, "message": "Booking created"})),
    )
        .into_response()
}

async fn update_booking(
    State(state): Shared,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record(method.as_str(), &uri, &headers, Some(body.clone()));
    if !state.authorized(&headers) {
        return unauthorized("Token expired");
    }
    Json(json!({"success": true, "data": body})).into_response()
}

async fn delete_booking(State(state): Shared, uri: Uri, headers: HeaderMap) -> Response {
    state.record("DELETE", &uri, &headers, None);
    if !state.authorized(&headers) {
        return unauthorized("Token expired");
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Rejects every call, numbering the attempts.
async fn revoked(State(state): Shared, uri: Uri, headers: HeaderMap) -> Response {
    state.record("GET", &uri, &headers, None);
    let attempt = state.revoked_attempts.fetch_add(1, Ordering::SeqCst) + 1;
    unauthorized(&format!("rejected attempt {attempt}"))
}

async fn broken(State(state): Shared, uri: Uri, headers: HeaderMap) -> Response {
    state.record("GET", &uri, &headers, None);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "message": "Database unavailable"})),
    )
        .into_response()
}

async fn bad_gateway(State(state): Shared, uri: Uri, headers: HeaderMap) -> Response {
    state.record("GET", &uri, &headers, None);
    (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response()
}

async fn not_json(State(state): Shared, uri: Uri, headers: HeaderMap) -> Response {
    state.record("GET", &uri, &headers, None);
    (StatusCode::OK, "<html>maintenance</html>").into_response()
}

async fn slow(State(state): Shared, uri: Uri, headers: HeaderMap) -> Response {
    state.record("GET", &uri, &headers, None);
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({"success": true})).into_response()
}

/// Counts observer callbacks.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    refreshed: Mutex<Vec<String>>,
    expired: AtomicUsize,
}

impl RecordingObserver {
    /// Access tokens announced via `on_token_refresh`.
    pub(crate) fn refreshed(&self) -> Vec<String> {
        self.refreshed.lock().unwrap().clone()
    }

    pub(crate) fn expired(&self) -> usize {
        self.expired.load(Ordering::SeqCst)
    }
}

impl SessionObserver for RecordingObserver {
    fn on_token_refresh(&self, session: &Session) {
        self.refreshed
            .lock()
            .unwrap()
            .push(session.access_token.expose().clone());
    }

    fn on_token_expired(&self) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn session(access: &str, refresh: &str) -> Session {
    let user: Profile =
        serde_json::from_value(json!({"id": 1, "email": "host@village.test"})).unwrap();
    Session::new(access, refresh, user)
}

/// Client against `backend` with an in-memory store holding `access` and
/// `refresh`, plus a recording observer.
pub(crate) async fn client_with_session(
    backend: &MockBackend,
    access: &str,
    refresh: &str,
) -> (ApiClient, Arc<RecordingObserver>) {
    let store = Arc::new(CredentialStore::in_memory());
    store.write_all(&session(access, refresh)).await.unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let client = ApiClient::builder(&backend.url)
        .credential_store(store)
        .session_observer(observer.clone())
        .build()
        .unwrap();
    (client, observer)
}
