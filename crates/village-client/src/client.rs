//! `ApiClient` facade
//!
//! Cheap to clone. Clones share the session store and the refresh
//! coordinator, so concurrent callers on different clones still get one
//! refresh.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use village_auth::{CredentialStore, ME_PATH, Profile};

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::observer::{ObserverSlot, SessionObserver};
use crate::refresh::RefreshCoordinator;
use crate::request::{ApiResponse, RequestDescriptor};
use crate::retry;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated client for the village backend.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    base_url: String,
    http: reqwest::Client,
    store: Arc<CredentialStore>,
    observer: Arc<ObserverSlot>,
    executor: Executor,
    coordinator: Arc<RefreshCoordinator>,
}

pub struct ClientBuilder {
    base_url: String,
    timeout: Duration,
    store: Option<Arc<CredentialStore>>,
    observer: Option<Arc<dyn SessionObserver>>,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Per-attempt timeout. Ignored when a prebuilt `http_client` is given.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Session store; defaults to an in-memory store.
    pub fn credential_store(mut self, store: Arc<CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use a preconfigured HTTP client (shared connection pool, proxies).
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| {
                Error::InvalidRequest(format!("invalid base URL {}: {e}", self.base_url))
            })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidRequest(format!(
                "base URL must be http or https, got {}",
                url.scheme()
            )));
        }

        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| Error::InvalidRequest(format!("building HTTP client: {e}")))?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(CredentialStore::in_memory()));
        let observer = Arc::new(ObserverSlot::new(self.observer));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            observer.clone(),
            http.clone(),
            self.base_url.clone(),
        ));

        Ok(ApiClient {
            inner: Arc::new(Inner {
                executor: Executor::new(http.clone(), self.base_url.clone()),
                base_url: self.base_url,
                http,
                store,
                observer,
                coordinator,
            }),
        })
    }
}

impl ApiClient {
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            store: None,
            observer: None,
            http: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn credential_store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// Replace the session observer. The last registration wins; `None`
    /// removes it.
    pub fn set_session_observer(&self, observer: Option<Arc<dyn SessionObserver>>) {
        self.inner.observer.replace(observer);
    }

    /// Send a request with the stored access token, refreshing and replaying
    /// once on 401.
    ///
    /// A 401 is only acted on when a refresh token is stored. Otherwise, and
    /// whenever the refresh fails, the original 401 is returned.
    #[instrument(
        skip_all,
        fields(method = %descriptor.method(), endpoint = %descriptor.endpoint())
    )]
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse<Value>> {
        let access = self.inner.store.access_token().await;
        match self.inner.executor.attempt(descriptor, access.as_ref()).await {
            Err(err) if err.is_unauthorized() => {
                if self.inner.store.refresh_token().await.is_none() {
                    debug!("unauthorized with no refresh token stored");
                    return Err(err);
                }
                retry::replay_after_refresh(
                    &self.inner.executor,
                    &self.inner.coordinator,
                    descriptor,
                    access.as_ref(),
                    err,
                )
                .await
            }
            other => other,
        }
    }

    /// `execute`, abandoned with `Error::Cancelled` when `cancel` fires.
    ///
    /// Cancelling never aborts a refresh already in flight; other callers
    /// still get its outcome.
    pub async fn execute_cancellable(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<Value>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(endpoint = descriptor.endpoint(), "request cancelled");
                Err(Error::Cancelled)
            }
            result = self.execute(descriptor) => result,
        }
    }

    async fn execute_typed<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<ApiResponse<T>> {
        self.execute(&descriptor).await?.into_typed()
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse<T>> {
        self.execute_typed(RequestDescriptor::get(endpoint).with_query(params.iter().copied()))
            .await
    }

    pub async fn post<T, B>(&self, endpoint: &str, body: Option<&B>) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute_typed(with_body(RequestDescriptor::post(endpoint), body)?)
            .await
    }

    pub async fn put<T, B>(&self, endpoint: &str, body: Option<&B>) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute_typed(with_body(RequestDescriptor::put(endpoint), body)?)
            .await
    }

    pub async fn patch<T, B>(&self, endpoint: &str, body: Option<&B>) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute_typed(with_body(RequestDescriptor::patch(endpoint), body)?)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<ApiResponse<T>> {
        self.execute_typed(RequestDescriptor::delete(endpoint)).await
    }

    /// Whether the stored session is usable.
    ///
    /// With nothing stored this is `false` without a network call. Otherwise
    /// it probes `GET /auth/me` through the normal path, so an expired access
    /// token is refreshed first.
    pub async fn validate_token(&self) -> bool {
        let store = &self.inner.store;
        if store.access_token().await.is_none() && store.refresh_token().await.is_none() {
            return false;
        }
        match self.execute(&RequestDescriptor::get(ME_PATH)).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "token validation failed");
                false
            }
        }
    }

    /// Log in with email and password and store the new session.
    #[instrument(skip_all)]
    pub async fn login(&self, email: &str, password: &str) -> Result<Profile> {
        let session = village_auth::login(&self.inner.http, &self.inner.base_url, email, password)
            .await
            .map_err(Error::from)?;
        self.inner
            .store
            .write_all(&session)
            .await
            .map_err(|e| Error::Credential(e.to_string()))?;
        info!("logged in");
        Ok(session.user)
    }

    /// Revoke the refresh token server-side (best effort) and clear the
    /// stored session. Does not notify the observer.
    #[instrument(skip_all)]
    pub async fn logout(&self) -> Result<()> {
        let store = &self.inner.store;
        if let Some(refresh) = store.refresh_token().await {
            let access = store.access_token().await;
            if let Err(e) = village_auth::logout(
                &self.inner.http,
                &self.inner.base_url,
                access.as_ref().map(|token| token.expose().as_str()),
                refresh.expose(),
            )
            .await
            {
                warn!(error = %e, "server-side logout failed, clearing local session anyway");
            }
        }
        store
            .clear_all()
            .await
            .map_err(|e| Error::Credential(e.to_string()))?;
        info!("logged out");
        Ok(())
    }

    /// Cached profile of the logged-in user.
    pub async fn current_user(&self) -> Option<Profile> {
        self.inner.store.user().await
    }

    /// Whether a session refresh is currently in flight.
    pub async fn refresh_in_flight(&self) -> bool {
        self.inner.coordinator.in_flight().await
    }
}

fn with_body<B: Serialize + ?Sized>(
    descriptor: RequestDescriptor,
    body: Option<&B>,
) -> Result<RequestDescriptor> {
    match body {
        Some(body) => descriptor.with_json(body),
        None => Ok(descriptor),
    }
}
