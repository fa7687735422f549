//! Single-flight session refresh
//!
//! At most one `POST /auth/refresh` is in flight per client. The first caller
//! to find the coordinator idle starts an episode; everyone arriving while it
//! runs queues a oneshot sender and gets the same outcome.
//!
//! The episode runs on its own task and completes even if every caller gives
//! up. A panic inside it resolves the queue with `RefreshError::Aborted`
//! instead of leaving the coordinator stuck in `Refreshing`.
//!
//! Rotation is compare-and-swap against the refresh token the episode
//! started from: a logout or re-login that lands mid-flight wins, and the
//! refreshed tokens are discarded.

use std::sync::Arc;

use common::Secret;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, instrument, warn};
use village_auth::{CredentialStore, Session};

use crate::error::RefreshError;
use crate::metrics;
use crate::observer::ObserverSlot;

pub(crate) type RefreshOutcome = std::result::Result<Session, RefreshError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

pub(crate) struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    store: Arc<CredentialStore>,
    observer: Arc<ObserverSlot>,
    http: reqwest::Client,
    base_url: String,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        store: Arc<CredentialStore>,
        observer: Arc<ObserverSlot>,
        http: reqwest::Client,
        base_url: String,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            store,
            observer,
            http,
            base_url,
        }
    }

    /// Obtain a fresh session after `rejected` was refused with 401.
    ///
    /// `rejected` lets a caller whose 401 arrives after an episode already
    /// finished reuse that episode's result instead of starting another: if
    /// the store now holds a different access token it is returned as is, and
    /// if the store has been emptied the caller gets `MissingRefreshToken`
    /// without any network call.
    ///
    /// Dropping the returned future only unsubscribes this caller.
    pub(crate) async fn refresh(
        self: &Arc<Self>,
        rejected: Option<&Secret<String>>,
    ) -> RefreshOutcome {
        let rx = {
            let mut state = self.state.lock().await;
            if let RefreshState::Refreshing { waiters } = &mut *state {
                waiters.retain(|tx| !tx.is_closed());
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!(waiters = waiters.len(), "refresh in flight, queued");
                rx
            } else {
                if let Some(rejected) = rejected {
                    match self.store.access_token().await {
                        None => {
                            debug!("session cleared since the request was sent");
                            return Err(RefreshError::MissingRefreshToken);
                        }
                        Some(current) if current != *rejected => {
                            if let Some(session) = self.store.read().await {
                                debug!("session already refreshed, reusing it");
                                return Ok(session);
                            }
                        }
                        Some(_) => {}
                    }
                }
                let (tx, rx) = oneshot::channel();
                *state = RefreshState::Refreshing { waiters: vec![tx] };
                self.spawn_episode();
                rx
            }
        };

        // A dropped sender only happens if the episode task itself was torn
        // down (runtime shutdown)
        rx.await.unwrap_or(Err(RefreshError::Aborted))
    }

    /// Whether an episode is currently running.
    pub(crate) async fn in_flight(&self) -> bool {
        matches!(*self.state.lock().await, RefreshState::Refreshing { .. })
    }

    fn spawn_episode(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let worker = Arc::clone(&this);
            let outcome = match tokio::spawn(async move { worker.run_episode().await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "refresh task failed");
                    metrics::record_refresh("failure");
                    Err(RefreshError::Aborted)
                }
            };
            this.resolve(outcome).await;
        });
    }

    #[instrument(skip_all)]
    async fn run_episode(&self) -> RefreshOutcome {
        let Some(refresh_token) = self.store.refresh_token().await else {
            warn!("refresh requested with no refresh token stored");
            // Nothing left to clear means a logout got here first
            let cleared = match self.store.clear_if_no_refresh_token().await {
                Ok(cleared) => cleared,
                Err(e) => {
                    warn!(error = %e, "failed to persist cleared session");
                    true
                }
            };
            metrics::record_refresh("failure");
            if cleared {
                self.observer.notify_expired();
            }
            return Err(RefreshError::MissingRefreshToken);
        };

        let result =
            village_auth::refresh_session(&self.http, &self.base_url, refresh_token.expose())
                .await;

        match result {
            Ok(session) => match self.store.replace_if_current(&refresh_token, &session).await {
                Ok(false) => {
                    info!("session changed during refresh, discarding new tokens");
                    metrics::record_refresh("superseded");
                    Err(RefreshError::Superseded)
                }
                stored => {
                    if let Err(e) = stored {
                        // In-memory state is updated regardless; only the
                        // file is stale
                        warn!(error = %e, "failed to persist refreshed session");
                    }
                    info!("session refreshed");
                    metrics::record_refresh("success");
                    self.observer.notify_refresh(&session);
                    Ok(session)
                }
            },
            Err(e) => {
                let err = RefreshError::from(e);
                warn!(error = %err, "session refresh failed, clearing session");
                let cleared = match self.store.clear_if_current(&refresh_token).await {
                    Ok(cleared) => cleared,
                    Err(e) => {
                        warn!(error = %e, "failed to persist cleared session");
                        true
                    }
                };
                metrics::record_refresh("failure");
                if cleared {
                    self.observer.notify_expired();
                }
                Err(err)
            }
        }
    }

    /// Fan the outcome out and return to `Idle` under one lock.
    async fn resolve(&self, outcome: RefreshOutcome) {
        let mut state = self.state.lock().await;
        let waiters = match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        };
        debug!(
            waiters = waiters.len(),
            ok = outcome.is_ok(),
            "resolving refresh waiters"
        );
        for tx in waiters {
            // Receiver gone means that caller was cancelled
            let _ = tx.send(outcome.clone());
        }
    }
}
