//! Session lifecycle notifications
//!
//! The UI layer (or the CLI) registers one observer to hear about token
//! rotation and session expiry, e.g. to redirect to the login screen.
//! Callbacks run on the refresh task; keep them short and non-blocking.

use std::sync::{Arc, PoisonError, RwLock};

use village_auth::Session;

/// Receives session lifecycle events. Both methods default to no-ops.
pub trait SessionObserver: Send + Sync {
    /// A refresh succeeded and `session` is now stored.
    fn on_token_refresh(&self, _session: &Session) {}

    /// A refresh failed and the stored session was cleared. Fires once per
    /// failed refresh episode, however many requests were waiting on it.
    fn on_token_expired(&self) {}
}

type RefreshFn = Box<dyn Fn(&Session) + Send + Sync>;
type ExpiredFn = Box<dyn Fn() + Send + Sync>;

/// Observer built from two closures.
pub struct CallbackObserver {
    on_refresh: RefreshFn,
    on_expired: ExpiredFn,
}

impl CallbackObserver {
    pub fn new(
        on_refresh: impl Fn(&Session) + Send + Sync + 'static,
        on_expired: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_refresh: Box::new(on_refresh),
            on_expired: Box::new(on_expired),
        }
    }
}

impl SessionObserver for CallbackObserver {
    fn on_token_refresh(&self, session: &Session) {
        (self.on_refresh)(session)
    }

    fn on_token_expired(&self) {
        (self.on_expired)()
    }
}

/// Holder for the currently registered observer. Replacing it is
/// last-write-wins.
#[derive(Default)]
pub(crate) struct ObserverSlot {
    current: RwLock<Option<Arc<dyn SessionObserver>>>,
}

impl ObserverSlot {
    pub(crate) fn new(observer: Option<Arc<dyn SessionObserver>>) -> Self {
        Self {
            current: RwLock::new(observer),
        }
    }

    pub(crate) fn replace(&self, observer: Option<Arc<dyn SessionObserver>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    // Clone the Arc out so the callback runs without the lock held
    fn get(&self) -> Option<Arc<dyn SessionObserver>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn notify_refresh(&self, session: &Session) {
        if let Some(observer) = self.get() {
            observer.on_token_refresh(session);
        }
    }

    pub(crate) fn notify_expired(&self) {
        if let Some(observer) = self.get() {
            observer.on_token_expired();
        }
    }
}
