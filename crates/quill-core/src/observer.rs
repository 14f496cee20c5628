//! Publish-subscribe hub for sync rounds and lifecycle transitions.
//!
//! Observers are registered with a typed [`ObserverToken`]. Scoped
//! registrations use [`Subscription`], which unregisters on drop so a torn
//! down collaborator never receives stale callbacks.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identity of one registration within a hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

struct HubInner<E> {
    next_token: u64,
    observers: Vec<(ObserverToken, Callback<E>)>,
}

/// Ordered observer registry with synchronous fan-out
pub struct ObserverHub<E> {
    inner: Mutex<HubInner<E>>,
}

impl<E: 'static> ObserverHub<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                next_token: 0,
                observers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback; it stays registered until [`Self::remove`]
    pub fn register(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> ObserverToken {
        let mut inner = self.lock();
        inner.next_token += 1;
        let token = ObserverToken(inner.next_token);
        inner.observers.push((token, Arc::new(callback)));
        token
    }

    /// Unregister a callback; returns false for unknown tokens
    pub fn remove(&self, token: ObserverToken) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(existing, _)| *existing != token);
        before != inner.observers.len()
    }

    /// Register a callback that is removed when the returned guard drops
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription<E> {
        let token = self.register(callback);
        Subscription {
            hub: Arc::downgrade(self),
            token,
        }
    }

    /// Deliver `event` to every observer in registration order.
    ///
    /// Callbacks run without the registry lock held, so they may register or
    /// remove observers. A panicking observer is logged and skipped. Returns
    /// the number of observers that completed normally.
    pub fn broadcast(&self, event: &E) -> usize {
        let observers: Vec<(ObserverToken, Callback<E>)> = self.lock().observers.clone();

        let mut delivered = 0;
        for (token, callback) in observers {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(?token, "Observer panicked; continuing with remaining observers");
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for ObserverHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ObserverHub<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .inner
            .lock()
            .map_or(0, |inner| inner.observers.len());
        formatter
            .debug_struct("ObserverHub")
            .field("observers", &count)
            .finish()
    }
}

/// Scoped registration; dropping it unregisters the callback
#[must_use = "dropping a subscription unregisters its observer"]
pub struct Subscription<E: 'static> {
    hub: Weak<ObserverHub<E>>,
    token: ObserverToken,
}

impl<E: 'static> Subscription<E> {
    pub const fn token(&self) -> ObserverToken {
        self.token
    }

    /// Unregister now (equivalent to dropping the guard)
    pub fn cancel(self) {
        drop(self);
    }
}

impl<E: 'static> fmt::Debug for Subscription<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("token", &self.token)
            .finish()
    }
}

impl<E: 'static> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.token);
        }
    }
}
