//! Publish/subscribe fan-out with per-subscriber failure isolation.
//!
//! Subscribers are called in subscription order, synchronously, outside the
//! subscriber-list lock. A subscriber that panics is logged and skipped; the
//! remaining subscribers still run and the publishing call still returns.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::warn;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// An ordered set of subscriber callbacks.
pub struct Observers<T> {
    inner: Arc<Mutex<Subscribers<T>>>,
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers a callback. It stays registered until the returned
    /// handle's [`Subscription::unsubscribe`] is called.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut subs = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = subs.next_id;
            subs.next_id += 1;
            subs.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Subscribers<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut subs = inner.lock().unwrap_or_else(PoisonError::into_inner);
                    subs.entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Like [`subscribe`](Self::subscribe), but first delivers `current` to
    /// the new callback alone.
    pub fn subscribe_with_current(
        &self,
        current: &T,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription {
        if catch_unwind(AssertUnwindSafe(|| callback(current))).is_err() {
            warn!("Observer panicked on initial delivery");
        }
        self.subscribe(callback)
    }

    /// Calls every subscriber with `value`. Returns how many panicked.
    pub fn notify(&self, value: &T) -> usize {
        let callbacks: Vec<Callback<T>> = {
            let subs = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            subs.entries.iter().map(|(_, cb)| cb.clone()).collect()
        };

        let mut failures = 0;
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                failures += 1;
                warn!("Observer panicked; continuing with remaining subscribers");
            }
        }
        failures
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`. Dropping it does not unsubscribe.
#[must_use = "keep the handle to unsubscribe later"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Removes the callback. Later notifications skip it.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
