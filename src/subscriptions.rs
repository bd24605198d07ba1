//! Disposable handles and the registry a fiber tears down when it stops.

use parking_lot::Mutex;
use std::sync::Arc;

/// A handle whose resource is released by [`dispose`](Disposable::dispose).
///
/// Disposal must be idempotent.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Adapts a closure into a [`Disposable`] that runs it at most once.
pub struct OnDispose {
    callback: Mutex<Option<Box<dyn FnOnce() + Send + 'static>>>,
}

impl OnDispose {
    pub fn new<F>(callback: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(OnDispose {
            callback: Mutex::new(Some(Box::new(callback))),
        })
    }
}

impl Disposable for OnDispose {
    fn dispose(&self) {
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

struct Registry {
    handles: Vec<Arc<dyn Disposable>>,
    disposed: bool,
}

/// Set of subscription handles owned by a fiber.
///
/// Handles are identified by pointer, so deregistration needs the same `Arc`
/// that was registered. Once the registry has been disposed, anything added
/// later is disposed on the spot instead of being retained.
pub struct Subscriptions {
    inner: Mutex<Registry>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Subscriptions {
            inner: Mutex::new(Registry {
                handles: Vec::new(),
                disposed: false,
            }),
        }
    }

    pub fn add(&self, handle: Arc<dyn Disposable>) {
        let mut inner = self.inner.lock();
        if inner.disposed {
            drop(inner);
            handle.dispose();
            return;
        }
        inner.handles.push(handle);
    }

    /// Removes `handle` without disposing it. Returns whether it was present.
    pub fn remove(&self, handle: &Arc<dyn Disposable>) -> bool {
        let mut inner = self.inner.lock();
        match inner.handles.iter().position(|h| same_handle(h, handle)) {
            Some(index) => {
                inner.handles.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Disposes every registered handle and empties the registry.
    ///
    /// Handles are disposed outside the lock so they may call back into the
    /// registry.
    pub fn dispose(&self) {
        let handles = {
            let mut inner = self.inner.lock();
            inner.disposed = true;
            std::mem::take(&mut inner.handles)
        };
        if !handles.is_empty() {
            log::debug!("disposing {} subscription(s)", handles.len());
        }
        for handle in handles {
            handle.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new()
    }
}

fn same_handle(a: &Arc<dyn Disposable>, b: &Arc<dyn Disposable>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandle(AtomicUsize);

    impl Disposable for CountingHandle {
        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> Arc<CountingHandle> {
        Arc::new(CountingHandle(AtomicUsize::new(0)))
    }

    #[test]
    fn test_dispose_all() {
        let subs = Subscriptions::new();
        let a = counting();
        let b = counting();
        subs.add(a.clone());
        subs.add(b.clone());
        assert_eq!(subs.len(), 2);

        subs.dispose();
        assert!(subs.is_empty());
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);

        subs.dispose();
        assert_eq!(a.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_reports_presence() {
        let subs = Subscriptions::new();
        let a = counting();
        let handle: Arc<dyn Disposable> = a.clone();
        subs.add(handle.clone());

        assert!(subs.remove(&handle));
        assert!(!subs.remove(&handle));

        subs.dispose();
        assert_eq!(a.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_add_after_dispose_disposes_immediately() {
        let subs = Subscriptions::new();
        subs.dispose();

        let late = counting();
        subs.add(late.clone());
        assert_eq!(late.0.load(Ordering::SeqCst), 1);
        assert!(subs.is_empty());
    }

    #[test]
    fn test_on_dispose_runs_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let handle = OnDispose::new(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        handle.dispose();
        handle.dispose();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_may_deregister_during_dispose() {
        let subs = Arc::new(Subscriptions::new());
        let subs_clone = subs.clone();
        let other: Arc<dyn Disposable> = counting();
        let other_clone = other.clone();

        subs.add(OnDispose::new(move || {
            assert!(!subs_clone.remove(&other_clone));
        }));
        subs.add(other);
        subs.dispose();
        assert!(subs.is_empty());
    }
}
