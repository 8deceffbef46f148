//! Observer registry shared by accounts, the chain tracker and the payment
//! request monitor.
//!
//! Listeners are notified over a snapshot taken after the caller released its
//! own lock, so a listener may call back into the notifying component. A
//! listener that returns an error or panics is logged and skipped; the rest of
//! the snapshot is still notified.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Registered listeners of one kind
pub struct ListenerRegistry<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener; registering the same listener twice is a no-op
    pub fn add(&self, listener: Arc<L>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Unregister a listener, returning whether it was registered
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Copy of the current registrations
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners.lock().clone()
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener in the snapshot, isolating failures
    pub fn notify<F>(&self, event: &str, mut call: F)
    where
        F: FnMut(&L) -> anyhow::Result<()>,
    {
        for listener in self.snapshot() {
            match catch_unwind(AssertUnwindSafe(|| call(&listener))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(event, error = %e, "Listener failed");
                }
                Err(_) => {
                    tracing::error!(event, "Listener panicked");
                }
            }
        }
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn hit(&self) -> anyhow::Result<()>;
    }

    struct Counting(AtomicUsize);

    impl Counter for Counting {
        fn hit(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl Counter for Failing {
        fn hit(&self) -> anyhow::Result<()> {
            anyhow::bail!("listener broke")
        }
    }

    struct Panicking;

    impl Counter for Panicking {
        fn hit(&self) -> anyhow::Result<()> {
            panic!("listener panicked")
        }
    }

    #[test]
    fn test_failures_are_isolated() {
        let registry: ListenerRegistry<dyn Counter> = ListenerRegistry::new();
        let counting = Arc::new(Counting(AtomicUsize::new(0)));

        registry.add(Arc::new(Failing));
        registry.add(Arc::new(Panicking));
        registry.add(counting.clone());

        registry.notify("hit", |l| l.hit());
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_add_remove() {
        let registry: ListenerRegistry<dyn Counter> = ListenerRegistry::new();
        let counting: Arc<dyn Counter> = Arc::new(Counting(AtomicUsize::new(0)));

        registry.add(counting.clone());
        registry.add(counting.clone());
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&counting));
        assert!(!registry.remove(&counting));
        assert!(registry.is_empty());
    }
}
