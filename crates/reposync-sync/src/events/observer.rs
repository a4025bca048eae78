//! Observer registration with unsubscribe handles

use std::sync::{Arc, Mutex, Weak};

use crate::lock;

/// Receives a stream of values
pub trait IObserver<T>: Send + Sync {
    /// Called for every value
    fn on_next(&self, value: &T);

    /// Called once when the stream ends
    fn on_completed(&self) {}
}

/// Adapts a closure into an observer
struct FnObserver<F>(F);

impl<T, F> IObserver<T> for FnObserver<F>
where
    F: Fn(&T) + Send + Sync,
{
    fn on_next(&self, value: &T) {
        (self.0)(value)
    }
}

/// Wrap a closure as an observer that ignores completion
pub fn observer_fn<T, F>(f: F) -> Arc<dyn IObserver<T>>
where
    T: 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(FnObserver(f))
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle returned by `subscribe`
///
/// Dropping the handle unsubscribes, as does calling
/// [`unsubscribe`](Subscription::unsubscribe).
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that is not attached to anything
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Stop delivery to the observer
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ============================================================================
// ObserverList
// ============================================================================

struct Slots<T> {
    next_id: u64,
    observers: Vec<(u64, Arc<dyn IObserver<T>>)>,
    completed: bool,
}

/// Thread-safe list of observers
///
/// Notifications are delivered outside the internal lock, so an observer
/// may subscribe or unsubscribe from within `on_next`.
pub struct ObserverList<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: 'static> ObserverList<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                observers: Vec::new(),
                completed: false,
            })),
        }
    }

    /// Register an observer
    ///
    /// Subscribing to a completed list signals completion right away.
    pub fn subscribe(&self, observer: Arc<dyn IObserver<T>>) -> Subscription {
        let id = {
            let mut slots = lock(&self.slots);
            if slots.completed {
                drop(slots);
                observer.on_completed();
                return Subscription::empty();
            }
            let id = slots.next_id;
            slots.next_id += 1;
            slots.observers.push((id, observer));
            id
        };

        let weak: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = weak.upgrade() {
                lock(&slots).observers.retain(|(slot_id, _)| *slot_id != id);
            }
        })
    }

    /// Deliver a value to every registered observer
    pub fn notify(&self, value: &T) {
        for observer in self.snapshot() {
            observer.on_next(value);
        }
    }

    /// Signal completion and drop all observers
    pub fn complete(&self) {
        let observers = {
            let mut slots = lock(&self.slots);
            if slots.completed {
                return;
            }
            slots.completed = true;
            std::mem::take(&mut slots.observers)
        };
        for (_, observer) in observers {
            observer.on_completed();
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn IObserver<T>>> {
        lock(&self.slots)
            .observers
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect()
    }
}

impl<T: 'static> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}
