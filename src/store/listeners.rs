//! Listener sets and RAII subscriptions
//!
//! Registration and removal lock the set; firing works on a snapshot taken
//! under the lock and invoked after releasing it. A listener added while a
//! fire is in flight is first called on the next fire.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Change listener: `(new, old)`
pub type Listener<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

struct Entries<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// Ordered set of change listeners for one row
pub(crate) struct ListenerSet<T> {
    entries: Arc<Mutex<Entries<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub(crate) fn add(&self, listener: Listener<T>) -> Subscription {
        let id = {
            let mut entries = self.entries.lock();
            let id = entries.next_id;
            entries.next_id += 1;
            entries.listeners.push((id, listener));
            id
        };

        let weak: Weak<Mutex<Entries<T>>> = Arc::downgrade(&self.entries);
        Subscription::new(move || {
            if let Some(entries) = weak.upgrade() {
                entries.lock().listeners.retain(|(other, _)| *other != id);
            }
        })
    }

    /// Call every listener registered when the fire started, in registration order
    pub(crate) fn fire(&self, new: &T, old: &T) {
        let snapshot: Vec<Listener<T>> = self
            .entries
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(new, old);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().listeners.len()
    }
}

/// Handle to a registered listener; unsubscribes when dropped
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Subscription that owns nothing
    pub fn empty() -> Self {
        Self { unsubscribe: None }
    }

    /// Bundle several subscriptions into one
    pub fn all(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || drop(subscriptions))
    }

    /// Keep the listener registered for the lifetime of its row
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }

    /// Unsubscribe now
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Listener<i32>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let listener: Listener<i32> = Arc::new(move |_, _| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn fire_calls_listeners_in_order() {
        let set = ListenerSet::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for tag in 0..3 {
            let seen = Arc::clone(&seen);
            subs.push(set.add(Arc::new(move |new, old| seen.lock().push((tag, *new, *old)))));
        }

        set.fire(&2, &1);
        assert_eq!(*seen.lock(), vec![(0, 2, 1), (1, 2, 1), (2, 2, 1)]);
    }

    #[test]
    fn drop_unsubscribes() {
        let set = ListenerSet::<i32>::new();
        let (count, listener) = counter();
        let sub = set.add(listener);
        set.fire(&1, &0);
        drop(sub);
        set.fire(&2, &1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn detach_keeps_listener() {
        let set = ListenerSet::<i32>::new();
        let (count, listener) = counter();
        set.add(listener).detach();
        set.fire(&1, &0);
        set.fire(&2, &1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listener_added_during_fire_waits_for_next_fire() {
        let set = Arc::new(ListenerSet::<i32>::new());
        let (late_count, late) = counter();
        let held = Arc::new(Mutex::new(Vec::new()));

        let set_in = Arc::clone(&set);
        let held_in = Arc::clone(&held);
        let _outer = set.add(Arc::new(move |_, _| {
            if held_in.lock().is_empty() {
                held_in.lock().push(set_in.add(Arc::clone(&late)));
            }
        }));

        set.fire(&1, &0);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);
        set.fire(&2, &1);
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_outliving_set_is_inert() {
        let set = ListenerSet::<i32>::new();
        let (_count, listener) = counter();
        let sub = set.add(listener);
        drop(set);
        drop(sub);
    }
}
