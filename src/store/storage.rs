//! Storage - change-notifying value cells
//!
//! A [`Storage`] owns one [`Row`] per session (or a single shared row).
//! Writers serialise on the row's reentrant lock, so a listener fired from
//! `set()` may call `set()` on the same row again from the same thread.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;

use crate::error::Result;
use crate::session::Session;
use crate::util::CallSite;

use super::key::StoreKey;
use super::listeners::{Listener, ListenerSet, Subscription};

/// Produces a row's initial value on first access in a session
pub type Factory<T> = Arc<dyn Fn(&Session) -> Result<T> + Send + Sync>;

/// Equality used to suppress no-op writes
pub type EqualsFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

pub(crate) fn partial_eq<T: PartialEq + 'static>() -> EqualsFn<T> {
    Arc::new(|a: &T, b: &T| a == b)
}

/// Change-notifying cell holding one value per session
pub trait Storage<T>: Send + Sync {
    fn key(&self) -> &StoreKey;

    /// Current value, initialising the row from the factory if missing
    fn get(&self, session: &Session, site: CallSite) -> Result<T>;

    /// Same as `get`; callers use it for reads that must not become dependencies
    fn peek(&self, session: &Session, site: CallSite) -> Result<T>;

    /// Replace the value; listeners fire with `(new, old)` unless they are equal
    fn set(&self, session: &Session, value: T, site: CallSite) -> Result<()>;

    fn subscribe_change(&self, session: &Session, listener: Listener<T>) -> Result<Subscription>;

    /// Run `f` holding the row lock, making read-modify-write sequences atomic
    fn with_lock(&self, session: &Session, f: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// Reset the row to the factory value (listeners fire if it changed)
    fn clear(&self, session: &Session) -> Result<()>;
}

/// One value slot with its writer lock and listeners
pub(crate) struct Row<T> {
    lock: ReentrantMutex<()>,
    value: Mutex<T>,
    listeners: ListenerSet<T>,
}

impl<T: Clone + Send + 'static> Row<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            lock: ReentrantMutex::new(()),
            value: Mutex::new(value),
            listeners: ListenerSet::new(),
        }
    }

    pub(crate) fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Returns false when `value` equals the current value (nothing written)
    pub(crate) fn set(&self, value: T, equals: &EqualsFn<T>) -> bool {
        let _writer = self.lock.lock();
        let old = {
            let mut current = self.value.lock();
            if equals(&current, &value) {
                return false;
            }
            std::mem::replace(&mut *current, value.clone())
        };
        self.listeners.fire(&value, &old);
        true
    }

    pub(crate) fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _writer = self.lock.lock();
        f()
    }

    pub(crate) fn subscribe(&self, listener: Listener<T>) -> Subscription {
        self.listeners.add(listener)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Session-scoped storage: one row per `(key, session)` in the `SessionScope`
pub struct KernelStorage<T> {
    key: StoreKey,
    factory: Factory<T>,
    equals: EqualsFn<T>,
}

impl<T: Clone + Send + Sync + 'static> KernelStorage<T> {
    pub fn new(key: StoreKey, factory: Factory<T>, equals: EqualsFn<T>) -> Self {
        Self {
            key,
            factory,
            equals,
        }
    }

    fn row(&self, session: &Session) -> Result<Arc<Row<T>>> {
        session
            .scope()
            .slot(&self.key, session, || Ok(Row::new((self.factory)(session)?)))
    }

    /// Number of listeners on this session's row (0 if the row does not exist)
    pub fn listener_count(&self, session: &Session) -> usize {
        session
            .scope()
            .existing_slot::<Row<T>>(&self.key, session)
            .map_or(0, |row| row.listener_count())
    }
}

impl<T: Clone + Send + Sync + 'static> Storage<T> for KernelStorage<T> {
    fn key(&self) -> &StoreKey {
        &self.key
    }

    fn get(&self, session: &Session, _site: CallSite) -> Result<T> {
        Ok(self.row(session)?.get())
    }

    fn peek(&self, session: &Session, _site: CallSite) -> Result<T> {
        Ok(self.row(session)?.get())
    }

    fn set(&self, session: &Session, value: T, site: CallSite) -> Result<()> {
        if self.row(session)?.set(value, &self.equals) {
            debug!(store = %self.key, session = %session.id(), %site, "store changed");
        }
        Ok(())
    }

    fn subscribe_change(&self, session: &Session, listener: Listener<T>) -> Result<Subscription> {
        Ok(self.row(session)?.subscribe(listener))
    }

    fn with_lock(&self, session: &Session, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.row(session)?.with_lock(f)
    }

    fn clear(&self, session: &Session) -> Result<()> {
        let row = self.row(session)?;
        row.with_lock(|| -> Result<()> {
            let fresh = (self.factory)(session)?;
            row.set(fresh, &self.equals);
            Ok(())
        })
    }
}

impl<T> fmt::Debug for KernelStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelStorage").field("key", &self.key).finish()
    }
}

/// Storage with a single row shared by every session
pub struct SharedStorage<T> {
    key: StoreKey,
    factory: Factory<T>,
    equals: EqualsFn<T>,
    row: OnceCell<Arc<Row<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SharedStorage<T> {
    pub fn new(key: StoreKey, factory: Factory<T>, equals: EqualsFn<T>) -> Self {
        Self {
            key,
            factory,
            equals,
            row: OnceCell::new(),
        }
    }

    /// The shared row, created from the first session that touches it
    fn row(&self, session: &Session) -> Result<&Arc<Row<T>>> {
        self.row
            .get_or_try_init(|| Ok(Arc::new(Row::new((self.factory)(session)?))))
    }

    pub fn listener_count(&self) -> usize {
        self.row.get().map_or(0, |row| row.listener_count())
    }
}

impl<T: Clone + Send + Sync + 'static> Storage<T> for SharedStorage<T> {
    fn key(&self) -> &StoreKey {
        &self.key
    }

    fn get(&self, session: &Session, _site: CallSite) -> Result<T> {
        Ok(self.row(session)?.get())
    }

    fn peek(&self, session: &Session, _site: CallSite) -> Result<T> {
        Ok(self.row(session)?.get())
    }

    fn set(&self, session: &Session, value: T, site: CallSite) -> Result<()> {
        if self.row(session)?.set(value, &self.equals) {
            debug!(store = %self.key, shared = true, %site, "store changed");
        }
        Ok(())
    }

    fn subscribe_change(&self, session: &Session, listener: Listener<T>) -> Result<Subscription> {
        Ok(self.row(session)?.subscribe(listener))
    }

    fn with_lock(&self, session: &Session, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.row(session)?.with_lock(f)
    }

    fn clear(&self, session: &Session) -> Result<()> {
        let row = self.row(session)?;
        row.with_lock(|| -> Result<()> {
            let fresh = (self.factory)(session)?;
            row.set(fresh, &self.equals);
            Ok(())
        })
    }
}

impl<T> fmt::Debug for SharedStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStorage")
            .field("key", &self.key)
            .field("initialised", &self.row.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionScope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn site() -> CallSite {
        CallSite::here()
    }

    fn kernel(default: i32) -> KernelStorage<i32> {
        KernelStorage::new(
            StoreKey::anonymous::<i32>(),
            Arc::new(move |_| Ok(default)),
            partial_eq(),
        )
    }

    #[test]
    fn get_initialises_from_factory() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let storage = kernel(3);
        assert_eq!(storage.get(&session, site()).unwrap(), 3);
    }

    #[test]
    fn equal_set_does_not_notify() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let storage = kernel(1);
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let _sub = storage
            .subscribe_change(
                &session,
                Arc::new(move |_, _| {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        storage.set(&session, 1, site()).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        storage.set(&session, 2, site()).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_set_same_row() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let storage = Arc::new(kernel(0));

        let inner = Arc::clone(&storage);
        let inner_session = session.clone();
        storage
            .subscribe_change(
                &session,
                Arc::new(move |new: &i32, _| {
                    if *new < 5 {
                        inner.set(&inner_session, new + 1, CallSite::here()).unwrap();
                    }
                }),
            )
            .unwrap()
            .detach();

        storage.set(&session, 1, site()).unwrap();
        assert_eq!(storage.get(&session, site()).unwrap(), 5);
    }

    #[test]
    fn shared_storage_ignores_session() {
        let scope = SessionScope::new();
        let a = scope.open_session();
        let b = scope.open_session();
        let storage = SharedStorage::new(
            StoreKey::anonymous::<String>(),
            Arc::new(|_| Ok(String::from("init"))),
            partial_eq(),
        );

        storage.set(&a, "from a".to_string(), site()).unwrap();
        assert_eq!(storage.get(&b, site()).unwrap(), "from a");
    }

    #[test]
    fn clear_restores_default_and_keeps_listeners() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let storage = kernel(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = storage
            .subscribe_change(&session, Arc::new(move |new, old| sink.lock().push((*new, *old))))
            .unwrap();

        storage.set(&session, 11, site()).unwrap();
        storage.clear(&session).unwrap();

        assert_eq!(storage.get(&session, site()).unwrap(), 10);
        assert_eq!(*seen.lock(), vec![(11, 10), (10, 11)]);
    }

    #[test]
    fn with_lock_serialises_read_modify_write() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let storage = Arc::new(kernel(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = Arc::clone(&storage);
                let session = session.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        storage
                            .with_lock(&session, &mut || {
                                let v = storage.peek(&session, CallSite::here())?;
                                storage.set(&session, v + 1, CallSite::here())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.get(&session, site()).unwrap(), 800);
    }

    #[test]
    fn listener_count_tracks_subscriptions() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let storage = kernel(0);
        assert_eq!(storage.listener_count(&session), 0);
        let sub = storage.subscribe_change(&session, Arc::new(|_, _| {})).unwrap();
        assert_eq!(storage.listener_count(&session), 1);
        drop(sub);
        assert_eq!(storage.listener_count(&session), 0);
    }
}
