//! Store - typed facade over a `Storage`
//!
//! Adds selector subscriptions (notify only when the selected slice
//! changes), partial `update` through [`Merge`], and read tracking for
//! computed values.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::StoreSettings;
use crate::error::Result;
use crate::session::{ChangeCallback, Dependency, Session};
use crate::util::CallSite;

use super::guard::{DeepClone, MutationGuard};
use super::key::StoreKey;
use super::listeners::Subscription;
use super::merge::Merge;
use super::storage::{partial_eq, EqualsFn, Factory, KernelStorage, SharedStorage, Storage};

type GuardFn<T> = fn(StoreKey, Factory<T>, EqualsFn<T>, bool) -> Arc<dyn Storage<T>>;

/// Session-scoped, change-notifying value
///
/// Cloning a `Store` yields another handle to the same rows.
pub struct Store<T> {
    storage: Arc<dyn Storage<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Store<T> {
    /// Store whose rows start as a clone of `default`
    pub fn new(default: T) -> Self {
        Self::builder(default).build()
    }

    /// Store whose rows start from `factory(session)`
    pub fn with_factory(factory: impl Fn(&Session) -> Result<T> + Send + Sync + 'static) -> Self {
        Self::builder_with_factory(factory).build()
    }

    pub fn builder(default: T) -> StoreBuilder<T> {
        Self::builder_with_factory(move |_| Ok(default.clone()))
    }

    pub fn builder_with_factory(
        factory: impl Fn(&Session) -> Result<T> + Send + Sync + 'static,
    ) -> StoreBuilder<T> {
        StoreBuilder {
            factory: Arc::new(factory),
            key: None,
            equals: partial_eq(),
            shared: false,
            guard: None,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Wrap an existing storage
    pub fn from_storage(storage: Arc<dyn Storage<T>>) -> Self {
        Self { storage }
    }

    pub fn key(&self) -> &StoreKey {
        self.storage.key()
    }

    /// Current value; inside a computed value this read becomes a dependency
    #[track_caller]
    pub fn get(&self, session: &Session) -> Result<T> {
        let site = CallSite::here();
        session.record_read(|| Arc::new(self.clone()) as Arc<dyn Dependency>);
        self.storage.get(session, site)
    }

    /// Current value without recording a dependency
    #[track_caller]
    pub fn peek(&self, session: &Session) -> Result<T> {
        self.storage.peek(session, CallSite::here())
    }

    #[track_caller]
    pub fn set(&self, session: &Session, value: T) -> Result<()> {
        self.storage.set(session, value, CallSite::here())
    }

    /// Merge `patch` into the current value and write it with one `set()`
    #[track_caller]
    pub fn update(&self, session: &Session, patch: T::Patch) -> Result<()>
    where
        T: Merge,
    {
        let site = CallSite::here();
        let mut patch = Some(patch);
        self.storage.with_lock(session, &mut || {
            let Some(patch) = patch.take() else {
                return Ok(());
            };
            let current = self.storage.peek(session, site)?;
            self.storage.set(session, current.merge(patch), site)
        })
    }

    /// Replace the value with `f(current)` atomically
    #[track_caller]
    pub fn update_with(&self, session: &Session, f: impl FnOnce(&T) -> T) -> Result<()> {
        let site = CallSite::here();
        let mut f = Some(f);
        self.storage.with_lock(session, &mut || {
            let Some(f) = f.take() else {
                return Ok(());
            };
            let current = self.storage.peek(session, site)?;
            self.storage.set(session, f(&current), site)
        })
    }

    /// Reset this session's value to the store default
    pub fn clear(&self, session: &Session) -> Result<()> {
        self.storage.clear(session)
    }

    /// Call `listener(new)` after every change
    pub fn subscribe(
        &self,
        session: &Session,
        listener: impl Fn(&T) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.storage
            .subscribe_change(session, Arc::new(move |new: &T, _old: &T| listener(new)))
    }

    /// Call `listener(new, old)` after every change
    pub fn subscribe_change(
        &self,
        session: &Session,
        listener: impl Fn(&T, &T) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.storage.subscribe_change(session, Arc::new(listener))
    }

    /// Track `selector(value)`; `on_change` runs only when the selected slice changes
    #[track_caller]
    pub fn select<S>(
        &self,
        session: &Session,
        selector: impl Fn(&T) -> S + Send + Sync + 'static,
        on_change: impl Fn(&S) + Send + Sync + 'static,
    ) -> Result<Selection<S>>
    where
        S: Clone + PartialEq + Send + 'static,
    {
        let site = CallSite::here();
        let selector = Arc::new(selector);
        let current = Arc::new(Mutex::new(selector(&self.storage.get(session, site)?)));

        let last = Arc::clone(&current);
        let apply = Arc::new(move |next: S| {
            {
                let mut last = last.lock();
                if *last == next {
                    return;
                }
                *last = next.clone();
            }
            on_change(&next);
        });

        let (listen_selector, listen_apply) = (Arc::clone(&selector), Arc::clone(&apply));
        let subscription = self.storage.subscribe_change(
            session,
            Arc::new(move |new: &T, _old: &T| listen_apply(listen_selector(new))),
        )?;

        // A write between the first read and the subscription fired no listener
        apply(selector(&self.storage.peek(session, site)?));

        Ok(Selection {
            current,
            _subscription: subscription,
        })
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage<T>> {
        &self.storage
    }
}

impl<T: Clone + Send + Sync + 'static> Dependency for Store<T> {
    fn key(&self) -> &StoreKey {
        self.storage.key()
    }

    fn watch(&self, session: &Session, on_change: ChangeCallback) -> Result<Subscription> {
        self.storage
            .subscribe_change(session, Arc::new(move |_: &T, _: &T| on_change()))
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("key", self.storage.key())
            .finish()
    }
}

/// Options for building a [`Store`]
pub struct StoreBuilder<T> {
    factory: Factory<T>,
    key: Option<StoreKey>,
    equals: EqualsFn<T>,
    shared: bool,
    guard: Option<GuardFn<T>>,
}

impl<T: Clone + Send + Sync + 'static> StoreBuilder<T> {
    /// Name the store; handles with the same name and type share rows
    pub fn key(mut self, name: impl Into<Arc<str>>) -> Self {
        self.key = Some(StoreKey::named::<T>(name));
        self
    }

    /// Equality used to skip no-op writes (default: `PartialEq`)
    pub fn equals(mut self, equals: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.equals = Arc::new(equals);
        self
    }

    /// One row for every session instead of one per session
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn build(self) -> Store<T> {
        let key = self.key.unwrap_or_else(StoreKey::anonymous::<T>);
        let storage: Arc<dyn Storage<T>> = match (self.guard, self.shared) {
            (Some(guard), shared) => guard(key, self.factory, self.equals, shared),
            (None, true) => Arc::new(SharedStorage::new(key, self.factory, self.equals)),
            (None, false) => Arc::new(KernelStorage::new(key, self.factory, self.equals)),
        };
        Store { storage }
    }
}

impl<T> StoreBuilder<T>
where
    T: DeepClone + fmt::Debug + Clone + Send + Sync + 'static,
{
    /// Detect in-place mutation of values handed out by the store
    pub fn detect_mutations(mut self, enabled: bool) -> Self {
        self.guard = enabled.then_some(MutationGuard::<T>::storage as GuardFn<T>);
        self
    }

    /// Apply the `[store]` section of the configuration
    pub fn settings(self, settings: &StoreSettings) -> Self {
        self.detect_mutations(settings.mutation_detection)
    }
}

/// Live result of [`Store::select`]; unsubscribes when dropped
pub struct Selection<S> {
    current: Arc<Mutex<S>>,
    _subscription: Subscription,
}

impl<S: Clone> Selection<S> {
    /// Last selected value
    pub fn get(&self) -> S {
        self.current.lock().clone()
    }
}

impl<S: fmt::Debug> fmt::Debug for Selection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("current", &*self.current.lock())
            .finish()
    }
}
