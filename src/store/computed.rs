//! Computed - derived values with automatic dependency tracking
//!
//! The compute function runs with a tracked session; every store it reads
//! with `get()` becomes a dependency. A change to any dependency reruns the
//! function, re-collects dependencies and writes the result into the
//! computed value's own row. Watcher subscriptions live in a session row
//! and go away with the session.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::Session;

use super::key::StoreKey;
use super::listeners::Subscription;
use super::reactive::{Selection, Store};

type ComputeFn<T> = Arc<dyn Fn(&Session) -> Result<T> + Send + Sync>;

#[derive(Default)]
struct Watchers {
    subscriptions: Mutex<Vec<Subscription>>,
    runs: AtomicU64,
}

struct ComputedInner<T> {
    store: Store<T>,
    compute: ComputeFn<T>,
    watchers_key: StoreKey,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ComputedInner<T> {
    /// Run the compute function and (re)subscribe to what it read
    fn evaluate(self: &Arc<Self>, session: &Session) -> Result<T> {
        let (tracked, tracker) = session.tracked();
        let value = (self.compute)(&tracked)?;

        let weak = Arc::downgrade(self);
        let mut subscriptions = Vec::new();
        for dependency in tracker.take() {
            let weak = Weak::clone(&weak);
            let owner = session.untracked();
            subscriptions.push(dependency.watch(
                session,
                Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.refresh(&owner);
                    }
                }),
            )?);
        }

        let watchers = session
            .scope()
            .slot(&self.watchers_key, session, || Ok(Watchers::default()))?;
        watchers.runs.fetch_add(1, Ordering::Relaxed);
        debug!(
            computed = %self.store.key(),
            session = %session.id(),
            dependencies = subscriptions.len(),
            "computed value evaluated"
        );
        let previous = std::mem::replace(&mut *watchers.subscriptions.lock(), subscriptions);
        drop(previous);
        Ok(value)
    }

    fn refresh(self: &Arc<Self>, session: &Session) {
        if session.is_closed() {
            return;
        }
        let outcome = self
            .evaluate(session)
            .and_then(|value| self.store.set(session, value));
        if let Err(err) = outcome {
            warn!(computed = %self.store.key(), session = %session.id(), error = %err, "recompute failed");
        }
    }
}

/// Read-only value derived from other stores
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Computed<T> {
    pub fn new(compute: impl Fn(&Session) -> Result<T> + Send + Sync + 'static) -> Self {
        let compute: ComputeFn<T> = Arc::new(compute);
        let inner = Arc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let weak = Weak::clone(weak);
            let fallback = Arc::clone(&compute);
            let store = Store::with_factory(move |session: &Session| match weak.upgrade() {
                Some(inner) => inner.evaluate(session),
                None => fallback(&session.untracked()),
            });
            let watchers_key = store.key().child::<Watchers>("watchers");
            ComputedInner {
                store,
                compute,
                watchers_key,
            }
        });
        Self { inner }
    }

    /// Current value; tracked like any store read
    #[track_caller]
    pub fn get(&self, session: &Session) -> Result<T> {
        self.inner.store.get(session)
    }

    #[track_caller]
    pub fn peek(&self, session: &Session) -> Result<T> {
        self.inner.store.peek(session)
    }

    pub fn subscribe(
        &self,
        session: &Session,
        listener: impl Fn(&T) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.inner.store.subscribe(session, listener)
    }

    pub fn subscribe_change(
        &self,
        session: &Session,
        listener: impl Fn(&T, &T) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.inner.store.subscribe_change(session, listener)
    }

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
        self.inner.store.select(session, selector, on_change)
    }

    /// Recompute now, regardless of dependency changes
    pub fn invalidate(&self, session: &Session) -> Result<()> {
        let value = self.inner.evaluate(session)?;
        self.inner.store.set(session, value)
    }

    pub fn key(&self) -> &StoreKey {
        self.inner.store.key()
    }

    /// Times the compute function ran in `session`
    pub fn runs(&self, session: &Session) -> u64 {
        session
            .scope()
            .existing_slot::<Watchers>(&self.inner.watchers_key, session)
            .map_or(0, |w| w.runs.load(Ordering::Relaxed))
    }

    /// Stores currently watched in `session`
    pub fn dependency_count(&self, session: &Session) -> usize {
        session
            .scope()
            .existing_slot::<Watchers>(&self.inner.watchers_key, session)
            .map_or(0, |w| w.subscriptions.lock().len())
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("store", &self.inner.store)
            .finish()
    }
}
