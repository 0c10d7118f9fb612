//! MutationGuard - detects in-place mutation of handed-out values
//!
//! Each row holds a [`StoreValueRecord`]: the canonical `private` value, the
//! `public` deep copy given to readers and the raw `set_value` passed to the
//! last `set()`. Every access first compares both against `private`; a
//! difference means someone changed a value outside of `set()`.
//!
//! Only values with shared interior state can change behind the store's
//! back, so the usual guarded type is [`Shared<T>`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::error::{MutationError, Result};
use crate::session::Session;
use crate::util::CallSite;

use super::key::StoreKey;
use super::listeners::{Listener, Subscription};
use super::node::Node;
use super::storage::{EqualsFn, Factory, KernelStorage, SharedStorage, Storage};

/// Copy that shares no mutable state with the original
pub trait DeepClone {
    fn deep_clone(&self) -> Self;
}

macro_rules! deep_clone_by_clone {
    ($($ty:ty),* $(,)?) => {
        $(impl DeepClone for $ty {
            fn deep_clone(&self) -> Self {
                self.clone()
            }
        })*
    };
}

deep_clone_by_clone!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, serde_json::Value,
);

impl DeepClone for Node {
    fn deep_clone(&self) -> Self {
        self.deep_copy()
    }
}

impl<T: DeepClone> DeepClone for Option<T> {
    fn deep_clone(&self) -> Self {
        self.as_ref().map(DeepClone::deep_clone)
    }
}

impl<T: DeepClone> DeepClone for Vec<T> {
    fn deep_clone(&self) -> Self {
        self.iter().map(DeepClone::deep_clone).collect()
    }
}

impl<K: Clone + Eq + Hash, V: DeepClone> DeepClone for HashMap<K, V> {
    fn deep_clone(&self) -> Self {
        self.iter().map(|(k, v)| (k.clone(), v.deep_clone())).collect()
    }
}

impl<K: Clone + Ord, V: DeepClone> DeepClone for BTreeMap<K, V> {
    fn deep_clone(&self) -> Self {
        self.iter().map(|(k, v)| (k.clone(), v.deep_clone())).collect()
    }
}

/// Value with shared, mutable interior
///
/// Clones share the same cell; [`DeepClone`] makes a fresh one. Equality
/// compares contents.
pub struct Shared<T> {
    cell: Arc<RwLock<T>>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: Arc::new(RwLock::new(value)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.cell.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.cell.write()
    }

    /// Whether both handles point at the same cell
    pub fn same_cell(&self, other: &Shared<T>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone> DeepClone for Shared<T> {
    fn deep_clone(&self) -> Self {
        Shared::new(self.read().clone())
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.same_cell(other) {
            return true;
        }
        *self.read() == *other.read()
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read().fmt(f)
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Shared::new(T::default())
    }
}

/// Row content of a guarded store
pub struct StoreValueRecord<T> {
    private: T,
    public: Mutex<Option<T>>,
    get_site: Mutex<Option<CallSite>>,
    set_value: Option<T>,
    set_site: Option<CallSite>,
}

impl<T> StoreValueRecord<T> {
    fn initial(private: T) -> Self {
        Self {
            private,
            public: Mutex::new(None),
            get_site: Mutex::new(None),
            set_value: None,
            set_site: None,
        }
    }

    /// Value listeners see: the raw set value, else the private value
    fn visible(&self) -> &T {
        self.set_value.as_ref().unwrap_or(&self.private)
    }

    pub fn private(&self) -> &T {
        &self.private
    }

    pub fn set_site(&self) -> Option<CallSite> {
        self.set_site
    }

    pub fn get_site(&self) -> Option<CallSite> {
        *self.get_site.lock()
    }
}

impl<T: fmt::Debug> fmt::Debug for StoreValueRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreValueRecord")
            .field("private", &self.private)
            .field("public", &*self.public.lock())
            .field("set_value", &self.set_value)
            .field("get_site", &*self.get_site.lock())
            .field("set_site", &self.set_site)
            .finish()
    }
}

type Record<T> = Arc<StoreValueRecord<T>>;

/// `Storage<T>` that checks handed-out values for in-place mutation
pub struct MutationGuard<T> {
    key: StoreKey,
    backing: Arc<dyn Storage<Record<T>>>,
    equals: EqualsFn<T>,
    checking: AtomicBool,
    warned: Once,
}

impl<T> MutationGuard<T>
where
    T: DeepClone + fmt::Debug + Clone + Send + Sync + 'static,
{
    /// Guard over session-scoped rows
    pub fn scoped(key: StoreKey, factory: Factory<T>, equals: EqualsFn<T>) -> Self {
        let (backing_factory, backing_equals) = Self::backing_parts(factory, &equals);
        let backing = KernelStorage::new(
            key.child::<Record<T>>("guarded"),
            backing_factory,
            backing_equals,
        );
        Self::over(key, Arc::new(backing), equals)
    }

    /// Guard over a single row shared by every session
    pub fn shared(key: StoreKey, factory: Factory<T>, equals: EqualsFn<T>) -> Self {
        let (backing_factory, backing_equals) = Self::backing_parts(factory, &equals);
        let backing = SharedStorage::new(
            key.child::<Record<T>>("guarded"),
            backing_factory,
            backing_equals,
        );
        Self::over(key, Arc::new(backing), equals)
    }

    pub(crate) fn storage(
        key: StoreKey,
        factory: Factory<T>,
        equals: EqualsFn<T>,
        shared: bool,
    ) -> Arc<dyn Storage<T>> {
        if shared {
            Arc::new(Self::shared(key, factory, equals))
        } else {
            Arc::new(Self::scoped(key, factory, equals))
        }
    }

    fn over(key: StoreKey, backing: Arc<dyn Storage<Record<T>>>, equals: EqualsFn<T>) -> Self {
        Self {
            key,
            backing,
            equals,
            checking: AtomicBool::new(true),
            warned: Once::new(),
        }
    }

    fn backing_parts(factory: Factory<T>, equals: &EqualsFn<T>) -> (Factory<Record<T>>, EqualsFn<Record<T>>) {
        let backing_factory: Factory<Record<T>> = Arc::new(move |session: &Session| {
            Ok(Arc::new(StoreValueRecord::initial(factory(session)?)))
        });
        let equals = Arc::clone(equals);
        let backing_equals: EqualsFn<Record<T>> =
            Arc::new(move |a: &Record<T>, b: &Record<T>| equals(&a.private, &b.private));
        (backing_factory, backing_equals)
    }

    /// False once a deep copy compared unequal to its source
    pub fn is_checking(&self) -> bool {
        self.checking.load(Ordering::Relaxed)
    }

    /// Deep copy of `value`, or `None` (and checking disabled) if the copy is unequal
    fn checked_copy(&self, value: &T) -> Option<T> {
        let copy = value.deep_clone();
        if (self.equals)(&copy, value) {
            return Some(copy);
        }
        self.checking.store(false, Ordering::Relaxed);
        self.warned.call_once(|| {
            warn!(
                store = %self.key,
                value = ?value,
                "a deep copy compared unequal to its source; mutation detection disabled for this store"
            );
        });
        None
    }

    fn check_mutations(&self, record: &StoreValueRecord<T>) -> Result<()> {
        if !self.is_checking() {
            return Ok(());
        }

        if let Some(public) = record.public.lock().as_ref() {
            if !(self.equals)(public, &record.private) {
                return Err(MutationError::MutatedAfterRead {
                    private: format!("{:?}", record.private),
                    public: format!("{public:?}"),
                    site: record.get_site(),
                }
                .into());
            }
        }

        if let Some(set_value) = &record.set_value {
            if !(self.equals)(set_value, &record.private) {
                return Err(MutationError::MutatedAfterSet {
                    private: format!("{:?}", record.private),
                    set_value: format!("{set_value:?}"),
                    site: record.set_site,
                }
                .into());
            }
        }

        Ok(())
    }

    fn expose(&self, record: &StoreValueRecord<T>, site: CallSite) -> Result<T> {
        self.check_mutations(record)?;
        if !self.is_checking() {
            return Ok(record.private.deep_clone());
        }

        let mut public = record.public.lock();
        if let Some(existing) = public.as_ref() {
            return Ok(existing.clone());
        }
        match self.checked_copy(&record.private) {
            Some(copy) => {
                *public = Some(copy.clone());
                *record.get_site.lock() = Some(site);
                Ok(copy)
            }
            None => Ok(record.private.deep_clone()),
        }
    }
}

impl<T> Storage<T> for MutationGuard<T>
where
    T: DeepClone + fmt::Debug + Clone + Send + Sync + 'static,
{
    fn key(&self) -> &StoreKey {
        &self.key
    }

    fn get(&self, session: &Session, site: CallSite) -> Result<T> {
        let record = self.backing.get(session, site)?;
        self.expose(&record, site)
    }

    fn peek(&self, session: &Session, site: CallSite) -> Result<T> {
        let record = self.backing.peek(session, site)?;
        self.expose(&record, site)
    }

    fn set(&self, session: &Session, value: T, site: CallSite) -> Result<()> {
        let current = self.backing.peek(session, site)?;
        self.check_mutations(&current)?;

        let private = self
            .checked_copy(&value)
            .unwrap_or_else(|| value.deep_clone());
        let record = StoreValueRecord {
            private,
            public: Mutex::new(None),
            get_site: Mutex::new(None),
            set_value: Some(value),
            set_site: Some(site),
        };
        self.backing.set(session, Arc::new(record), site)
    }

    fn subscribe_change(&self, session: &Session, listener: Listener<T>) -> Result<Subscription> {
        self.backing.subscribe_change(
            session,
            Arc::new(move |new: &Record<T>, old: &Record<T>| {
                listener(new.visible(), old.visible());
            }),
        )
    }

    fn with_lock(&self, session: &Session, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.backing.with_lock(session, f)
    }

    fn clear(&self, session: &Session) -> Result<()> {
        self.backing.clear(session)
    }
}

impl<T> fmt::Debug for MutationGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationGuard")
            .field("key", &self.key)
            .field("checking", &self.checking.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionScope;
    use crate::store::partial_eq;

    fn guard(default: Vec<i32>) -> MutationGuard<Shared<Vec<i32>>> {
        MutationGuard::scoped(
            StoreKey::anonymous::<Shared<Vec<i32>>>(),
            Arc::new(move |_| Ok(Shared::new(default.clone()))),
            partial_eq(),
        )
    }

    #[test]
    fn untouched_reads_pass() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let guard = guard(vec![1, 2]);

        let a = guard.get(&session, CallSite::here()).unwrap();
        let b = guard.peek(&session, CallSite::here()).unwrap();
        assert_eq!(*a.read(), vec![1, 2]);
        assert!(a.same_cell(&b));
    }

    #[test]
    fn mutation_after_read_names_read_site() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let guard = guard(vec![1, 2]);

        let read_site = CallSite::new("src/widgets.rs", 40, 9);
        let value = guard.get(&session, read_site).unwrap();
        value.write().push(3);

        let err = guard.peek(&session, CallSite::here()).unwrap_err();
        match err {
            crate::TesseraError::Mutation(MutationError::MutatedAfterRead { site, public, .. }) => {
                assert_eq!(site, Some(read_site));
                assert_eq!(public, "[1, 2, 3]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn mutation_after_set_names_set_site() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let guard = guard(vec![]);

        let mine = Shared::new(vec![7]);
        let set_site = CallSite::new("src/form.rs", 3, 1);
        guard.set(&session, mine.clone(), set_site).unwrap();
        mine.write().clear();

        let err = guard.get(&session, CallSite::here()).unwrap_err();
        match err {
            crate::TesseraError::Mutation(MutationError::MutatedAfterSet { site, .. }) => {
                assert_eq!(site, Some(set_site));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn set_stores_private_copy() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let guard = guard(vec![]);

        let mine = Shared::new(vec![1]);
        guard.set(&session, mine.clone(), CallSite::here()).unwrap();
        let read = guard.get(&session, CallSite::here()).unwrap();
        assert!(!read.same_cell(&mine));
        assert_eq!(read, mine);
    }

    #[test]
    fn listeners_receive_set_values() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let guard = guard(vec![0]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = guard
            .subscribe_change(
                &session,
                Arc::new(move |new: &Shared<Vec<i32>>, old: &Shared<Vec<i32>>| {
                    sink.lock().push((new.clone(), old.read().clone()));
                }),
            )
            .unwrap();

        let first = Shared::new(vec![1]);
        guard.set(&session, first.clone(), CallSite::here()).unwrap();
        let second = Shared::new(vec![2]);
        guard.set(&session, second.clone(), CallSite::here()).unwrap();

        let seen = seen.lock();
        assert!(seen[0].0.same_cell(&first));
        assert_eq!(seen[0].1, vec![0]);
        assert!(seen[1].0.same_cell(&second));
        assert_eq!(seen[1].1, vec![1]);
    }

    #[test]
    fn unequal_copy_disables_checking() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        // NaN never equals itself, so every deep copy looks unequal
        let guard = MutationGuard::scoped(
            StoreKey::anonymous::<Vec<f64>>(),
            Arc::new(|_| Ok(vec![f64::NAN])),
            partial_eq(),
        );

        let first = guard.get(&session, CallSite::here()).unwrap();
        assert!(first[0].is_nan());
        assert!(!guard.is_checking());
        guard.set(&session, vec![1.0], CallSite::here()).unwrap();
        assert_eq!(guard.get(&session, CallSite::here()).unwrap(), vec![1.0]);
    }

    #[test]
    fn reads_stay_isolated_after_checking_is_disabled() {
        let scope = SessionScope::new();
        let session = scope.open_session();
        let guard = MutationGuard::scoped(
            StoreKey::anonymous::<Shared<Vec<f64>>>(),
            Arc::new(|_| Ok(Shared::new(vec![f64::NAN]))),
            partial_eq(),
        );

        let first = guard.get(&session, CallSite::here()).unwrap();
        assert!(!guard.is_checking());
        first.write().push(1.0);

        let second = guard.get(&session, CallSite::here()).unwrap();
        assert_eq!(second.read().len(), 1);
        assert!(!second.same_cell(&first));

        let stored = Shared::new(vec![f64::NAN]);
        guard.set(&session, stored.clone(), CallSite::here()).unwrap();
        stored.write().push(2.0);
        assert_eq!(guard.peek(&session, CallSite::here()).unwrap().read().len(), 1);
    }

    #[test]
    fn shared_guard_spans_sessions() {
        let scope = SessionScope::new();
        let a = scope.open_session();
        let b = scope.open_session();
        let guard = MutationGuard::shared(
            StoreKey::anonymous::<Vec<i32>>(),
            Arc::new(|_| Ok(vec![])),
            partial_eq(),
        );
        guard.set(&a, vec![4], CallSite::here()).unwrap();
        assert_eq!(guard.get(&b, CallSite::here()).unwrap(), vec![4]);
    }
}
