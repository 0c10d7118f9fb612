//! StoreKey - identity of a store across handles and sessions

use std::any::{type_name, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ANONYMOUS: AtomicU64 = AtomicU64::new(0);

/// `(value type, name)` pair selecting a store's rows
///
/// Two handles built with the same name and value type share their rows.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    type_id: TypeId,
    type_name: &'static str,
    name: Arc<str>,
}

impl StoreKey {
    /// Key with a caller-chosen name
    pub fn named<T: 'static>(name: impl Into<Arc<str>>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: name.into(),
        }
    }

    /// Key unique to this process, named `<type>:<counter>`
    pub fn anonymous<T: 'static>() -> Self {
        let id = NEXT_ANONYMOUS.fetch_add(1, Ordering::Relaxed);
        Self::named::<T>(format!("{}:{}", short_type_name(type_name::<T>()), id))
    }

    /// Derived key for bookkeeping rows owned by this store (e.g. "watchers")
    pub(crate) fn child<U: 'static>(&self, suffix: &str) -> StoreKey {
        Self::named::<U>(format!("{}#{}", self.name, suffix))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// `alloc::vec::Vec<i32>` → `Vec<i32>`
fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({} as {})", self.name, self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_and_type_are_equal() {
        assert_eq!(StoreKey::named::<u32>("count"), StoreKey::named::<u32>("count"));
    }

    #[test]
    fn same_name_different_type_differ() {
        assert_ne!(StoreKey::named::<u32>("count"), StoreKey::named::<i64>("count"));
    }

    #[test]
    fn anonymous_keys_are_unique() {
        let a = StoreKey::anonymous::<Vec<i32>>();
        let b = StoreKey::anonymous::<Vec<i32>>();
        assert_ne!(a, b);
        assert!(a.name().starts_with("Vec<i32>:"), "{}", a.name());
    }

    #[test]
    fn child_key_extends_name() {
        let key = StoreKey::named::<u32>("total");
        let child = key.child::<String>("watchers");
        assert_eq!(child.name(), "total#watchers");
        assert_ne!(child, key);
    }
}
