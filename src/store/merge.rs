//! Merge - partial updates behind `Store::update`
//!
//! `merge` returns a new value; the store writes it with a single `set()`.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use serde_json::Value;

use super::node::Node;

/// Values that accept a partial patch
///
/// Record structs implement this with their own patch type, typically a
/// struct of `Option` fields.
pub trait Merge: Sized {
    type Patch;

    fn merge(&self, patch: Self::Patch) -> Self;
}

/// Record patches override matching fields; any other patch replaces the node
impl Merge for Node {
    type Patch = Node;

    fn merge(&self, patch: Node) -> Node {
        match (self, patch) {
            (Node::Record(current), Node::Record(fields)) => {
                let mut next = BTreeMap::clone(current);
                for (name, value) in fields.iter() {
                    next.insert(name.clone(), value.clone());
                }
                Node::Record(Arc::new(next))
            }
            (_, replacement) => replacement,
        }
    }
}

/// Object patches override matching keys; any other patch replaces the value
impl Merge for Value {
    type Patch = Value;

    fn merge(&self, patch: Value) -> Value {
        match (self, patch) {
            (Value::Object(current), Value::Object(fields)) => {
                let mut next = current.clone();
                next.extend(fields);
                Value::Object(next)
            }
            (_, replacement) => replacement,
        }
    }
}

impl<K, V> Merge for HashMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    type Patch = HashMap<K, V>;

    fn merge(&self, patch: HashMap<K, V>) -> Self {
        let mut next = self.clone();
        next.extend(patch);
        next
    }
}

impl<K, V> Merge for BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    type Patch = BTreeMap<K, V>;

    fn merge(&self, patch: BTreeMap<K, V>) -> Self {
        let mut next = self.clone();
        next.extend(patch);
        next
    }
}
