//! Node - structured value with shared subtrees
//!
//! Lists and records hold their children behind `Arc`, so cloning a `Node` is
//! O(1) and replacing one child leaves every sibling pointer-identical.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dynamically typed value stored in a `Store<Node>`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Vec<Node>>),
    Record(Arc<BTreeMap<String, Node>>),
}

impl Node {
    /// Record from `(key, value)` pairs
    pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Node
    where
        K: Into<String>,
        V: Into<Node>,
    {
        Node::Record(Arc::new(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn list<V: Into<Node>>(items: impl IntoIterator<Item = V>) -> Node {
        Node::List(Arc::new(items.into_iter().map(Into::into).collect()))
    }

    /// Name of the variant, used in traversal errors
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Bool(_) => "bool",
            Node::Int(_) => "int",
            Node::Float(_) => "float",
            Node::Str(_) => "string",
            Node::List(_) => "list",
            Node::Record(_) => "record",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Node::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Node::Float(f) => Some(*f),
            Node::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Str(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Record(fields) => Some(&**fields),
            _ => None,
        }
    }

    /// Identity comparison: true when both nodes share the same allocation
    ///
    /// Scalars have no allocation and compare by value.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        match (self, other) {
            (Node::Str(a), Node::Str(b)) => Arc::ptr_eq(a, b),
            (Node::List(a), Node::List(b)) => Arc::ptr_eq(a, b),
            (Node::Record(a), Node::Record(b)) => Arc::ptr_eq(a, b),
            (Node::List(_) | Node::Record(_) | Node::Str(_), _) => false,
            (a, b) => a == b,
        }
    }

    /// Copy of this node that shares no allocation with it
    pub fn deep_copy(&self) -> Node {
        match self {
            Node::Str(s) => Node::Str(Arc::from(&**s)),
            Node::List(items) => Node::List(Arc::new(items.iter().map(Node::deep_copy).collect())),
            Node::Record(fields) => Node::Record(Arc::new(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect(),
            )),
            scalar => scalar.clone(),
        }
    }
}

/// Values a lens can walk into by field name or list index
///
/// `with_*` return a new value differing from `self` only at the given
/// position; they return `None` when `self` has the wrong shape or the
/// index is out of range.
pub trait Structured: Sized {
    fn kind(&self) -> &'static str;

    fn is_record(&self) -> bool;

    fn is_list(&self) -> bool;

    fn get_field(&self, name: &str) -> Option<&Self>;

    /// Replace or insert field `name`
    fn with_field(&self, name: &str, value: Self) -> Option<Self>;

    fn get_index(&self, index: usize) -> Option<&Self>;

    fn with_index(&self, index: usize, value: Self) -> Option<Self>;
}

impl Structured for Node {
    fn kind(&self) -> &'static str {
        Node::kind(self)
    }

    fn is_record(&self) -> bool {
        matches!(self, Node::Record(_))
    }

    fn is_list(&self) -> bool {
        matches!(self, Node::List(_))
    }

    fn get_field(&self, name: &str) -> Option<&Node> {
        self.as_record()?.get(name)
    }

    fn with_field(&self, name: &str, value: Node) -> Option<Node> {
        let fields = self.as_record()?;
        let mut next = BTreeMap::clone(fields);
        next.insert(name.to_string(), value);
        Some(Node::Record(Arc::new(next)))
    }

    fn get_index(&self, index: usize) -> Option<&Node> {
        self.as_list()?.get(index)
    }

    fn with_index(&self, index: usize, value: Node) -> Option<Node> {
        let items = self.as_list()?;
        if index >= items.len() {
            return None;
        }
        let mut next = items.to_vec();
        next[index] = value;
        Some(Node::List(Arc::new(next)))
    }
}

impl Structured for Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    fn is_record(&self) -> bool {
        self.is_object()
    }

    fn is_list(&self) -> bool {
        self.is_array()
    }

    fn get_field(&self, name: &str) -> Option<&Value> {
        self.as_object()?.get(name)
    }

    fn with_field(&self, name: &str, value: Value) -> Option<Value> {
        let mut next = self.as_object()?.clone();
        next.insert(name.to_string(), value);
        Some(Value::Object(next))
    }

    fn get_index(&self, index: usize) -> Option<&Value> {
        self.as_array()?.get(index)
    }

    fn with_index(&self, index: usize, value: Value) -> Option<Value> {
        let mut next = self.as_array()?.clone();
        *next.get_mut(index)? = value;
        Some(Value::Array(next))
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Node::Int(i),
                None => Node::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Node::Str(Arc::from(s)),
            Value::Array(items) => Node::list(items.into_iter().map(Node::from)),
            Value::Object(fields) => Node::record(fields.into_iter().map(|(k, v)| (k, Node::from(v)))),
        }
    }
}

impl From<&Node> for Value {
    fn from(node: &Node) -> Self {
        match node {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Int(i) => Value::from(*i),
            Node::Float(f) => Value::from(*f),
            Node::Str(s) => Value::String(s.to_string()),
            Node::List(items) => Value::Array(items.iter().map(Value::from).collect()),
            Node::Record(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Bool(b)
    }
}

impl From<i64> for Node {
    fn from(i: i64) -> Self {
        Node::Int(i)
    }
}

impl From<i32> for Node {
    fn from(i: i32) -> Self {
        Node::Int(i64::from(i))
    }
}

impl From<f64> for Node {
    fn from(f: f64) -> Self {
        Node::Float(f)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Str(Arc::from(s))
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Str(Arc::from(s))
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::List(Arc::new(items))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::from(self))
    }
}
