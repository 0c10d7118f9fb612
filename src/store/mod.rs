//! Store Module - reactive values
//!
//! Session-scoped, change-notifying values built on the `SessionScope` row
//! table. DashMap holds the rows; each row serialises writers on a
//! reentrant lock.
//!
//! Key types:
//! - `Store`: typed facade (get/peek/set/update/subscribe/select)
//! - `Lens`: composable read/write path into a store's value
//! - `MutationGuard`: storage that detects in-place mutation of handed-out values
//! - `Computed`: derived value with automatic dependency tracking
//! - `Node`: structured value with shared subtrees

mod computed;
mod guard;
mod key;
mod lens;
mod listeners;
mod merge;
mod node;
pub mod path;
mod reactive;
mod storage;

pub use computed::Computed;
pub use guard::{DeepClone, MutationGuard, Shared, StoreValueRecord};
pub use key::StoreKey;
pub use lens::Lens;
pub use listeners::{Listener, Subscription};
pub use merge::Merge;
pub use node::{Node, Structured};
pub use path::PathSegment;
pub use reactive::{Selection, Store, StoreBuilder};
pub use storage::{EqualsFn, Factory, KernelStorage, SharedStorage, Storage};

pub(crate) use storage::partial_eq;
