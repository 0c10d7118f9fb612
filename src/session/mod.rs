//! Session Module - per-session isolation of store rows
//!
//! Every store and task keeps one row per session. Rows live in a
//! [`SessionScope`] table keyed by `(StoreKey, SessionId)`, are created lazily
//! on first access and are dropped when the session closes.
//!
//! Key types:
//! - `SessionScope`: the injected, process-wide row table
//! - `Session`: handle passed explicitly to every store/task operation
//! - `SessionId`: stable identifier supplied by the hosting runtime
//! - `ReadTracker`: records store reads for computed values

mod scope;
mod tracking;

pub use scope::{CloseHook, Session, SessionId, SessionScope, StartHook};
pub use tracking::{ChangeCallback, Dependency, ReadTracker};
