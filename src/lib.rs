//! Tessera - reactive state engine
//!
//! Session-scoped stores with change notification, composable lenses,
//! optional detection of in-place mutation, derived values and cancellable
//! background tasks that publish their progress into stores.
//!
//! ## Layers
//!
//! - `session`: `SessionScope` row table, `Session` handles, teardown hooks
//! - `store`: `Store`, `Lens`, `MutationGuard`, `Computed`
//! - `task`: `Task`, `TaskResult`, `TaskContext` and the two execution engines
//! - `config` / `logging`: TOML + environment settings, tracing setup
//!
//! ## Example
//!
//! ```no_run
//! use tessera::{SessionScope, Store};
//!
//! let scope = SessionScope::new();
//! let session = scope.open_session();
//! let counter = Store::new(0u32);
//! let _sub = counter.subscribe(&session, |n| println!("counter = {n}"))?;
//! counter.set(&session, 1)?;
//! # Ok::<(), tessera::TesseraError>(())
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod store;
pub mod task;
pub mod util;

pub use config::{LoggingSettings, StoreSettings, TaskSettings, TesseraConfig};
pub use error::{FixSuggestion, MutationError, Result, TesseraError};
pub use logging::init_logging;
pub use session::{Session, SessionId, SessionScope};
pub use store::{
    Computed, DeepClone, Lens, Merge, MutationGuard, Node, PathSegment, Selection, Shared, Store,
    StoreBuilder, StoreKey, Structured, Subscription,
};
pub use task::{EventLoop, Producer, Task, TaskContext, TaskOptions, TaskResult, TaskState};
