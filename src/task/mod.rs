//! Task Module - cancellable background work
//!
//! A [`Task`] runs a producer per call and publishes each state transition
//! as an immutable [`TaskResult`] into a session-scoped store:
//!
//! ```text
//! NotCalled ─call─▶ Starting ─▶ (Waiting) ─▶ Running ─▶ Finished | Error | Cancelled
//! ```
//!
//! Each call starts a new generation. Only the current, uncancelled
//! generation may publish, so a superseded unit's late results never reach
//! subscribers.
//!
//! Engines:
//! - thread engine (`Producer::single`, `Producer::sequence`): one named OS
//!   thread per call, waiting for the superseded unit to return
//! - event-loop engine (`Producer::future`, `Producer::stream`): tokio tasks
//!   on the caller's runtime or a dedicated background runtime

mod context;
mod event_loop;
mod handle;
mod result;
mod run;
mod threaded;

pub use context::TaskContext;
pub use handle::{EventLoop, Producer, Task, TaskOptions};
pub use result::{TaskResult, TaskState};
