//! TaskContext - handle given to a running task body
//!
//! One context per execution unit. It knows the unit's generation and
//! cancellation token, and reaches back into the owning run state through
//! the type-erased [`UnitHost`].

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::{Result, TesseraError};
use crate::session::{Session, SessionId};
use crate::store::StoreKey;

/// Identity of one execution unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnitId {
    pub(crate) task: StoreKey,
    pub(crate) session: SessionId,
    pub(crate) generation: u64,
}

thread_local! {
    static THREAD_UNIT: RefCell<Option<UnitId>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static ASYNC_UNIT: UnitId;
}

/// Unit running on the calling thread or tokio task, if any
pub(crate) fn current_unit() -> Option<UnitId> {
    ASYNC_UNIT
        .try_with(Clone::clone)
        .ok()
        .or_else(|| THREAD_UNIT.with(|unit| unit.borrow().clone()))
}

/// Mark the calling (dedicated) thread as running `unit`
pub(crate) fn enter_thread_unit(unit: UnitId) {
    THREAD_UNIT.with(|slot| *slot.borrow_mut() = Some(unit));
}

/// Run `future` with `unit` as its task-local identity
pub(crate) async fn scope_async_unit<F: std::future::Future>(unit: UnitId, future: F) -> F::Output {
    ASYNC_UNIT.scope(unit, future).await
}

/// Operations a unit needs from the run state of its (task, session)
pub(crate) trait UnitHost: Send + Sync {
    fn task_name(&self) -> &str;

    fn task_key(&self) -> &StoreKey;

    fn latest_generation(&self) -> u64;

    fn publish_progress(&self, context: &TaskContext, progress: f64);

    /// Cancel the unit described by `context` and publish `Cancelled`
    fn cancel_unit(&self, context: &TaskContext);
}

/// Handle passed to task bodies
#[derive(Clone)]
pub struct TaskContext {
    session: Session,
    generation: u64,
    token: CancellationToken,
    host: Arc<dyn UnitHost>,
}

impl TaskContext {
    pub(crate) fn new(
        session: Session,
        generation: u64,
        token: CancellationToken,
        host: Arc<dyn UnitHost>,
    ) -> Self {
        Self {
            session,
            generation,
            token,
            host,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn task_name(&self) -> &str {
        self.host.task_name()
    }

    /// Still the latest call of this task in this session, and not cancelled
    ///
    /// Long-running bodies poll this and return early once it is false.
    pub fn is_current(&self) -> bool {
        self.host.latest_generation() == self.generation && !self.token.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Err(Cancelled)` once this unit is no longer current; use with `?`
    pub fn check(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(self.cancelled_signal())
        }
    }

    /// Resolves when this unit is cancelled or superseded
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Update only the `progress` field of the published result
    pub fn set_progress(&self, progress: f64) {
        if self.is_current() {
            self.host.publish_progress(self, progress);
        }
    }

    /// Cancel this unit from inside its body
    ///
    /// Always returns the `Cancelled` signal; propagate it with `?`.
    pub fn cancel(&self) -> Result<()> {
        self.host.cancel_unit(self);
        Err(self.cancelled_signal())
    }

    pub(crate) fn unit_id(&self) -> UnitId {
        UnitId {
            task: self.host.task_key().clone(),
            session: self.session.id().clone(),
            generation: self.generation,
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn cancelled_signal(&self) -> TesseraError {
        TesseraError::Cancelled {
            task: self.host.task_name().to_string(),
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.host.task_name())
            .field("session", self.session.id())
            .field("generation", &self.generation)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// True when `err` is (or wraps) the self-cancellation signal
pub(crate) fn is_cancel_signal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<TesseraError>()
            .is_some_and(TesseraError::is_cancellation)
    })
}
