//! RunState - per (task, session) execution bookkeeping
//!
//! Holds the generation counter and everything a new call supersedes. All
//! publishing goes through `publish_lock` and re-checks, while holding it,
//! that the publishing unit is still current.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, ReentrantMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{Result, TesseraError};
use crate::session::Session;
use crate::store::{Lens, Store, StoreKey};

use super::context::{current_unit, is_cancel_signal, TaskContext, UnitHost, UnitId};
use super::result::TaskResult;

/// Completion flag of one unit; later units wait on it
pub(crate) struct DoneSignal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl DoneSignal {
    pub(crate) fn new() -> Self {
        Self {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn finish(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_done(&self) -> bool {
        *self.done.lock()
    }

    /// Block until done
    ///
    /// Not interruptible: a superseded unit still waits for its predecessor,
    /// so completion signals stay in call order.
    pub(crate) fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }
}

/// Marks a unit done when dropped (normal exit, early return, panic or abort)
pub(crate) struct FinishOnDrop(pub(crate) Arc<DoneSignal>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// What `begin` hands to an engine for the new unit
pub(crate) struct Unit {
    pub(crate) generation: u64,
    pub(crate) token: CancellationToken,
    pub(crate) done: Arc<DoneSignal>,
    pub(crate) previous: Option<Arc<DoneSignal>>,
}

struct RunInner<A, R> {
    args: Option<A>,
    last_value: Option<R>,
    progress: f64,
    token: Option<CancellationToken>,
    done: Option<Arc<DoneSignal>>,
    join: Option<JoinHandle<()>>,
}

pub(crate) struct RunState<A, R> {
    task: Arc<str>,
    results: Store<TaskResult<R>>,
    progress: Lens<TaskResult<R>, f64>,
    generation: AtomicU64,
    publish_lock: ReentrantMutex<()>,
    inner: Mutex<RunInner<A, R>>,
    hooked: AtomicBool,
}

impl<A, R> RunState<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(task: Arc<str>, results: Store<TaskResult<R>>) -> Self {
        let progress = progress_lens(&results);
        Self {
            task,
            results,
            progress,
            generation: AtomicU64::new(0),
            publish_lock: ReentrantMutex::new(()),
            inner: Mutex::new(RunInner {
                args: None,
                last_value: None,
                progress: 0.0,
                token: None,
                done: None,
                join: None,
            }),
            hooked: AtomicBool::new(false),
        }
    }

    /// True exactly once, for the caller that registers the teardown hook
    pub(crate) fn claim_hook(&self) -> bool {
        !self.hooked.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn last_args(&self) -> Option<A> {
        self.inner.lock().args.clone()
    }

    pub(crate) fn was_called(&self) -> bool {
        self.inner.lock().args.is_some()
    }

    // ═══════════════════════════════════════════
    // CALL / CANCEL
    // ═══════════════════════════════════════════

    /// Start a new generation: supersede the previous unit and publish `Starting`
    pub(crate) fn begin(&self, session: &Session, args: A) -> Unit {
        let _publish = self.publish_lock.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let done = Arc::new(DoneSignal::new());

        let (previous_token, previous_join, previous, latest) = {
            let mut inner = self.inner.lock();
            inner.args = Some(args);
            inner.progress = 0.0;
            (
                inner.token.replace(token.clone()),
                inner.join.take(),
                inner.done.replace(Arc::clone(&done)),
                inner.last_value.clone(),
            )
        };
        if let Some(previous_token) = previous_token {
            previous_token.cancel();
        }
        if let Some(previous_join) = previous_join {
            previous_join.abort();
        }

        self.write(session, TaskResult::starting(latest));
        Unit {
            generation,
            token,
            done,
            previous,
        }
    }

    /// Keep the event-loop handle of `generation`, or abort it if already superseded
    pub(crate) fn attach_join(&self, generation: u64, join: JoinHandle<()>) {
        let mut inner = self.inner.lock();
        if self.generation.load(Ordering::SeqCst) == generation {
            inner.join = Some(join);
        } else {
            join.abort();
        }
    }

    /// Cancel the current unit from outside (or from inside, yielding the signal)
    pub(crate) fn cancel(&self, session: &Session, task_key: &StoreKey) -> Result<()> {
        let _publish = self.publish_lock.lock();
        let generation = self.generation.load(Ordering::SeqCst);
        let (token, latest) = {
            let inner = self.inner.lock();
            if inner.args.is_none() {
                return Err(TesseraError::NeverCalled {
                    task: self.task.to_string(),
                    operation: "cancel",
                });
            }
            (inner.token.clone(), inner.last_value.clone())
        };
        let Some(token) = token else {
            return Ok(());
        };
        if token.is_cancelled() || self.results.peek(session)?.state.is_terminal() {
            return Ok(());
        }

        token.cancel();
        let own_unit = current_unit()
            == Some(UnitId {
                task: task_key.clone(),
                session: session.id().clone(),
                generation,
            });
        if !own_unit {
            if let Some(join) = self.inner.lock().join.take() {
                join.abort();
            }
        }

        debug!(task = %self.task, session = %session.id(), generation, "task cancelled");
        self.write(session, TaskResult::cancelled(latest));

        if own_unit {
            return Err(TesseraError::Cancelled {
                task: self.task.to_string(),
            });
        }
        Ok(())
    }

    /// Session teardown: stop the current unit without publishing
    pub(crate) fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if let Some(token) = &inner.token {
            token.cancel();
        }
        if let Some(join) = inner.join.take() {
            join.abort();
        }
        debug!(task = %self.task, "task units stopped at session close");
    }

    // ═══════════════════════════════════════════
    // PUBLISHING (every method re-checks currency)
    // ═══════════════════════════════════════════

    fn is_current(&self, context: &TaskContext) -> bool {
        self.generation.load(Ordering::SeqCst) == context.generation() && !context.is_cancelled()
    }

    pub(crate) fn mark_waiting(&self, context: &TaskContext) {
        let _publish = self.publish_lock.lock();
        if !self.is_current(context) {
            return;
        }
        let latest = self.inner.lock().last_value.clone();
        self.write(context.session(), TaskResult::waiting(latest));
    }

    /// Publish `Running`; false means the unit must stop before running its body
    pub(crate) fn mark_running(&self, context: &TaskContext) -> bool {
        let _publish = self.publish_lock.lock();
        if !self.is_current(context) {
            return false;
        }
        let (latest, progress) = {
            let inner = self.inner.lock();
            (inner.last_value.clone(), inner.progress)
        };
        self.write(
            context.session(),
            TaskResult::running(latest).with_progress(progress),
        );
        true
    }

    /// Publish one intermediate element of a sequence body
    pub(crate) fn produce(&self, context: &TaskContext, value: R) {
        let _publish = self.publish_lock.lock();
        if !self.is_current(context) {
            return;
        }
        let progress = {
            let mut inner = self.inner.lock();
            inner.last_value = Some(value.clone());
            inner.progress
        };
        self.write(
            context.session(),
            TaskResult::produced(value).with_progress(progress),
        );
    }

    /// Turn the body's outcome into the terminal state
    pub(crate) fn settle(&self, context: &TaskContext, outcome: anyhow::Result<Option<R>>) {
        match outcome {
            Ok(value) => self.finish(context, value),
            Err(err) if is_cancel_signal(&err) => self.finish_cancelled(context),
            Err(err) => self.fail(context, err),
        }
    }

    fn finish(&self, context: &TaskContext, value: Option<R>) {
        let _publish = self.publish_lock.lock();
        if !self.is_current(context) {
            return;
        }
        let (latest, progress) = {
            let mut inner = self.inner.lock();
            if value.is_some() {
                inner.last_value = value.clone();
            }
            (inner.last_value.clone(), inner.progress)
        };
        debug!(task = %self.task, generation = context.generation(), "task finished");
        // An empty sequence finishes without a value but keeps the previous latest
        let result = TaskResult {
            value,
            ..TaskResult::finished(latest)
        };
        self.write(context.session(), result.with_progress(progress));
    }

    /// The body returned the cancellation signal; `Cancelled` may already be published
    fn finish_cancelled(&self, context: &TaskContext) {
        let _publish = self.publish_lock.lock();
        if self.generation.load(Ordering::SeqCst) != context.generation() {
            return;
        }
        context.token().cancel();
        let latest = self.inner.lock().last_value.clone();
        self.write(context.session(), TaskResult::cancelled(latest));
    }

    pub(crate) fn fail(&self, context: &TaskContext, err: anyhow::Error) {
        let _publish = self.publish_lock.lock();
        if !self.is_current(context) {
            debug!(task = %self.task, error = %err, "superseded unit failed; result dropped");
            return;
        }
        error!(task = %self.task, session = %context.session().id(), error = ?err, "task failed");
        self.inner.lock().last_value = None;
        self.write(context.session(), TaskResult::failed(Arc::new(err), None));
    }

    /// Progress written from outside any unit
    pub(crate) fn set_progress(&self, session: &Session, progress: f64) -> Result<()> {
        let _publish = self.publish_lock.lock();
        self.inner.lock().progress = progress;
        self.progress.set(session, progress)
    }

    fn write(&self, session: &Session, result: TaskResult<R>) {
        if let Err(err) = self.results.set(session, result) {
            debug!(task = %self.task, session = %session.id(), error = %err, "task result not published");
        }
    }
}

impl<A, R> UnitHost for RunState<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    fn task_name(&self) -> &str {
        &self.task
    }

    fn task_key(&self) -> &StoreKey {
        self.results.key()
    }

    fn latest_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn publish_progress(&self, context: &TaskContext, progress: f64) {
        let _publish = self.publish_lock.lock();
        if !self.is_current(context) {
            return;
        }
        self.inner.lock().progress = progress;
        if let Err(err) = self.progress.set(context.session(), progress) {
            debug!(task = %self.task, error = %err, "progress not published");
        }
    }

    fn cancel_unit(&self, context: &TaskContext) {
        let _publish = self.publish_lock.lock();
        context.token().cancel();
        if self.generation.load(Ordering::SeqCst) != context.generation() {
            return;
        }
        let latest = {
            let mut inner = self.inner.lock();
            inner.join = None;
            inner.last_value.clone()
        };
        debug!(task = %self.task, generation = context.generation(), "task cancelled itself");
        self.write(context.session(), TaskResult::cancelled(latest));
    }
}

impl<A, R> fmt::Debug for RunState<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("task", &self.task)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

/// Lens on the `progress` field of a task result
pub(crate) fn progress_lens<R>(results: &Store<TaskResult<R>>) -> Lens<TaskResult<R>, f64>
where
    R: Clone + Send + Sync + 'static,
{
    results.focus(
        "progress",
        |result: &TaskResult<R>| result.progress,
        |result: &TaskResult<R>, progress| result.clone().with_progress(progress),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn done_signal_releases_waiter() {
        let signal = Arc::new(DoneSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || signal.wait())
        };
        std::thread::sleep(Duration::from_millis(30));
        assert!(!signal.is_done());
        drop(FinishOnDrop(Arc::clone(&signal)));
        waiter.join().unwrap();
        assert!(signal.is_done());
    }

    #[test]
    fn finished_signal_does_not_block() {
        let signal = DoneSignal::new();
        signal.finish();
        signal.wait();
        assert!(signal.is_done());
    }
}
