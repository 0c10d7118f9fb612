//! Task - cancellable background work that publishes into a store
//!
//! A `Task` is a declaration: a producer plus options. Each session gets
//! its own run state (generation counter, arguments, cancellation token)
//! and its own `TaskResult` row. Calling the task supersedes whatever the
//! previous call in that session is still doing.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use tracing::{debug, instrument};

use crate::config::TaskSettings;
use crate::error::{Result, TesseraError};
use crate::session::Session;
use crate::store::{Lens, Store, StoreKey, Subscription};

use super::context::{TaskContext, UnitHost};
use super::result::{TaskResult, TaskState};
use super::run::{progress_lens, RunState};
use super::{event_loop, threaded};

pub(crate) type SingleFn<A, R> = Arc<dyn Fn(&TaskContext, A) -> anyhow::Result<R> + Send + Sync>;
pub(crate) type SequenceFn<A, R> = Arc<
    dyn Fn(TaskContext, A) -> Box<dyn Iterator<Item = anyhow::Result<R>>> + Send + Sync,
>;
pub(crate) type FutureFn<A, R> =
    Arc<dyn Fn(TaskContext, A) -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;
pub(crate) type StreamFn<A, R> =
    Arc<dyn Fn(TaskContext, A) -> BoxStream<'static, anyhow::Result<R>> + Send + Sync>;

/// Bodies run on a dedicated thread per call
pub(crate) enum ThreadBody<A, R> {
    Single(SingleFn<A, R>),
    Sequence(SequenceFn<A, R>),
}

/// Bodies run on a tokio event loop
pub(crate) enum AsyncBody<A, R> {
    Future(FutureFn<A, R>),
    Stream(StreamFn<A, R>),
}

enum Body<A, R> {
    Threaded(ThreadBody<A, R>),
    EventLoop(AsyncBody<A, R>),
}

/// The work a task does; the constructor picks the execution engine
pub struct Producer<A, R> {
    body: Body<A, R>,
}

impl<A: 'static, R: 'static> Producer<A, R> {
    /// Blocking function returning one value (thread engine)
    pub fn single(f: impl Fn(&TaskContext, A) -> anyhow::Result<R> + Send + Sync + 'static) -> Self {
        Self {
            body: Body::Threaded(ThreadBody::Single(Arc::new(f))),
        }
    }

    /// Blocking iterator; every element is published as it arrives (thread engine)
    pub fn sequence<I>(f: impl Fn(TaskContext, A) -> I + Send + Sync + 'static) -> Self
    where
        I: IntoIterator<Item = anyhow::Result<R>>,
        I::IntoIter: 'static,
    {
        let body: SequenceFn<A, R> = Arc::new(move |context, args| {
            Box::new(f(context, args).into_iter()) as Box<dyn Iterator<Item = anyhow::Result<R>>>
        });
        Self {
            body: Body::Threaded(ThreadBody::Sequence(body)),
        }
    }

    /// Future returning one value (event-loop engine)
    pub fn future<Fut>(f: impl Fn(TaskContext, A) -> Fut + Send + Sync + 'static) -> Self
    where
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let body: FutureFn<A, R> = Arc::new(move |context, args| f(context, args).boxed());
        Self {
            body: Body::EventLoop(AsyncBody::Future(body)),
        }
    }

    /// Stream; every element is published as it arrives (event-loop engine)
    pub fn stream<S>(f: impl Fn(TaskContext, A) -> S + Send + Sync + 'static) -> Self
    where
        S: Stream<Item = anyhow::Result<R>> + Send + 'static,
    {
        let body: StreamFn<A, R> = Arc::new(move |context, args| f(context, args).boxed());
        Self {
            body: Body::EventLoop(AsyncBody::Stream(body)),
        }
    }
}

impl<A, R> Producer<A, R> {
    /// Runs on a dedicated thread per call rather than an event loop
    pub fn is_threaded(&self) -> bool {
        matches!(self.body, Body::Threaded(_))
    }
}

impl<A, R> Clone for ThreadBody<A, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Single(f) => Self::Single(Arc::clone(f)),
            Self::Sequence(f) => Self::Sequence(Arc::clone(f)),
        }
    }
}

impl<A, R> Clone for AsyncBody<A, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Future(f) => Self::Future(Arc::clone(f)),
            Self::Stream(f) => Self::Stream(Arc::clone(f)),
        }
    }
}

/// Where event-loop bodies run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventLoop {
    /// Process-wide runtime on a background thread, started on first use
    #[default]
    Background,
    /// The tokio runtime of the calling thread; `NoEventLoop` if there is none
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub event_loop: EventLoop,
    /// `result_or_raise` returns `TaskFailed` for results in the Error state
    pub raise_errors: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            event_loop: EventLoop::Background,
            raise_errors: true,
        }
    }
}

impl From<&TaskSettings> for TaskOptions {
    fn from(settings: &TaskSettings) -> Self {
        Self {
            event_loop: if settings.prefer_threaded {
                EventLoop::Background
            } else {
                EventLoop::Current
            },
            raise_errors: settings.raise_errors,
        }
    }
}

struct TaskInner<A, R> {
    name: Arc<str>,
    producer: Producer<A, R>,
    options: TaskOptions,
    results: Store<TaskResult<R>>,
    run_key: StoreKey,
}

/// Cancellable, session-scoped background computation
pub struct Task<A, R> {
    inner: Arc<TaskInner<A, R>>,
}

impl<A, R> Clone for Task<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> Task<A, R>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(name: impl Into<Arc<str>>, producer: Producer<A, R>) -> Self {
        Self::with_options(name, producer, TaskOptions::default())
    }

    pub fn with_options(
        name: impl Into<Arc<str>>,
        producer: Producer<A, R>,
        options: TaskOptions,
    ) -> Self {
        let results = Store::new(TaskResult::not_called());
        let run_key = results.key().child::<RunState<A, R>>("run");
        Self {
            inner: Arc::new(TaskInner {
                name: name.into(),
                producer,
                options,
                results,
                run_key,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &TaskOptions {
        &self.inner.options
    }

    // ═══════════════════════════════════════════
    // CONTROL
    // ═══════════════════════════════════════════

    /// Start a new execution in `session`, superseding the previous one
    ///
    /// Publishes `Starting` before returning. The body runs on the engine
    /// its producer selects; a spawn failure is published as `Error` and
    /// returned.
    #[instrument(skip_all, fields(task = %self.inner.name, session = %session.id()))]
    pub fn call(&self, session: &Session, args: A) -> Result<()> {
        session.ensure_open()?;
        let run = self.run_state(session)?;
        let unit = run.begin(session, args.clone());
        let host: Arc<dyn UnitHost> = run.clone();
        let context = TaskContext::new(
            session.untracked(),
            unit.generation,
            unit.token.clone(),
            host,
        );
        debug!(generation = unit.generation, "task called");

        let spawned = match &self.inner.producer.body {
            Body::Threaded(body) => {
                threaded::spawn(&run, context.clone(), unit, body.clone(), args)
            }
            Body::EventLoop(body) => event_loop::spawn(
                &run,
                context.clone(),
                unit,
                body.clone(),
                args,
                self.inner.options.event_loop,
            ),
        };
        if let Err(err) = spawned {
            run.fail(&context, anyhow::anyhow!(err.to_string()));
            return Err(err);
        }
        Ok(())
    }

    /// Cancel the current execution in `session`
    ///
    /// No-op once the result is terminal. Called from inside the running
    /// body it returns the `Cancelled` signal, to be propagated with `?`.
    pub fn cancel(&self, session: &Session) -> Result<()> {
        let run = self
            .existing_run(session)
            .ok_or_else(|| self.never_called("cancel"))?;
        run.cancel(session, self.inner.results.key())
    }

    /// Call again with the arguments of the latest call
    pub fn retry(&self, session: &Session) -> Result<()> {
        let args = self
            .existing_run(session)
            .and_then(|run| run.last_args())
            .ok_or_else(|| self.never_called("retry"))?;
        self.call(session, args)
    }

    /// True when `context` belongs to the latest, uncancelled call
    pub fn is_current(&self, context: &TaskContext) -> bool {
        context.is_current()
    }

    // ═══════════════════════════════════════════
    // RESULTS
    // ═══════════════════════════════════════════

    /// Latest published snapshot; tracked like a store read
    #[track_caller]
    pub fn result(&self, session: &Session) -> Result<TaskResult<R>> {
        self.inner.results.get(session)
    }

    /// Like `result`, but an `Error` snapshot becomes `TaskFailed` when
    /// `raise_errors` is set
    #[track_caller]
    pub fn result_or_raise(&self, session: &Session) -> Result<TaskResult<R>> {
        let result = self.inner.results.get(session)?;
        match (&result.exception, self.inner.options.raise_errors) {
            (Some(cause), true) if result.state == TaskState::Error => {
                Err(TesseraError::TaskFailed {
                    task: self.inner.name.to_string(),
                    cause: Arc::clone(cause),
                })
            }
            _ => Ok(result),
        }
    }

    #[track_caller]
    pub fn state(&self, session: &Session) -> Result<TaskState> {
        Ok(self.inner.results.peek(session)?.state)
    }

    /// Overwrite the progress field from outside the body
    pub fn set_progress(&self, session: &Session, progress: f64) -> Result<()> {
        self.run_state(session)?.set_progress(session, progress)
    }

    pub fn subscribe(
        &self,
        session: &Session,
        listener: impl Fn(&TaskResult<R>) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.inner.results.subscribe(session, listener)
    }

    /// Notified only when `progress` changes
    pub fn subscribe_progress(
        &self,
        session: &Session,
        listener: impl Fn(f64) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.progress_lens()
            .subscribe(session, move |progress: &f64| listener(*progress))
    }

    /// Store holding this task's results, for selectors and computed values
    pub fn results(&self) -> &Store<TaskResult<R>> {
        &self.inner.results
    }

    pub fn progress_lens(&self) -> Lens<TaskResult<R>, f64> {
        progress_lens(&self.inner.results)
    }

    fn run_state(&self, session: &Session) -> Result<Arc<RunState<A, R>>> {
        let name = Arc::clone(&self.inner.name);
        let results = self.inner.results.clone();
        let run = session.scope().slot(&self.inner.run_key, session, move || {
            Ok(RunState::new(name, results))
        })?;
        if run.claim_hook() {
            let weak = Arc::downgrade(&run);
            session.on_close(move || {
                if let Some(run) = weak.upgrade() {
                    run.shutdown();
                }
            });
        }
        Ok(run)
    }

    fn existing_run(&self, session: &Session) -> Option<Arc<RunState<A, R>>> {
        session
            .scope()
            .existing_slot::<RunState<A, R>>(&self.inner.run_key, session)
            .filter(|run| run.was_called())
    }

    fn never_called(&self, operation: &'static str) -> TesseraError {
        TesseraError::NeverCalled {
            task: self.inner.name.to_string(),
            operation,
        }
    }
}

impl<A, R> fmt::Debug for Task<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("threaded", &self.inner.producer.is_threaded())
            .field("options", &self.inner.options)
            .finish()
    }
}
