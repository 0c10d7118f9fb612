//! Event-loop engine - bodies run as tokio tasks
//!
//! A superseded or cancelled unit is aborted at its next await point; a
//! unit that is mid-poll when superseded can no longer publish because
//! every publish re-checks the generation.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::info;

use crate::error::{Result, TesseraError};
use crate::util::constants::{BACKGROUND_LOOP_THREAD, BACKGROUND_LOOP_WORKERS};

use super::context::{scope_async_unit, TaskContext, UnitHost};
use super::handle::{AsyncBody, EventLoop};
use super::run::{FinishOnDrop, RunState, Unit};
use super::threaded::panicked;

static BACKGROUND: OnceCell<Runtime> = OnceCell::new();

/// Handle of the process-wide background runtime, started on first use
fn background_handle(task: &str) -> Result<Handle> {
    BACKGROUND
        .get_or_try_init(|| {
            info!(thread = BACKGROUND_LOOP_THREAD, "starting background event loop");
            Builder::new_multi_thread()
                .worker_threads(BACKGROUND_LOOP_WORKERS)
                .thread_name(BACKGROUND_LOOP_THREAD)
                .enable_all()
                .build()
        })
        .map(|runtime| runtime.handle().clone())
        .map_err(|err| TesseraError::SpawnFailed {
            task: task.to_string(),
            reason: err.to_string(),
        })
}

fn resolve(event_loop: EventLoop, task: &str) -> Result<Handle> {
    match event_loop {
        EventLoop::Background => background_handle(task),
        EventLoop::Current => Handle::try_current().map_err(|_| TesseraError::NoEventLoop {
            task: task.to_string(),
        }),
    }
}

pub(crate) fn spawn<A, R>(
    run: &Arc<RunState<A, R>>,
    context: TaskContext,
    unit: Unit,
    body: AsyncBody<A, R>,
    args: A,
    event_loop: EventLoop,
) -> Result<()>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    let handle = resolve(event_loop, run.task_name())?;
    let generation = unit.generation;
    let unit_id = context.unit_id();
    let host = Arc::clone(run);

    let work = async move {
        let _finish = FinishOnDrop(unit.done);
        if !host.mark_running(&context) {
            return;
        }
        let token = unit.token;
        let body = AssertUnwindSafe(execute(&host, &context, body, args)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            outcome = body => outcome.unwrap_or_else(|panic| Err(panicked(panic.as_ref()))),
        };
        host.settle(&context, outcome);
    };

    let join = handle.spawn(scope_async_unit(unit_id, work));
    run.attach_join(generation, join);
    Ok(())
}

async fn execute<A, R>(
    run: &RunState<A, R>,
    context: &TaskContext,
    body: AsyncBody<A, R>,
    args: A,
) -> anyhow::Result<Option<R>>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    match body {
        AsyncBody::Future(f) => f(context.clone(), args).await.map(Some),
        AsyncBody::Stream(f) => {
            let mut stream = f(context.clone(), args);
            let mut last = None;
            while let Some(item) = stream.next().await {
                let value = item?;
                if !context.is_current() {
                    break;
                }
                run.produce(context, value.clone());
                last = Some(value);
            }
            Ok(last)
        }
    }
}
