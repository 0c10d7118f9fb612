//! Thread engine - one named OS thread per call
//!
//! A new unit waits (publishing `Waiting`) until the unit it superseded has
//! returned, so at most one body of a (task, session) runs at a time.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{Result, TesseraError};
use crate::util::constants::TASK_THREAD_PREFIX;

use super::context::{enter_thread_unit, TaskContext, UnitHost};
use super::handle::ThreadBody;
use super::run::{FinishOnDrop, RunState, Unit};

pub(crate) fn spawn<A, R>(
    run: &Arc<RunState<A, R>>,
    context: TaskContext,
    unit: Unit,
    body: ThreadBody<A, R>,
    args: A,
) -> Result<()>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    let run = Arc::clone(run);
    let thread_name = format!("{}-{}-{}", TASK_THREAD_PREFIX, run.task_name(), unit.generation);
    let task = run.task_name().to_string();

    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let _finish = FinishOnDrop(Arc::clone(&unit.done));
            enter_thread_unit(context.unit_id());

            // Wait even when superseded: this unit's done signal must not
            // fire before its predecessor's
            if let Some(previous) = unit.previous.as_ref().filter(|done| !done.is_done()) {
                run.mark_waiting(&context);
                previous.wait();
            }
            if !run.mark_running(&context) {
                return;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| execute(&run, &context, body, args)))
                .unwrap_or_else(|panic| Err(panicked(panic.as_ref())));
            run.settle(&context, outcome);
        })
        .map(|_| ())
        .map_err(|err| TesseraError::SpawnFailed {
            task,
            reason: err.to_string(),
        })
}

fn execute<A, R>(
    run: &RunState<A, R>,
    context: &TaskContext,
    body: ThreadBody<A, R>,
    args: A,
) -> anyhow::Result<Option<R>>
where
    A: Clone + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    match body {
        ThreadBody::Single(f) => f(context, args).map(Some),
        ThreadBody::Sequence(f) => {
            let mut last = None;
            for item in f(context.clone(), args) {
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

/// Error standing in for a panicking body
pub(crate) fn panicked(panic: &(dyn Any + Send)) -> anyhow::Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow::anyhow!("task body panicked: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let err = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panicked(err.as_ref()).to_string(), "task body panicked: boom");

        let err = catch_unwind(|| panic!("{} items", 3)).unwrap_err();
        assert_eq!(
            panicked(err.as_ref()).to_string(),
            "task body panicked: 3 items"
        );
    }
}
