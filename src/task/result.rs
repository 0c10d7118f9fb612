//! TaskState / TaskResult - snapshots published by a task

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Lifecycle of one task in one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    NotCalled,
    Starting,
    Waiting,
    Running,
    Finished,
    Error,
    Cancelled,
}

impl TaskState {
    /// Finished, Error or Cancelled: stays until the next call
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Cancelled)
    }

    /// Called and not yet terminal
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Starting | Self::Waiting | Self::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotCalled => "not_called",
            Self::Starting => "starting",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Immutable snapshot of a task's result; replaced wholesale on every transition
#[derive(Clone)]
pub struct TaskResult<R> {
    /// Result of the current call (set while Running with a sequence, and when Finished)
    pub value: Option<R>,
    /// Last value produced by any call, kept while a new call runs
    pub latest: Option<R>,
    pub exception: Option<Arc<anyhow::Error>>,
    pub progress: f64,
    pub state: TaskState,
}

impl<R> TaskResult<R> {
    pub fn not_called() -> Self {
        Self::with_state(TaskState::NotCalled, None)
    }

    pub fn starting(latest: Option<R>) -> Self {
        Self::with_state(TaskState::Starting, latest)
    }

    pub fn waiting(latest: Option<R>) -> Self {
        Self::with_state(TaskState::Waiting, latest)
    }

    pub fn running(latest: Option<R>) -> Self {
        Self::with_state(TaskState::Running, latest)
    }

    pub fn cancelled(latest: Option<R>) -> Self {
        Self::with_state(TaskState::Cancelled, latest)
    }

    pub fn failed(exception: Arc<anyhow::Error>, latest: Option<R>) -> Self {
        Self {
            exception: Some(exception),
            ..Self::with_state(TaskState::Error, latest)
        }
    }

    fn with_state(state: TaskState, latest: Option<R>) -> Self {
        Self {
            value: None,
            latest,
            exception: None,
            progress: 0.0,
            state,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    pub fn is_error(&self) -> bool {
        self.state == TaskState::Error
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == TaskState::Cancelled
    }

    pub fn not_called_yet(&self) -> bool {
        self.state == TaskState::NotCalled
    }
}

impl<R: Clone> TaskResult<R> {
    /// Intermediate element of a sequence body
    pub fn produced(value: R) -> Self {
        Self {
            value: Some(value.clone()),
            ..Self::with_state(TaskState::Running, Some(value))
        }
    }

    pub fn finished(value: Option<R>) -> Self {
        Self {
            value: value.clone(),
            ..Self::with_state(TaskState::Finished, value)
        }
    }
}

impl<R> Default for TaskResult<R> {
    fn default() -> Self {
        Self::not_called()
    }
}

/// Exceptions compare by identity: two snapshots carrying the same error are equal
impl<R: PartialEq> PartialEq for TaskResult<R> {
    fn eq(&self, other: &Self) -> bool {
        let same_exception = match (&self.exception, &other.exception) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.state == other.state
            && self.value == other.value
            && self.latest == other.latest
            && self.progress == other.progress
            && same_exception
    }
}

impl<R: fmt::Debug> fmt::Debug for TaskResult<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResult")
            .field("state", &self.state)
            .field("value", &self.value)
            .field("latest", &self.latest)
            .field("exception", &self.exception.as_ref().map(|e| e.to_string()))
            .field("progress", &self.progress)
            .finish()
    }
}
