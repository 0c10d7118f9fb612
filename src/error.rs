//! Tessera Error Types with Error Codes
//!
//! Error code ranges:
//! - TSR-000-009: Mutation detection
//! - TSR-010-019: Task usage and execution
//! - TSR-020-029: Lens paths
//! - TSR-030-039: Sessions and rows
//! - TSR-040-049: Configuration

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::util::CallSite;

pub type Result<T> = std::result::Result<T, TesseraError>;

fn describe_site(site: &Option<CallSite>) -> String {
    match site {
        Some(site) => site.to_string(),
        None => "<unknown location>".to_string(),
    }
}

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// A value handed out by a guarded store was changed without going through `set()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// The public copy returned by `get()`/`peek()` no longer equals the private value.
    #[error(
        "store value was read as {private} but later mutated to {public}; it was read at {}",
        describe_site(.site)
    )]
    MutatedAfterRead {
        private: String,
        public: String,
        site: Option<CallSite>,
    },

    /// The caller kept a handle to the value passed to `set()` and changed it.
    #[error(
        "store value was set to {private} but the value passed to set() was later mutated to {set_value}; it was set at {}",
        describe_site(.site)
    )]
    MutatedAfterSet {
        private: String,
        set_value: String,
        site: Option<CallSite>,
    },
}

impl MutationError {
    /// Location of the access that exposed the mutated value
    pub fn site(&self) -> Option<CallSite> {
        match self {
            Self::MutatedAfterRead { site, .. } | Self::MutatedAfterSet { site, .. } => *site,
        }
    }
}

/// All error variants are part of the public API.
#[derive(Error, Debug, Diagnostic)]
#[diagnostic(url(docsrs))]
pub enum TesseraError {
    // ═══════════════════════════════════════════
    // MUTATION ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[TSR-001] Mutation detected: {0}")]
    #[diagnostic(
        code(tessera::mutation),
        help("Never mutate a value read from a store; build a new value and call set()")
    )]
    Mutation(#[from] MutationError),

    // ═══════════════════════════════════════════
    // TASK ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[TSR-010] Cannot {operation} task '{task}': it was never called in this session")]
    #[diagnostic(code(tessera::never_called))]
    NeverCalled {
        task: String,
        operation: &'static str,
    },

    #[error("[TSR-011] Task '{task}' cancelled itself")]
    #[diagnostic(code(tessera::cancelled))]
    Cancelled { task: String },

    #[error("[TSR-012] Task '{task}' failed: {cause}")]
    #[diagnostic(code(tessera::task_failed))]
    TaskFailed {
        task: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("[TSR-013] Task '{task}' needs a tokio runtime but none is running")]
    #[diagnostic(code(tessera::no_event_loop))]
    NoEventLoop { task: String },

    #[error("[TSR-014] Task '{task}' could not start: {reason}")]
    #[diagnostic(code(tessera::spawn_failed))]
    SpawnFailed { task: String, reason: String },

    // ═══════════════════════════════════════════
    // LENS ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[TSR-020] Path '{path}' not found")]
    #[diagnostic(code(tessera::path_not_found))]
    PathNotFound { path: String },

    #[error("[TSR-021] Cannot traverse '{segment}' on {value_type} (path '{path}')")]
    #[diagnostic(code(tessera::invalid_traversal))]
    InvalidTraversal {
        segment: String,
        value_type: String,
        path: String,
    },

    #[error("[TSR-022] Invalid path syntax: {path}")]
    #[diagnostic(code(tessera::invalid_path), help("Use paths like cities[0].population"))]
    InvalidPath { path: String },

    // ═══════════════════════════════════════════
    // SESSION ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[TSR-030] Session '{session}' is closed")]
    #[diagnostic(code(tessera::session_closed))]
    SessionClosed { session: String },

    #[error("[TSR-031] Row for store '{key}' holds an unexpected type")]
    #[diagnostic(code(tessera::row_type_mismatch))]
    RowTypeMismatch { key: String },

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[TSR-040] Configuration error: {reason}")]
    #[diagnostic(code(tessera::config_error))]
    ConfigError { reason: String },
}

impl TesseraError {
    /// Get the error code (e.g., "TSR-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::Mutation(_) => "TSR-001",
            Self::NeverCalled { .. } => "TSR-010",
            Self::Cancelled { .. } => "TSR-011",
            Self::TaskFailed { .. } => "TSR-012",
            Self::NoEventLoop { .. } => "TSR-013",
            Self::SpawnFailed { .. } => "TSR-014",
            Self::PathNotFound { .. } => "TSR-020",
            Self::InvalidTraversal { .. } => "TSR-021",
            Self::InvalidPath { .. } => "TSR-022",
            Self::SessionClosed { .. } => "TSR-030",
            Self::RowTypeMismatch { .. } => "TSR-031",
            Self::ConfigError { .. } => "TSR-040",
        }
    }

    /// True for the programmer errors raised by cancel/retry before any call
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::NeverCalled { .. })
    }

    /// True for the internal self-cancellation signal
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl FixSuggestion for TesseraError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TesseraError::Mutation(MutationError::MutatedAfterRead { .. }) => {
                Some("Copy the value before changing it, then store the copy with set()")
            }
            TesseraError::Mutation(MutationError::MutatedAfterSet { .. }) => {
                Some("Pass set() a value you no longer change, or a deep copy of it")
            }
            TesseraError::NeverCalled { .. } => Some("Call the task before cancel() or retry()"),
            TesseraError::Cancelled { .. } => {
                Some("Propagate this error out of the task body with `?`")
            }
            TesseraError::TaskFailed { .. } => {
                Some("Inspect TaskResult::exception or disable raise_errors")
            }
            TesseraError::NoEventLoop { .. } => {
                Some("Call the task inside a tokio runtime or use EventLoop::Background")
            }
            TesseraError::SpawnFailed { .. } => Some("Check thread limits of the host process"),
            TesseraError::PathNotFound { .. } => {
                Some("Check that every field and index on the lens path exists")
            }
            TesseraError::InvalidTraversal { .. } => {
                Some("Use field() on records and index() on lists")
            }
            TesseraError::InvalidPath { .. } => {
                Some("Separate fields with '.' and write indices as [0] or .0")
            }
            TesseraError::SessionClosed { .. } => Some("Open a new session from the SessionScope"),
            TesseraError::RowTypeMismatch { .. } => {
                Some("Give stores of different value types different keys")
            }
            TesseraError::ConfigError { .. } => Some("Check ~/.config/tessera/config.toml syntax"),
        }
    }
}
