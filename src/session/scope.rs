//! SessionScope - row table with lazy creation and teardown (DashMap)
//!
//! Rows are type-erased (`Arc<dyn Any>`) and downcast on access. The key
//! carries the row's `TypeId`, so a downcast only fails on a key collision
//! between two stores declaring different value types under one name.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Result, TesseraError};
use crate::store::StoreKey;
use crate::util::constants::GLOBAL_SESSION;

use super::tracking::{Dependency, ReadTracker};

/// Cleanup run when a session closes
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// Hook run when a session is first opened; may return a cleanup for its close
pub type StartHook = Arc<dyn Fn(&Session) -> Option<CloseHook> + Send + Sync>;

type Row = Arc<dyn Any + Send + Sync>;

/// Identifier of a session (a browser connection, a kernel, a test)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    /// The session used outside any hosting runtime
    pub fn global() -> Self {
        Self(Arc::from(GLOBAL_SESSION))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    store: StoreKey,
    session: SessionId,
}

struct SessionState {
    closed: AtomicBool,
    close_hooks: Mutex<Vec<CloseHook>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            close_hooks: Mutex::new(Vec::new()),
        }
    }
}

#[derive(Default)]
struct ScopeInner {
    rows: DashMap<RowKey, Row>,
    sessions: DashMap<SessionId, Arc<SessionState>>,
    start_hooks: RwLock<Vec<StartHook>>,
}

/// Process-wide table of session rows (cheap to clone, shares the table)
#[derive(Clone, Default)]
pub struct SessionScope {
    inner: Arc<ScopeInner>,
}

impl SessionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session with a fresh random id
    pub fn open_session(&self) -> Session {
        self.session(SessionId::new())
    }

    /// Handle to the global session
    pub fn global_session(&self) -> Session {
        self.session(SessionId::global())
    }

    /// Handle to session `id`, opening it (and running start hooks) if needed
    pub fn session(&self, id: impl Into<SessionId>) -> Session {
        use dashmap::mapref::entry::Entry;

        let id = id.into();
        let (state, created) = match self.inner.sessions.entry(id.clone()) {
            Entry::Occupied(e) => (Arc::clone(e.get()), false),
            Entry::Vacant(e) => {
                let state = Arc::new(SessionState::new());
                e.insert(Arc::clone(&state));
                (state, true)
            }
        };

        let session = Session {
            id,
            scope: self.clone(),
            state,
            tracker: None,
        };

        if created {
            debug!(session = %session.id, "session opened");
            // Clone the hook list so hooks may register further hooks
            let hooks: Vec<StartHook> = self.inner.start_hooks.read().clone();
            for hook in hooks {
                if let Some(cleanup) = hook(&session) {
                    session.on_close(cleanup);
                }
            }
        }
        session
    }

    /// Register a hook run for every session opened from now on
    pub fn on_session_start(
        &self,
        hook: impl Fn(&Session) -> Option<CloseHook> + Send + Sync + 'static,
    ) {
        self.inner.start_hooks.write().push(Arc::new(hook));
    }

    /// Close session `id`: run its close hooks (last registered first) and drop its rows
    ///
    /// Returns false if the session was not open.
    pub fn close_session(&self, id: &SessionId) -> bool {
        let Some((_, state)) = self.inner.sessions.remove(id) else {
            return false;
        };
        // Flag and drain under the hook lock so a concurrent on_close either
        // lands in this batch or sees the flag
        let hooks = {
            let mut hooks = state.close_hooks.lock();
            state.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *hooks)
        };
        for hook in hooks.into_iter().rev() {
            hook();
        }

        // Collect first: dropping a row may run destructors that touch the table
        let keys: Vec<RowKey> = self
            .inner
            .rows
            .iter()
            .filter(|entry| &entry.key().session == id)
            .map(|entry| entry.key().clone())
            .collect();
        let dropped: Vec<Row> = keys
            .iter()
            .filter_map(|key| self.inner.rows.remove(key).map(|(_, row)| row))
            .collect();
        debug!(session = %id, rows = dropped.len(), "session closed");
        drop(dropped);
        true
    }

    /// Whether session `id` is currently open
    pub fn is_open(&self, id: &SessionId) -> bool {
        self.inner.sessions.contains_key(id)
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Number of rows held for session `id`
    pub fn row_count(&self, id: &SessionId) -> usize {
        self.inner
            .rows
            .iter()
            .filter(|entry| &entry.key().session == id)
            .count()
    }

    /// Get the row for `(key, session)`, creating it with `init` on first access
    ///
    /// `init` runs outside the table lock so it may itself read other rows.
    pub(crate) fn slot<V>(
        &self,
        key: &StoreKey,
        session: &Session,
        init: impl FnOnce() -> Result<V>,
    ) -> Result<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        session.ensure_open()?;
        let row_key = RowKey {
            store: key.clone(),
            session: session.id.clone(),
        };

        if let Some(row) = self.inner.rows.get(&row_key) {
            let row = Arc::clone(row.value());
            return downcast(row, key);
        }

        let fresh: Row = Arc::new(init()?);
        let row = Arc::clone(
            self.inner
                .rows
                .entry(row_key.clone())
                .or_insert(fresh)
                .value(),
        );

        // The session may have closed while `init` ran; don't leave a row behind
        if session.is_closed() {
            self.inner.rows.remove(&row_key);
            return Err(session.closed_error());
        }
        downcast(row, key)
    }

    /// Existing row for `(key, session)` without creating it
    pub(crate) fn existing_slot<V>(&self, key: &StoreKey, session: &Session) -> Option<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        let row_key = RowKey {
            store: key.clone(),
            session: session.id.clone(),
        };
        let row = Arc::clone(self.inner.rows.get(&row_key)?.value());
        row.downcast::<V>().ok()
    }
}

fn downcast<V: Any + Send + Sync>(row: Row, key: &StoreKey) -> Result<Arc<V>> {
    row.downcast::<V>()
        .map_err(|_| TesseraError::RowTypeMismatch {
            key: key.to_string(),
        })
}

impl fmt::Debug for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionScope")
            .field("sessions", &self.inner.sessions.len())
            .field("rows", &self.inner.rows.len())
            .finish()
    }
}

/// Handle to one session, passed explicitly to store and task operations
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    scope: SessionScope,
    state: Arc<SessionState>,
    tracker: Option<Arc<ReadTracker>>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Run `hook` when this session closes (immediately if already closed)
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.state.close_hooks.lock();
        if self.is_closed() {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Close this session in its scope
    pub fn close(&self) -> bool {
        self.scope.close_session(&self.id)
    }

    /// A copy of this handle that records every tracked read into a new tracker
    pub fn tracked(&self) -> (Session, Arc<ReadTracker>) {
        let tracker = Arc::new(ReadTracker::default());
        let session = Session {
            tracker: Some(Arc::clone(&tracker)),
            ..self.clone()
        };
        (session, tracker)
    }

    /// A copy of this handle that records nothing
    pub fn untracked(&self) -> Session {
        Session {
            tracker: None,
            ..self.clone()
        }
    }

    pub(crate) fn record_read(&self, dependency: impl FnOnce() -> Arc<dyn Dependency>) {
        if let Some(tracker) = &self.tracker {
            tracker.record(dependency());
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn closed_error(&self) -> TesseraError {
        TesseraError::SessionClosed {
            session: self.id.to_string(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("tracked", &self.tracker.is_some())
            .finish()
    }
}
