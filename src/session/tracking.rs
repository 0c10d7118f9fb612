//! Read tracking for derived values
//!
//! A tracked `Session` records every store read through `get()` so a
//! `Computed` can subscribe to exactly the stores its function touched.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::store::{StoreKey, Subscription};

use super::Session;

/// Callback handed to a dependency; runs after the dependency changed
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// A store read that can be watched for changes
pub trait Dependency: Send + Sync {
    fn key(&self) -> &StoreKey;

    /// Subscribe `on_change` to changes of this dependency in `session`
    fn watch(&self, session: &Session, on_change: ChangeCallback) -> Result<Subscription>;
}

/// Collects the dependencies read through one tracked session
#[derive(Default)]
pub struct ReadTracker {
    reads: Mutex<Vec<Arc<dyn Dependency>>>,
}

impl ReadTracker {
    pub(crate) fn record(&self, dependency: Arc<dyn Dependency>) {
        let mut reads = self.reads.lock();
        if reads.iter().all(|read| read.key() != dependency.key()) {
            reads.push(dependency);
        }
    }

    /// Drain the recorded dependencies (one per store key, in first-read order)
    pub fn take(&self) -> Vec<Arc<dyn Dependency>> {
        std::mem::take(&mut *self.reads.lock())
    }

    /// Keys read so far
    pub fn keys(&self) -> FxHashSet<StoreKey> {
        self.reads.lock().iter().map(|read| read.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.reads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.lock().is_empty()
    }
}

impl std::fmt::Debug for ReadTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.reads.lock().iter().map(|r| r.key().to_string()).collect();
        f.debug_struct("ReadTracker").field("reads", &keys).finish()
    }
}
