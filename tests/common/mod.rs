//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `TIMEOUT` passes
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Async variant of [`wait_for`] that yields to the runtime between polls
pub async fn wait_for_async(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Collects everything a listener receives
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn listener(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |value: &T| seen.lock().push(value.clone())
    }

    pub fn values(&self) -> Vec<T> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

/// One-shot latch a task body can block on until the test opens it
#[derive(Clone, Default)]
pub struct Gate {
    state: Arc<(Mutex<bool>, parking_lot::Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        *self.state.0.lock() = true;
        self.state.1.notify_all();
    }

    /// Block until opened; false on timeout
    pub fn wait(&self) -> bool {
        let mut open = self.state.0.lock();
        let deadline = Instant::now() + TIMEOUT;
        while !*open {
            if self.state.1.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}
