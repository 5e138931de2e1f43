//! Exit-time cleanup registry
//!
//! Components that acquire a releasable resource (the log file) register a
//! cleanup action with the process's [`ResourceScope`]. The scope is created
//! before any fallible startup step and runs its actions when dropped, so
//! they run on normal return, on early error return and while unwinding
//! from a panic.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

type Action = Box<dyn FnOnce() + Send + 'static>;

/// Ordered list of cleanup actions, each run exactly once
#[derive(Default)]
pub struct ResourceScope {
    actions: Mutex<Vec<Action>>,
}

impl ResourceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cleanup action. Safe to call from several threads.
    pub fn register<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock().push(Box::new(action));
    }

    /// Run every registered action in registration order.
    ///
    /// Actions are drained before they run, so a second call (or the call
    /// from `Drop`) does nothing. A panicking action does not stop the ones
    /// after it.
    pub fn run_all(&self) {
        let actions = std::mem::take(&mut *self.lock());
        for action in actions {
            if panic::catch_unwind(AssertUnwindSafe(action)).is_err() {
                eprintln!("cleanup action panicked");
            }
        }
    }

    /// Number of actions still pending
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Action>> {
        // A poisoned lock only means a registering thread panicked; the
        // list itself is still consistent.
        self.actions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        self.run_all();
    }
}

impl std::fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceScope")
            .field("pending", &self.len())
            .finish()
    }
}
