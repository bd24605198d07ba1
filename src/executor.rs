//! Executors invoke the actions a queue or fiber has drained.
//!
//! Queues and fibers never catch failures themselves. Whether a panicking
//! action is isolated or allowed to unwind is decided entirely here.

use crate::action::Action;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Invokes drained actions.
///
/// Implementations must run every action they are given. An isolating
/// implementation guarantees that one failing action does not prevent the
/// rest of the batch from running.
pub trait Executor: Send + Sync {
    /// Executes every action in `batch`, leaving it empty.
    ///
    /// The buffer is borrowed rather than consumed so the caller can reuse
    /// its allocation for the next batch.
    fn execute_batch(&self, batch: &mut Vec<Action>) {
        for action in batch.drain(..) {
            self.execute_one(action);
        }
    }

    /// Executes a single action.
    fn execute_one(&self, action: Action);
}

/// Executor that isolates panics per action and logs them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExecutor;

impl DefaultExecutor {
    pub fn new() -> Self {
        DefaultExecutor
    }
}

impl Executor for DefaultExecutor {
    fn execute_one(&self, action: Action) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| action.execute())) {
            log::error!("action panicked: {}", panic_message(payload.as_ref()));
        }
    }
}

/// Executor that runs actions directly on the calling thread.
///
/// A panicking action unwinds into the caller and abandons the rest of the
/// batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute_one(&self, action: Action) {
        action.execute();
    }
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
