//! Thread-pool contract consumed by pool-backed fibers.

use crate::action::Action;
use std::sync::Arc;

/// Accepts units of work and runs each of them on some worker thread.
///
/// No ordering is promised across submissions.
pub trait ThreadPool: Send + Sync {
    fn queue(&self, action: Action);
}

impl<P: ThreadPool + ?Sized> ThreadPool for Arc<P> {
    fn queue(&self, action: Action) {
        (**self).queue(action);
    }
}

/// Runs every queued action immediately on the submitting thread.
///
/// Useful for deterministic tests and for single-threaded embedding.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePool;

impl ThreadPool for InlinePool {
    fn queue(&self, action: Action) {
        action.execute();
    }
}
