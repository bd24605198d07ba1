//! Units of work handed to fibers, queues and thread pools.
//!
//! An [`Action`] wraps a zero-argument closure. It is consumed by value when
//! executed, so an action can never run twice.

use std::fmt;

/// A deferred, zero-argument, no-result unit of work.
pub struct Action {
    work: Box<dyn FnOnce() + Send + 'static>,
}

impl Action {
    /// Wraps a closure as an action.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Action {
            work: Box::new(work),
        }
    }

    /// Runs the action, consuming it.
    pub fn execute(self) {
        (self.work)();
    }
}

impl<F> From<F> for Action
where
    F: FnOnce() + Send + 'static,
{
    fn from(work: F) -> Self {
        Action::new(work)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").finish_non_exhaustive()
    }
}
