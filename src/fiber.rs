//! Traits shared by every fiber kind.
//!
//! A fiber is an execution context that accepts actions and guarantees they
//! eventually run, either on a dedicated consumer thread
//! ([`ThreadFiber`](crate::thread_fiber::ThreadFiber)) or through thread-pool
//! dispatch ([`ParallelPoolFiber`](crate::parallel_fiber::ParallelPoolFiber)).

use crate::action::Action;
use crate::error::FiberError;
use crate::subscriptions::Disposable;
use crate::timer::TimerHandle;
use std::sync::Arc;
use std::time::Duration;

/// A callback that may run many times, as used by recurring timers.
pub type RepeatingAction = Arc<dyn Fn() + Send + Sync + 'static>;

/// Something actions can be handed to.
pub trait ExecutionContext: Send + Sync {
    /// Hands `action` over for later execution. Never blocks on execution.
    fn enqueue(&self, action: Action);

    /// Convenience wrapper around [`enqueue`](ExecutionContext::enqueue) for closures.
    fn enqueue_fn<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
        Self: Sized,
    {
        self.enqueue(Action::new(work));
    }
}

/// Turns elapsed time into enqueued actions.
pub trait Scheduler: Send + Sync {
    /// Enqueues `action` once, after `first_delay`.
    fn schedule(&self, action: Action, first_delay: Duration) -> TimerHandle;

    /// Enqueues a call to `action` after `first_delay` and then on every
    /// `interval` until the returned handle is disposed.
    fn schedule_on_interval(
        &self,
        action: RepeatingAction,
        first_delay: Duration,
        interval: Duration,
    ) -> TimerHandle;
}

/// Registry of subscriptions torn down together with a fiber.
pub trait SubscriptionRegistry: Send + Sync {
    fn register_subscription(&self, subscription: Arc<dyn Disposable>);

    /// Removes a subscription without disposing it. Returns whether it was
    /// registered.
    fn deregister_subscription(&self, subscription: &Arc<dyn Disposable>) -> bool;
}

/// An execution context with a Created -> Running -> Stopped lifecycle.
pub trait Fiber: ExecutionContext + Scheduler + SubscriptionRegistry {
    /// Starts consuming actions.
    ///
    /// Fails with [`FiberError::AlreadyStarted`] when running and
    /// [`FiberError::Stopped`] after a stop.
    fn start(&self) -> Result<(), FiberError>;

    /// Stops the fiber: cancels its timers, rejects further actions and
    /// disposes its subscriptions. Safe to call repeatedly.
    fn stop(&self);

    /// Same as [`stop`](Fiber::stop).
    fn dispose(&self) {
        self.stop();
    }

    /// Number of actions waiting to run. Best effort.
    fn queue_size(&self) -> usize;
}
