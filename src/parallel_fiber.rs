//! Fiber that spreads individual actions across a thread pool.
//!
//! Unlike a batching fiber, every enqueue offers work to the pool one action
//! at a time, so many short actions from a busy producer fan out over all
//! workers instead of queueing behind a single consumer.

use crate::action::Action;
use crate::error::FiberError;
use crate::executor::{DefaultExecutor, Executor};
use crate::fiber::{ExecutionContext, Fiber, RepeatingAction, Scheduler, SubscriptionRegistry};
use crate::pool::ThreadPool;
use crate::scheduler::TimerScheduler;
use crate::state::{ExecutionState, LifecycleState};
use crate::subscriptions::{Disposable, Subscriptions};
use crate::timer::{TimerHandle, TimerThread};
use crate::worker::WorkerPool;
use crossbeam::queue::SegQueue;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Per-action thread-pool dispatch fiber.
///
/// # Dispatch policy
///
/// Each [`enqueue`](ExecutionContext::enqueue) on a fiber that is not stopped:
///
/// 1. snapshots the queue length and submits that many "drain one" tasks to
///    the pool, to catch up on backlog that may have no task in flight;
/// 2. pushes the new action;
/// 3. if the fiber is running, submits one more "drain one" task.
///
/// A drain task pops at most one action and does nothing if the queue is
/// empty by the time it runs.
///
/// # Backlog before start
///
/// [`start`](Fiber::start) does not trigger any drain. Actions enqueued while
/// the fiber is still `Created` only run once some later `enqueue` on the
/// running fiber submits catch-up tasks for them. If no such enqueue ever
/// happens, they stay queued.
pub struct ParallelPoolFiber {
    queue: Arc<SegQueue<Action>>,
    executor: Arc<dyn Executor>,
    pool: Arc<dyn ThreadPool>,
    scheduler: TimerScheduler,
    subscriptions: Subscriptions,
    state: LifecycleState,
}

impl ParallelPoolFiber {
    /// Creates a fiber on the shared worker pool and timer thread, with the
    /// panic-isolating [`DefaultExecutor`].
    pub fn new() -> Result<Arc<Self>, FiberError> {
        Ok(Self::with(
            WorkerPool::shared()?,
            Arc::new(DefaultExecutor),
            TimerThread::shared()?,
        ))
    }

    /// Creates a fiber from explicit collaborators.
    pub fn with(
        pool: Arc<dyn ThreadPool>,
        executor: Arc<dyn Executor>,
        timer: Arc<TimerThread>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let target: Weak<dyn ExecutionContext> = weak.clone();
            ParallelPoolFiber {
                queue: Arc::new(SegQueue::new()),
                executor,
                pool,
                scheduler: TimerScheduler::new(timer, target),
                subscriptions: Subscriptions::new(),
                state: LifecycleState::new(),
            }
        })
    }

    pub fn state(&self) -> ExecutionState {
        self.state.get()
    }

    fn submit_drain(&self) {
        let queue = Arc::clone(&self.queue);
        let executor = Arc::clone(&self.executor);
        self.pool.queue(Action::new(move || {
            if let Some(action) = queue.pop() {
                executor.execute_one(action);
            }
        }));
    }
}

impl ExecutionContext for ParallelPoolFiber {
    fn enqueue(&self, action: Action) {
        if self.state.is_stopped() {
            return;
        }

        let backlog = self.queue.len();
        for _ in 0..backlog {
            self.submit_drain();
        }

        self.queue.push(action);

        if self.state.get() == ExecutionState::Created {
            return;
        }

        self.submit_drain();
    }
}

impl Scheduler for ParallelPoolFiber {
    fn schedule(&self, action: Action, first_delay: Duration) -> TimerHandle {
        self.scheduler.schedule(action, first_delay)
    }

    fn schedule_on_interval(
        &self,
        action: RepeatingAction,
        first_delay: Duration,
        interval: Duration,
    ) -> TimerHandle {
        self.scheduler
            .schedule_on_interval(action, first_delay, interval)
    }
}

impl SubscriptionRegistry for ParallelPoolFiber {
    fn register_subscription(&self, subscription: Arc<dyn Disposable>) {
        self.subscriptions.add(subscription);
    }

    fn deregister_subscription(&self, subscription: &Arc<dyn Disposable>) -> bool {
        self.subscriptions.remove(subscription)
    }
}

impl Fiber for ParallelPoolFiber {
    fn start(&self) -> Result<(), FiberError> {
        self.state.start()
    }

    /// Cancels timers, rejects further actions and disposes subscriptions.
    ///
    /// Actions already queued or already handed to the pool may still run.
    fn stop(&self) {
        self.scheduler.dispose();
        if self.state.stop() != ExecutionState::Stopped {
            log::debug!(
                "parallel fiber stopped with {} queued action(s)",
                self.queue.len()
            );
        }
        self.subscriptions.dispose();
    }

    fn queue_size(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for ParallelPoolFiber {
    fn drop(&mut self) {
        self.stop();
    }
}
