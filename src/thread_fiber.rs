//! Fiber backed by one dedicated consumer thread.
//!
//! Actions run in enqueue order, in batches, on a thread owned by the fiber.

use crate::action::Action;
use crate::config::ThreadFiberConfig;
use crate::error::FiberError;
use crate::executor::{DefaultExecutor, Executor};
use crate::fiber::{ExecutionContext, Fiber, RepeatingAction, Scheduler, SubscriptionRegistry};
use crate::queue::{BatchQueue, Queue};
use crate::scheduler::TimerScheduler;
use crate::state::{ExecutionState, LifecycleState};
use crate::subscriptions::{Disposable, Subscriptions};
use crate::timer::{TimerHandle, TimerThread};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A fiber whose actions all run on its own thread.
///
/// Actions enqueued before [`start`](Fiber::start) are buffered and run as the
/// first batch once the thread is up.
pub struct ThreadFiber {
    queue: Arc<BatchQueue>,
    config: ThreadFiberConfig,
    thread: Mutex<Option<JoinHandle<()>>>,
    scheduler: TimerScheduler,
    subscriptions: Subscriptions,
    state: LifecycleState,
}

impl ThreadFiber {
    /// Creates a fiber with the default configuration and executor, using the
    /// shared timer thread.
    pub fn new() -> Result<Arc<Self>, FiberError> {
        Ok(Self::with(
            Arc::new(DefaultExecutor),
            TimerThread::shared()?,
            ThreadFiberConfig::default(),
        ))
    }

    /// Creates a fiber from explicit collaborators.
    pub fn with(
        executor: Arc<dyn Executor>,
        timer: Arc<TimerThread>,
        config: ThreadFiberConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let target: Weak<dyn ExecutionContext> = weak.clone();
            ThreadFiber {
                queue: Arc::new(BatchQueue::new(executor)),
                config,
                thread: Mutex::new(None),
                scheduler: TimerScheduler::new(timer, target),
                subscriptions: Subscriptions::new(),
                state: LifecycleState::new(),
            }
        })
    }

    pub fn state(&self) -> ExecutionState {
        self.state.get()
    }

    /// Name of the consumer thread.
    pub fn thread_name(&self) -> &str {
        &self.config.thread_name
    }

    /// Waits for the consumer thread to exit.
    ///
    /// Returns immediately if the fiber was never started or has already been
    /// joined. The thread only exits after [`stop`](Fiber::stop).
    pub fn join(&self) -> Result<(), FiberError> {
        let handle = self.thread.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            *self.thread.lock() = Some(handle);
            return Err(FiberError::JoinSelf);
        }
        handle
            .join()
            .map_err(|_| FiberError::WorkerPanicked { count: 1 })
    }
}

impl ExecutionContext for ThreadFiber {
    fn enqueue(&self, action: Action) {
        if self.state.is_stopped() {
            return;
        }
        self.queue.enqueue(action);
    }
}

impl Scheduler for ThreadFiber {
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

impl SubscriptionRegistry for ThreadFiber {
    fn register_subscription(&self, subscription: Arc<dyn Disposable>) {
        self.subscriptions.add(subscription);
    }

    fn deregister_subscription(&self, subscription: &Arc<dyn Disposable>) -> bool {
        self.subscriptions.remove(subscription)
    }
}

impl Fiber for ThreadFiber {
    fn start(&self) -> Result<(), FiberError> {
        self.state.start()?;

        let queue = Arc::clone(&self.queue);
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || queue.run());

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                log::debug!("thread fiber '{}' started", self.config.thread_name);
                Ok(())
            }
            Err(err) => {
                log::error!(
                    "thread fiber '{}' failed to spawn: {}",
                    self.config.thread_name,
                    err
                );
                self.stop();
                Err(FiberError::Spawn(err))
            }
        }
    }

    /// Cancels timers, stops the consumer loop and disposes subscriptions.
    ///
    /// The batch currently executing finishes; anything still queued is
    /// discarded.
    fn stop(&self) {
        self.scheduler.dispose();
        self.state.stop();
        self.queue.stop();
        self.subscriptions.dispose();
    }

    fn queue_size(&self) -> usize {
        self.queue.size()
    }
}

impl Drop for ThreadFiber {
    fn drop(&mut self) {
        // Without this the consumer thread would wait on the queue forever.
        self.stop();
    }
}
