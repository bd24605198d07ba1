//! Worker thread implementation.
//!
//! Worker threads continuously pull actions from their local deque, the
//! shared injector, and their siblings' deques, and execute them. This is the
//! default [`ThreadPool`] behind pool-backed fibers.

use crate::action::Action;
use crate::config::{PinningStrategy, PoolConfig};
use crate::error::FiberError;
use crate::executor::panic_message;
use crate::pool::ThreadPool;
use crossbeam::deque::{Injector, Steal, Stealer, Worker as Deque};
use crossbeam::utils::Backoff;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

/// Upper bound on how long an idle worker parks before re-polling.
const IDLE_PARK: Duration = Duration::from_millis(1);

lazy_static! {
    static ref SHARED_POOL: Mutex<Option<Arc<WorkerPool>>> = Mutex::new(None);
}

/// State shared between the pool handle and its worker threads.
struct Shared {
    injector: Injector<Action>,
    shutdown: AtomicBool,
    sleeping: AtomicUsize,
}

/// A worker thread that executes actions from the pool's queues.
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        name: String,
        local_queue: Deque<Action>,
        stealers: Arc<Vec<Stealer<Action>>>,
        shared: Arc<Shared>,
        pinning: PinningStrategy,
    ) -> Result<Self, FiberError> {
        let handle = thread::Builder::new().name(name).spawn(move || {
            if let Some(core_ids) = core_affinity::get_core_ids() {
                if let Some(index) = pinning.core_index(id, core_ids.len()) {
                    if !core_affinity::set_for_current(core_ids[index]) {
                        log::warn!("worker {} could not be pinned to core {}", id, index);
                    }
                }
            }

            Worker::run_loop(id, local_queue, stealers, shared);
        })?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    /// Main execution loop for the worker thread with work-stealing.
    ///
    /// Shutdown is only honoured once the worker finds no work, so actions
    /// already moved into a local deque still run.
    fn run_loop(
        id: usize,
        local_queue: Deque<Action>,
        stealers: Arc<Vec<Stealer<Action>>>,
        shared: Arc<Shared>,
    ) {
        let backoff = Backoff::new();

        loop {
            match Worker::find_action(&local_queue, &stealers, &shared.injector) {
                Some(action) => {
                    backoff.reset();
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| action.execute())) {
                        log::error!(
                            "worker {} caught panic from task: {}",
                            id,
                            panic_message(payload.as_ref())
                        );
                    }
                }
                None => {
                    if shared.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    if backoff.is_completed() {
                        shared.sleeping.fetch_add(1, Ordering::SeqCst);
                        thread::park_timeout(IDLE_PARK);
                        shared.sleeping.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        backoff.snooze();
                    }
                }
            }
        }

        log::trace!("worker {} exiting", id);
    }

    fn find_action(
        local_queue: &Deque<Action>,
        stealers: &[Stealer<Action>],
        injector: &Injector<Action>,
    ) -> Option<Action> {
        local_queue.pop().or_else(|| {
            loop {
                match injector.steal_batch_and_pop(local_queue) {
                    Steal::Success(action) => return Some(action),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }

            stealers
                .iter()
                .map(|s| s.steal())
                .find_map(|steal_result| match steal_result {
                    Steal::Success(action) => Some(action),
                    _ => None,
                })
        })
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> usize {
        self.id
    }

    fn thread(&self) -> Option<&Thread> {
        self.handle.as_ref().map(|h| h.thread())
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// A pool of worker threads with work-stealing support.
pub struct WorkerPool {
    workers: Mutex<Vec<Worker>>,
    threads: Vec<Thread>,
    next_wake: AtomicUsize,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Creates a new worker pool with `num_threads` unpinned workers.
    pub fn new(num_threads: usize) -> Result<Self, FiberError> {
        Self::with_config(PoolConfig::with_threads(num_threads))
    }

    /// Creates a new worker pool from a configuration.
    ///
    /// A thread count of zero is raised to one.
    pub fn with_config(config: PoolConfig) -> Result<Self, FiberError> {
        let num_threads = config.num_threads.max(1);
        let shared = Arc::new(Shared {
            injector: Injector::new(),
            shutdown: AtomicBool::new(false),
            sleeping: AtomicUsize::new(0),
        });

        let mut local_queues = Vec::with_capacity(num_threads);
        let mut stealers = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let deque = Deque::new_fifo();
            stealers.push(deque.stealer());
            local_queues.push(deque);
        }
        let stealers = Arc::new(stealers);

        let mut workers = Vec::with_capacity(num_threads);
        for (id, local_queue) in local_queues.into_iter().enumerate() {
            let spawned = Worker::spawn(
                id,
                format!("{}-{}", config.thread_name, id),
                local_queue,
                Arc::clone(&stealers),
                Arc::clone(&shared),
                config.pinning,
            );
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    // Release the workers that did start before reporting.
                    shared.shutdown.store(true, Ordering::Release);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(err);
                }
            }
        }

        log::debug!(
            "started worker pool with {} threads ({:?} pinning)",
            num_threads,
            config.pinning
        );

        let threads = workers.iter().filter_map(|w| w.thread().cloned()).collect();
        Ok(WorkerPool {
            workers: Mutex::new(workers),
            threads,
            next_wake: AtomicUsize::new(0),
            shared,
        })
    }

    /// Returns the process-wide pool used by default-constructed fibers.
    ///
    /// The pool is created on first use with [`PoolConfig::default`] and is
    /// never shut down.
    pub fn shared() -> Result<Arc<WorkerPool>, FiberError> {
        let mut slot = SHARED_POOL.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(WorkerPool::with_config(PoolConfig::default())?);
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Submits multiple actions at once.
    pub fn queue_batch<I>(&self, actions: I)
    where
        I: IntoIterator<Item = Action>,
    {
        for action in actions {
            self.shared.injector.push(action);
        }
        self.wake_one();
    }

    /// Returns the number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Returns the number of actions waiting in the global injector.
    pub fn pending(&self) -> usize {
        self.shared.injector.len()
    }

    fn wake_one(&self) {
        if self.shared.sleeping.load(Ordering::SeqCst) == 0 || self.threads.is_empty() {
            return;
        }
        let index = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.threads.len();
        self.threads[index].unpark();
    }

    fn signal_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        for thread in &self.threads {
            thread.unpark();
        }
    }

    /// Shuts down the worker pool and waits for all threads to finish.
    ///
    /// Actions already queued are run first. Calling this from one of the
    /// pool's own workers fails with [`FiberError::JoinSelf`]. Repeated calls
    /// return `Ok(())`.
    pub fn shutdown(&self) -> Result<(), FiberError> {
        let current = thread::current().id();
        if self.threads.iter().any(|t| t.id() == current) {
            return Err(FiberError::JoinSelf);
        }

        while !self.shared.injector.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }

        self.signal_shutdown();

        let workers = std::mem::take(&mut *self.workers.lock());
        let mut failed_count = 0;
        for worker in workers {
            let worker_id = worker.id();
            if worker.join().is_err() {
                failed_count += 1;
                log::error!("worker {} panicked during execution", worker_id);
            }
        }

        if failed_count > 0 {
            Err(FiberError::WorkerPanicked {
                count: failed_count,
            })
        } else {
            Ok(())
        }
    }
}

impl ThreadPool for WorkerPool {
    fn queue(&self, action: Action) {
        self.shared.injector.push(action);
        self.wake_one();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // The last handle may be dropped on a worker thread, so never join here.
        self.signal_shutdown();
    }
}
