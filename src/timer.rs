//! Timer thread that turns deadlines into enqueued actions.
//!
//! One background thread keeps a min-heap of pending entries ordered by
//! deadline. When an entry is due, its action is handed to the target
//! execution context; the timer thread never runs user code itself.

use crate::action::Action;
use crate::error::FiberError;
use crate::fiber::{ExecutionContext, RepeatingAction};
use crate::subscriptions::Disposable;
use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shortest interval a recurring timer may use.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Stand-in for delays too large to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(u32::MAX as u64);

/// Heap size below which cancelled entries are left for the loop to discard.
const PRUNE_THRESHOLD: usize = 64;

lazy_static! {
    static ref SHARED_TIMER: Mutex<Option<Arc<TimerThread>>> = Mutex::new(None);
}

enum TimerKind {
    Once(Mutex<Option<Action>>),
    Interval {
        callback: RepeatingAction,
        interval: Duration,
    },
}

/// Shared state of a single scheduled timer.
pub(crate) struct TimerTask {
    kind: TimerKind,
    target: Weak<dyn ExecutionContext>,
    cancelled: AtomicBool,
}

impl TimerTask {
    pub(crate) fn once(action: Action, target: Weak<dyn ExecutionContext>) -> Arc<Self> {
        Arc::new(TimerTask {
            kind: TimerKind::Once(Mutex::new(Some(action))),
            target,
            cancelled: AtomicBool::new(false),
        })
    }

    pub(crate) fn interval(
        callback: RepeatingAction,
        interval: Duration,
        target: Weak<dyn ExecutionContext>,
    ) -> Arc<Self> {
        Arc::new(TimerTask {
            kind: TimerKind::Interval {
                callback,
                interval: interval.max(MIN_INTERVAL),
            },
            target,
            cancelled: AtomicBool::new(false),
        })
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let TimerKind::Once(slot) = &self.kind {
            slot.lock().take();
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True once the timer can no longer produce work.
    pub(crate) fn is_finished(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match &self.kind {
            TimerKind::Once(slot) => slot.lock().is_none(),
            TimerKind::Interval { .. } => false,
        }
    }

    fn interval_period(&self) -> Option<Duration> {
        match &self.kind {
            TimerKind::Once(_) => None,
            TimerKind::Interval { interval, .. } => Some(*interval),
        }
    }

    /// Hands the due work to the target.
    ///
    /// The enqueued action re-checks cancellation when it runs, so disposing
    /// a handle also suppresses a tick that was already enqueued.
    fn fire(self: &Arc<Self>) {
        let Some(target) = self.target.upgrade() else {
            self.cancel();
            return;
        };

        let task = Arc::clone(self);
        match &self.kind {
            TimerKind::Once(slot) => {
                let Some(action) = slot.lock().take() else {
                    return;
                };
                target.enqueue(Action::new(move || {
                    if !task.is_cancelled() {
                        action.execute();
                    }
                }));
            }
            TimerKind::Interval { callback, .. } => {
                let callback = Arc::clone(callback);
                target.enqueue(Action::new(move || {
                    if !task.is_cancelled() {
                        callback();
                    }
                }));
            }
        }
    }
}

/// Handle to a scheduled timer. Disposing it cancels future firings.
#[derive(Clone)]
pub struct TimerHandle {
    task: Arc<TimerTask>,
}

impl TimerHandle {
    pub(crate) fn new(task: Arc<TimerTask>) -> Self {
        TimerHandle { task }
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }
}

impl Disposable for TimerHandle {
    fn dispose(&self) {
        self.task.cancel();
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    task: Arc<TimerTask>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// `from + delay`, saturating to a deadline that is never reached in practice.
fn deadline_after(from: Instant, delay: Duration) -> Instant {
    from.checked_add(delay)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

struct TimerState {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
    prune_at: usize,
    shutdown: bool,
}

impl TimerState {
    /// Drops cancelled entries once the heap has doubled since the last sweep.
    fn prune_cancelled(&mut self) {
        if self.heap.len() < self.prune_at {
            return;
        }
        self.heap.retain(|Reverse(entry)| !entry.task.is_cancelled());
        self.prune_at = (self.heap.len() * 2).max(PRUNE_THRESHOLD);
    }

    /// Pops cancelled entries sitting at the front of the heap.
    fn discard_cancelled_front(&mut self) {
        while self
            .heap
            .peek()
            .is_some_and(|Reverse(entry)| entry.task.is_cancelled())
        {
            self.heap.pop();
        }
    }

    fn push(&mut self, deadline: Instant, task: Arc<TimerTask>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            deadline,
            seq,
            task,
        }));
    }
}

struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// Background thread firing scheduled timers.
pub struct TimerThread {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    /// Spawns a new timer thread.
    pub fn new() -> Result<Self, FiberError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                prune_at: PRUNE_THRESHOLD,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("fiberline-timer".to_string())
            .spawn(move || TimerThread::run_loop(&thread_shared))?;

        Ok(TimerThread {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Returns the process-wide timer thread, starting it on first use.
    pub fn shared() -> Result<Arc<TimerThread>, FiberError> {
        let mut slot = SHARED_TIMER.lock();
        if let Some(timer) = slot.as_ref() {
            return Ok(Arc::clone(timer));
        }
        let timer = Arc::new(TimerThread::new()?);
        *slot = Some(Arc::clone(&timer));
        Ok(timer)
    }

    pub(crate) fn insert(&self, task: Arc<TimerTask>, delay: Duration) {
        let deadline = deadline_after(Instant::now(), delay);
        let mut state = self.shared.state.lock();
        state.prune_cancelled();
        state.push(deadline, task);
        self.shared.wakeup.notify_one();
    }

    /// Number of entries still waiting in the heap. Cancelled entries are
    /// swept lazily and may still be counted.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Stops the timer thread and waits for it to exit. Pending timers never fire.
    pub fn shutdown(&self) -> Result<(), FiberError> {
        self.signal_shutdown();
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) if handle.thread().id() == thread::current().id() => {
                Err(FiberError::JoinSelf)
            }
            Some(handle) => handle
                .join()
                .map_err(|_| FiberError::WorkerPanicked { count: 1 }),
            None => Ok(()),
        }
    }

    fn signal_shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.shutdown = true;
        state.heap.clear();
        self.shared.wakeup.notify_all();
    }

    fn run_loop(shared: &Shared) {
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                break;
            }

            state.discard_cancelled_front();
            let now = Instant::now();
            let next_deadline = state.heap.peek().map(|Reverse(entry)| entry.deadline);
            match next_deadline {
                None => {
                    shared.wakeup.wait(&mut state);
                }
                Some(deadline) if deadline > now => {
                    shared.wakeup.wait_until(&mut state, deadline);
                }
                Some(_) => {
                    if let Some(Reverse(entry)) = state.heap.pop() {
                        TimerThread::fire_entry(&mut state, entry, now);
                    }
                }
            }
        }
        log::trace!("timer thread exiting");
    }

    fn fire_entry(state: &mut MutexGuard<'_, TimerState>, entry: Entry, now: Instant) {
        if entry.task.is_cancelled() {
            return;
        }

        if let Some(interval) = entry.task.interval_period() {
            let mut next = deadline_after(entry.deadline, interval);
            // Skip missed ticks instead of firing a burst.
            if next <= now {
                next = deadline_after(now, interval);
            }
            state.push(next, Arc::clone(&entry.task));
        }

        MutexGuard::unlocked(state, || entry.task.fire());
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}
