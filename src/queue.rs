//! Batching single-consumer queue.
//!
//! Producers append to an `incoming` buffer under a mutex. The consumer swaps
//! that buffer with an empty spare, releases the lock, and hands the whole
//! batch to the [`Executor`]. The swap is O(1) regardless of batch size and
//! both buffers keep their capacity across batches.

use crate::action::Action;
use crate::executor::{DefaultExecutor, Executor};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Holds actions until an execution context consumes them.
pub trait Queue: Send + Sync {
    /// Appends an action and wakes the consumer. Always accepted.
    fn enqueue(&self, action: Action);

    /// Executes batches until stopped. Must be driven by a single consumer.
    fn run(&self);

    /// Stops consuming. Idempotent.
    fn stop(&self);

    /// Pending action count. Best effort under concurrent producers.
    fn size(&self) -> usize;
}

struct Buffers {
    incoming: Vec<Action>,
    spare: Vec<Action>,
    /// Length of the batch currently out with the executor.
    draining: usize,
    running: bool,
}

/// Mutex + condvar double-buffered queue.
pub struct BatchQueue {
    buffers: Mutex<Buffers>,
    ready: Condvar,
    executor: Arc<dyn Executor>,
}

impl BatchQueue {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        BatchQueue {
            buffers: Mutex::new(Buffers {
                incoming: Vec::new(),
                spare: Vec::new(),
                draining: 0,
                running: true,
            }),
            ready: Condvar::new(),
            executor,
        }
    }

    /// Waits for and executes one batch.
    ///
    /// Returns `false` once the queue has been stopped; actions still in the
    /// incoming buffer at that point are never executed.
    pub fn execute_next_batch(&self) -> bool {
        let Some(batch) = self.dequeue_all() else {
            return false;
        };
        let mut batch = Recycle { queue: self, batch };
        log::trace!("executing batch of {} action(s)", batch.batch.len());
        self.executor.execute_batch(&mut batch.batch);
        true
    }

    fn dequeue_all(&self) -> Option<Vec<Action>> {
        let mut buffers = self.buffers.lock();
        while buffers.incoming.is_empty() && buffers.running {
            self.ready.wait(&mut buffers);
        }
        if !buffers.running {
            return None;
        }
        let spare = std::mem::take(&mut buffers.spare);
        let batch = std::mem::replace(&mut buffers.incoming, spare);
        buffers.draining = batch.len();
        Some(batch)
    }

    pub fn is_running(&self) -> bool {
        self.buffers.lock().running
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        BatchQueue::new(Arc::new(DefaultExecutor))
    }
}

impl Queue for BatchQueue {
    fn enqueue(&self, action: Action) {
        let mut buffers = self.buffers.lock();
        buffers.incoming.push(action);
        self.ready.notify_all();
    }

    fn run(&self) {
        while self.execute_next_batch() {}
    }

    fn stop(&self) {
        let mut buffers = self.buffers.lock();
        if buffers.running {
            log::debug!(
                "stopping batch queue with {} pending action(s)",
                buffers.incoming.len()
            );
        }
        buffers.running = false;
        self.ready.notify_all();
    }

    fn size(&self) -> usize {
        let buffers = self.buffers.lock();
        buffers.incoming.len() + buffers.draining
    }
}

/// Returns the drained buffer to the queue once the executor is done with it,
/// including when the executor unwinds.
struct Recycle<'a> {
    queue: &'a BatchQueue,
    batch: Vec<Action>,
}

impl Drop for Recycle<'_> {
    fn drop(&mut self) {
        self.batch.clear();
        let mut buffers = self.queue.buffers.lock();
        buffers.draining = 0;
        buffers.spare = std::mem::take(&mut self.batch);
    }
}
