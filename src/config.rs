//! Configuration for worker pools and dedicated fiber threads.

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

impl PinningStrategy {
    /// Returns the index into the detected core list for `worker_id`, if the
    /// strategy pins at all.
    pub fn core_index(self, worker_id: usize, num_cores: usize) -> Option<usize> {
        if num_cores == 0 {
            return None;
        }
        match self {
            PinningStrategy::None => None,
            PinningStrategy::Linear => Some(worker_id % num_cores),
            PinningStrategy::AvoidSMT => {
                let physical = num_cores.div_ceil(2);
                Some((worker_id % physical) * 2)
            }
        }
    }
}

/// Configuration for a [`WorkerPool`](crate::worker::WorkerPool).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads. Default: number of logical CPUs.
    pub num_threads: usize,
    /// How workers are pinned to cores. Default: no pinning.
    pub pinning: PinningStrategy,
    /// Prefix for worker thread names; the worker index is appended.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            pinning: PinningStrategy::None,
            thread_name: "fiberline-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Default configuration with an explicit thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Self::default()
        }
    }
}

/// Configuration for a [`ThreadFiber`](crate::thread_fiber::ThreadFiber).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadFiberConfig {
    /// Name given to the consumer thread.
    pub thread_name: String,
}

impl Default for ThreadFiberConfig {
    fn default() -> Self {
        Self {
            thread_name: "fiberline-thread".to_string(),
        }
    }
}
