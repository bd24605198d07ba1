//! # fiberline - Fiber-Style Execution Contexts
//!
//! Producers hand off actions (closures with no arguments and no result) to a
//! fiber, which guarantees they run later on some thread. Fibers also turn
//! delays and intervals into enqueued actions and tear down registered
//! subscriptions when they stop.
//!
//! ## Architecture
//!
//! - **BatchQueue**: mutex + condvar double buffer drained in whole batches by
//!   a single consumer loop.
//! - **ThreadFiber**: a `BatchQueue` driven by one dedicated thread; actions
//!   run in enqueue order.
//! - **ParallelPoolFiber**: a lock-free queue where every enqueue offers
//!   single-action drain tasks to a thread pool, so actions fan out across
//!   workers.
//! - **WorkerPool**: the default work-stealing thread pool.
//! - **TimerThread / TimerScheduler**: delayed and recurring actions.
//! - **Executor**: decides how drained actions are invoked and whether panics
//!   are isolated.
//!
//! ## Example
//!
//! ```no_run
//! use fiberline::{ExecutionContext, Fiber, ParallelPoolFiber};
//!
//! let fiber = ParallelPoolFiber::new().unwrap();
//! fiber.start().unwrap();
//!
//! fiber.enqueue_fn(|| {
//!     println!("Hello from a pool worker!");
//! });
//!
//! fiber.stop();
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod executor;
pub mod fiber;
pub mod parallel_fiber;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod subscriptions;
pub mod thread_fiber;
pub mod timer;
pub mod worker;

pub use action::Action;
pub use config::{PinningStrategy, PoolConfig, ThreadFiberConfig};
pub use error::FiberError;
pub use executor::{DefaultExecutor, Executor, InlineExecutor};
pub use fiber::{ExecutionContext, Fiber, RepeatingAction, Scheduler, SubscriptionRegistry};
pub use parallel_fiber::ParallelPoolFiber;
pub use pool::{InlinePool, ThreadPool};
pub use queue::{BatchQueue, Queue};
pub use scheduler::TimerScheduler;
pub use state::{ExecutionState, LifecycleState};
pub use subscriptions::{Disposable, OnDispose, Subscriptions};
pub use thread_fiber::ThreadFiber;
pub use timer::{TimerHandle, TimerThread};
pub use worker::WorkerPool;

#[cfg(test)]
mod tests;
