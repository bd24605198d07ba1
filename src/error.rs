//! Error type shared by fibers, pools and timers.

use thiserror::Error;

/// Errors reported synchronously by fiber lifecycle and pool management calls.
///
/// Failures of the actions themselves never surface here; they are handled by
/// the [`Executor`](crate::executor::Executor) on the execution path.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FiberError {
    /// `start()` was called on a fiber that is already running.
    #[error("fiber already started")]
    AlreadyStarted,

    /// `start()` was called on a fiber that has been stopped.
    #[error("fiber is stopped and cannot be restarted")]
    Stopped,

    /// An OS thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// One or more worker threads panicked and could not be joined cleanly.
    #[error("{count} worker thread(s) panicked")]
    WorkerPanicked {
        /// Number of workers whose join reported a panic.
        count: usize,
    },

    /// A thread tried to join itself.
    #[error("cannot join a fiber thread from within itself")]
    JoinSelf,
}

impl FiberError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            FiberError::AlreadyStarted => "fiber_already_started",
            FiberError::Stopped => "fiber_stopped",
            FiberError::Spawn(_) => "thread_spawn_failed",
            FiberError::WorkerPanicked { .. } => "worker_panicked",
            FiberError::JoinSelf => "join_self",
        }
    }
}
