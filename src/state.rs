//! Fiber lifecycle: Created -> Running -> Stopped.

use crate::error::FiberError;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where a fiber is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutionState {
    Created = 0,
    Running = 1,
    Stopped = 2,
}

impl ExecutionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExecutionState::Created,
            1 => ExecutionState::Running,
            _ => ExecutionState::Stopped,
        }
    }
}

/// Atomically guarded [`ExecutionState`].
///
/// Transitions are monotonic. All accesses are `SeqCst` so a producer that
/// observes `Running` also observes everything the starter did before the
/// transition.
#[derive(Debug)]
pub struct LifecycleState {
    state: AtomicU8,
}

impl LifecycleState {
    pub fn new() -> Self {
        LifecycleState {
            state: AtomicU8::new(ExecutionState::Created as u8),
        }
    }

    pub fn get(&self) -> ExecutionState {
        ExecutionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves Created -> Running.
    pub fn start(&self) -> Result<(), FiberError> {
        match self.state.compare_exchange(
            ExecutionState::Created as u8,
            ExecutionState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(()),
            Err(current) => match ExecutionState::from_u8(current) {
                ExecutionState::Stopped => Err(FiberError::Stopped),
                _ => Err(FiberError::AlreadyStarted),
            },
        }
    }

    /// Moves to Stopped from any state and returns the previous state.
    pub fn stop(&self) -> ExecutionState {
        ExecutionState::from_u8(
            self.state
                .swap(ExecutionState::Stopped as u8, Ordering::SeqCst),
        )
    }

    pub fn is_stopped(&self) -> bool {
        self.get() == ExecutionState::Stopped
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}
