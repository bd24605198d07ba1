//! Per-fiber scheduler delegating to a shared [`TimerThread`].

use crate::action::Action;
use crate::fiber::{ExecutionContext, RepeatingAction, Scheduler};
use crate::timer::{TimerHandle, TimerTask, TimerThread};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

struct Issued {
    tasks: Vec<Arc<TimerTask>>,
    disposed: bool,
}

/// Schedules actions onto one target context and tracks every timer it
/// issued, so the owning fiber can cancel them all at once.
///
/// The target is held weakly; the fiber owns its scheduler, not the other way
/// round.
pub struct TimerScheduler {
    timer: Arc<TimerThread>,
    target: Weak<dyn ExecutionContext>,
    issued: Mutex<Issued>,
}

impl TimerScheduler {
    pub fn new(timer: Arc<TimerThread>, target: Weak<dyn ExecutionContext>) -> Self {
        TimerScheduler {
            timer,
            target,
            issued: Mutex::new(Issued {
                tasks: Vec::new(),
                disposed: false,
            }),
        }
    }

    fn track(&self, task: Arc<TimerTask>, delay: Duration) -> TimerHandle {
        {
            let mut issued = self.issued.lock();
            if issued.disposed {
                task.cancel();
                return TimerHandle::new(task);
            }
            issued.tasks.retain(|t| !t.is_finished());
            issued.tasks.push(Arc::clone(&task));
        }
        self.timer.insert(Arc::clone(&task), delay);
        TimerHandle::new(task)
    }

    /// Cancels every timer issued so far. Later requests get handles that are
    /// already cancelled.
    pub fn dispose(&self) {
        let tasks = {
            let mut issued = self.issued.lock();
            issued.disposed = true;
            std::mem::take(&mut issued.tasks)
        };
        for task in tasks {
            task.cancel();
        }
    }

    /// Number of issued timers that may still fire.
    pub fn active(&self) -> usize {
        self.issued
            .lock()
            .tasks
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }
}

impl Scheduler for TimerScheduler {
    fn schedule(&self, action: Action, first_delay: Duration) -> TimerHandle {
        self.track(TimerTask::once(action, self.target.clone()), first_delay)
    }

    fn schedule_on_interval(
        &self,
        action: RepeatingAction,
        first_delay: Duration,
        interval: Duration,
    ) -> TimerHandle {
        self.track(
            TimerTask::interval(action, interval, self.target.clone()),
            first_delay,
        )
    }
}
