//! Integration tests for fibers running on real worker threads.

use crate::{
    Action, DefaultExecutor, Disposable, ExecutionContext, Fiber, ParallelPoolFiber, Scheduler,
    SubscriptionRegistry, ThreadFiber, ThreadFiberConfig, TimerThread, WorkerPool,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn parallel_fiber(threads: usize) -> (Arc<ParallelPoolFiber>, Arc<WorkerPool>) {
    init_logging();
    let pool = Arc::new(WorkerPool::new(threads).unwrap());
    let fiber = ParallelPoolFiber::with(
        pool.clone(),
        Arc::new(DefaultExecutor),
        Arc::new(TimerThread::new().unwrap()),
    );
    (fiber, pool)
}

struct CountingHandle(AtomicUsize);

impl Disposable for CountingHandle {
    fn dispose(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_parallel_fiber_runs_every_action_once() {
    let (fiber, pool) = parallel_fiber(4);
    fiber.start().unwrap();

    let num_actions = 1000;
    let slots: Arc<Vec<AtomicUsize>> =
        Arc::new((0..num_actions).map(|_| AtomicUsize::new(0)).collect());

    for i in 0..num_actions {
        let slots = slots.clone();
        fiber.enqueue_fn(move || {
            slots[i].fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(wait_until(Duration::from_secs(5), || {
        slots.iter().all(|s| s.load(Ordering::SeqCst) >= 1)
    }));
    // Leftover catch-up tasks find an empty queue and must not re-run anything.
    pool.shutdown().unwrap();
    assert!(slots.iter().all(|s| s.load(Ordering::SeqCst) == 1));
    assert_eq!(fiber.queue_size(), 0);
}

#[test]
fn test_parallel_fiber_many_producers() {
    let (fiber, pool) = parallel_fiber(4);
    fiber.start().unwrap();
    let sum = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let fiber = fiber.clone();
            let sum = sum.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    let sum = sum.clone();
                    let value = p * 250 + i;
                    fiber.enqueue_fn(move || {
                        sum.fetch_add(value, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let expected: usize = (0..1000).sum();
    assert!(wait_until(Duration::from_secs(5), || {
        sum.load(Ordering::SeqCst) == expected
    }));
    pool.shutdown().unwrap();
}

#[test]
fn test_stopped_parallel_fiber_never_runs_actions() {
    let (fiber, pool) = parallel_fiber(2);
    fiber.start().unwrap();
    fiber.stop();

    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let hits = hits.clone();
        fiber.enqueue_fn(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    pool.shutdown().unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_enqueue_before_start_drained_by_next_enqueue() {
    let (fiber, pool) = parallel_fiber(2);
    let a = Arc::new(AtomicUsize::new(0));
    let b = Arc::new(AtomicUsize::new(0));

    let a_clone = a.clone();
    fiber.enqueue_fn(move || {
        a_clone.fetch_add(1, Ordering::SeqCst);
    });
    fiber.start().unwrap();

    // Start alone never drains the backlog.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(a.load(Ordering::SeqCst), 0);
    assert_eq!(fiber.queue_size(), 1);

    let b_clone = b.clone();
    fiber.enqueue_fn(move || {
        b_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert!(wait_until(Duration::from_secs(2), || {
        a.load(Ordering::SeqCst) == 1 && b.load(Ordering::SeqCst) == 1
    }));
    pool.shutdown().unwrap();
}

#[test]
fn test_stop_disposes_subscriptions_once() {
    let (fiber, pool) = parallel_fiber(1);
    let handle = Arc::new(CountingHandle(AtomicUsize::new(0)));
    fiber.register_subscription(handle.clone());

    fiber.stop();
    fiber.stop();
    assert_eq!(handle.0.load(Ordering::SeqCst), 1);

    let kept = Arc::new(CountingHandle(AtomicUsize::new(0)));
    let kept_dyn: Arc<dyn Disposable> = kept.clone();
    let (other, other_pool) = parallel_fiber(1);
    other.register_subscription(kept_dyn.clone());
    assert!(other.deregister_subscription(&kept_dyn));
    assert!(!other.deregister_subscription(&kept_dyn));
    other.stop();
    assert_eq!(kept.0.load(Ordering::SeqCst), 0);

    pool.shutdown().unwrap();
    other_pool.shutdown().unwrap();
}

#[test]
fn test_schedule_one_shot_and_interval() {
    let (fiber, pool) = parallel_fiber(2);
    fiber.start().unwrap();

    let once = Arc::new(AtomicUsize::new(0));
    let once_clone = once.clone();
    fiber.schedule(
        Action::new(move || {
            once_clone.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::from_millis(1),
    );
    assert!(wait_until(Duration::from_secs(2), || {
        once.load(Ordering::SeqCst) == 1
    }));

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticks_clone = ticks.clone();
    let started = Instant::now();
    let handle = fiber.schedule_on_interval(
        Arc::new(move || {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::from_millis(10),
        Duration::from_millis(10),
    );
    // Ticks are due at 10, 20 and 30ms; allow a little slack past 50ms.
    let three_ticks = wait_until(Duration::from_millis(70), || {
        ticks.load(Ordering::SeqCst) >= 3
    });
    assert!(
        three_ticks,
        "only {} tick(s) after {:?}",
        ticks.load(Ordering::SeqCst),
        started.elapsed()
    );

    handle.dispose();
    let after_dispose = ticks.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(ticks.load(Ordering::SeqCst), after_dispose);
    assert_eq!(once.load(Ordering::SeqCst), 1);

    fiber.stop();
    pool.shutdown().unwrap();
}

#[test]
fn test_stop_cancels_pending_timers() {
    let (fiber, pool) = parallel_fiber(1);
    fiber.start().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_clone = hits.clone();
    let handle = fiber.schedule(
        Action::new(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::from_millis(30),
    );
    fiber.stop();
    assert!(handle.is_cancelled());

    thread::sleep(Duration::from_millis(80));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    pool.shutdown().unwrap();
}

#[test]
fn test_unbounded_delays_do_not_disturb_other_timers() {
    let (fiber, pool) = parallel_fiber(1);
    fiber.start().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));

    let never = fiber.schedule(Action::new(|| {}), Duration::MAX);
    let hits_clone = hits.clone();
    let once_then_never = fiber.schedule_on_interval(
        Arc::new(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::ZERO,
        Duration::MAX,
    );
    assert!(wait_until(Duration::from_secs(2), || {
        hits.load(Ordering::SeqCst) == 1
    }));

    let later = Arc::new(AtomicUsize::new(0));
    let later_clone = later.clone();
    fiber.schedule(
        Action::new(move || {
            later_clone.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::from_millis(1),
    );
    assert!(wait_until(Duration::from_secs(2), || {
        later.load(Ordering::SeqCst) == 1
    }));
    assert!(!never.is_cancelled());
    assert!(!once_then_never.is_cancelled());

    fiber.stop();
    pool.shutdown().unwrap();
}

#[test]
fn test_schedule_before_start_on_thread_fiber() {
    let fiber = ThreadFiber::with(
        Arc::new(DefaultExecutor),
        Arc::new(TimerThread::new().unwrap()),
        ThreadFiberConfig::default(),
    );
    let hits = Arc::new(AtomicUsize::new(0));

    let hits_clone = hits.clone();
    fiber.schedule(
        Action::new(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }),
        Duration::from_millis(1),
    );
    fiber.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        hits.load(Ordering::SeqCst) == 1
    }));
    fiber.stop();
    fiber.join().unwrap();
}

#[test]
fn test_fibers_behind_trait_object() {
    let (parallel, pool) = parallel_fiber(2);
    let threaded = ThreadFiber::with(
        Arc::new(DefaultExecutor),
        Arc::new(TimerThread::new().unwrap()),
        ThreadFiberConfig::default(),
    );
    let fibers: Vec<Arc<dyn Fiber>> = vec![parallel, threaded.clone()];
    let hits = Arc::new(AtomicUsize::new(0));

    for fiber in &fibers {
        fiber.start().unwrap();
        let hits = hits.clone();
        fiber.enqueue(Action::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        }));
    }

    assert!(wait_until(Duration::from_secs(2), || {
        hits.load(Ordering::SeqCst) == 2
    }));
    for fiber in &fibers {
        fiber.dispose();
    }
    threaded.join().unwrap();
    pool.shutdown().unwrap();
}
