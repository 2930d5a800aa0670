//! Worker pool stress driver
//!
//! Submits a burst of counting tasks, half of which yield mid-execution,
//! and waits for every completion.
//!
//! Usage:
//!     stress [tasks] [workers]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use strand::{sched, Semaphore, WorkerPool};

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let tasks: usize = args
        .next()
        .map(|t| t.parse().expect("tasks must be a number"))
        .unwrap_or(10_000);
    let workers: usize = args
        .next()
        .map(|w| w.parse().expect("workers must be a number"))
        .unwrap_or(8);

    let pool = WorkerPool::new(workers);
    let counter = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(Semaphore::new(0));

    let start = Instant::now();
    for i in 0..tasks {
        let counter = Arc::clone(&counter);
        let done = Arc::clone(&done);
        let accepted = pool.submit(
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
                if i % 2 == 0 {
                    sched();
                }
                done.notify();
            },
            false,
        );
        assert!(accepted, "pool rejected task {}", i);
    }
    for _ in 0..tasks {
        done.wait();
    }
    let elapsed = start.elapsed();

    let counted = counter.load(Ordering::Relaxed);
    println!(
        "{} tasks on {} workers in {:?} ({:.0} tasks/s)",
        counted,
        workers,
        elapsed,
        counted as f64 / elapsed.as_secs_f64()
    );
    assert_eq!(counted, tasks);
}
