//! Counting semaphore
//!
//! Used for startup/shutdown handshakes (the reactor's connection-capture
//! gate, the instance pool's eviction-thread exit) and for counting task
//! completions in tests.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Counting semaphore
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    /// Create a semaphore with `initial` permits
    pub fn new(initial: usize) -> Self {
        Semaphore {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Block until a permit is available, then take it
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Take a permit if one is available within `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            let (guard, result) = self.cond.wait_timeout(count, timeout).unwrap();
            count = guard;
            if result.timed_out() && *count == 0 {
                return false;
            }
        }
        *count -= 1;
        true
    }

    /// Release one permit
    pub fn notify(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Semaphore::new(0)
    }
}
