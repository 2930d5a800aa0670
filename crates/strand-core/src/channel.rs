//! Bounded MPMC channel
//!
//! A fixed-capacity ring buffer with blocking and non-blocking single-item
//! and batch operations. Group writes are all-or-nothing and land
//! contiguously; group reads return exactly the requested count.
//!
//! `close` wakes every blocked reader and writer and only returns once each
//! of them has observed the closed flag and bailed out, so the channel is
//! inert afterwards.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// How long `close` sleeps between checks for straggling subscribers
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Bounded MPMC channel
pub struct Channel<T> {
    /// Ring buffer of queued values
    buffer: Mutex<VecDeque<T>>,

    /// Maximum number of queued values
    capacity: usize,

    /// Signalled when values are added
    not_empty: Condvar,

    /// Signalled when capacity is freed
    not_full: Condvar,

    /// Once set, every subsequent operation fails
    closed: AtomicBool,

    /// Readers and writers currently inside an operation
    subscribers: AtomicUsize,
}

/// Decrements the subscriber count when an operation returns
struct SubscriberGuard<'a>(&'a AtomicUsize);

impl<'a> SubscriberGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        SubscriberGuard(count)
    }
}

impl Drop for SubscriberGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T> Channel<T> {
    /// Create a channel holding at most `capacity` values
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be positive");
        Channel {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            closed: AtomicBool::new(false),
            subscribers: AtomicUsize::new(0),
        }
    }

    /// Queue a single value; FIFO with respect to other single writes.
    ///
    /// Blocks while the channel is full unless `nonblock`. Returns false if
    /// the channel is (or becomes) closed, or if `nonblock` and full.
    pub fn write(&self, value: T, nonblock: bool) -> bool {
        self.write_n(vec![value], nonblock)
    }

    /// Queue a group of values as one contiguous block, all or nothing.
    ///
    /// Blocks until the whole group fits unless `nonblock`.
    pub fn write_n(&self, values: Vec<T>, nonblock: bool) -> bool {
        if values.is_empty() {
            return true;
        }
        if values.len() > self.capacity || self.closed.load(Ordering::Acquire) {
            return false;
        }

        let mut buf = self.buffer.lock().unwrap();
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let _sub = SubscriberGuard::enter(&self.subscribers);

        while buf.len() + values.len() > self.capacity {
            if nonblock {
                return false;
            }
            buf = self.not_full.wait(buf).unwrap();
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
        }

        buf.extend(values);
        self.not_empty.notify_all();
        true
    }

    /// Take the oldest value.
    ///
    /// Blocks while the channel is empty unless `nonblock`. Returns `None`
    /// if the channel is (or becomes) closed, or if `nonblock` and empty.
    pub fn read(&self, nonblock: bool) -> Option<T> {
        self.read_n(1, nonblock).and_then(|mut v| v.pop())
    }

    /// Take exactly `n` values in queue order.
    ///
    /// Blocks until `n` values are available unless `nonblock`.
    pub fn read_n(&self, n: usize, nonblock: bool) -> Option<Vec<T>> {
        if n == 0 {
            return Some(Vec::new());
        }
        if n > self.capacity || self.closed.load(Ordering::Acquire) {
            return None;
        }

        let mut buf = self.buffer.lock().unwrap();
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let _sub = SubscriberGuard::enter(&self.subscribers);

        while buf.len() < n {
            if nonblock {
                return None;
            }
            buf = self.not_empty.wait(buf).unwrap();
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
        }

        let out: Vec<T> = buf.drain(..n).collect();
        self.not_full.notify_all();
        Some(out)
    }

    /// Number of queued values
    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Whether the channel holds no values
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().unwrap().is_empty()
    }

    /// Maximum number of queued values
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `close` has been called
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the channel and wait for every blocked reader and writer to
    /// observe the closure and return.
    ///
    /// Idempotent. Queued values are dropped with the channel, not here.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Broadcast under the lock so no waiter can slip between its
        // predicate check and the wait.
        {
            let _buf = self.buffer.lock().unwrap();
            self.not_empty.notify_all();
            self.not_full.notify_all();
        }

        while self.subscribers.load(Ordering::SeqCst) != 0 {
            thread::sleep(CLOSE_POLL_INTERVAL);
        }
    }
}

impl<T> Drop for Channel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_write_read_fifo() {
        let ch = Channel::new(8);
        for i in 0..5 {
            assert!(ch.write(i, false));
        }
        for i in 0..5 {
            assert_eq!(ch.read(false), Some(i));
        }
    }

    #[test]
    fn test_batch_round_trip_order() {
        let ch = Channel::new(16);
        assert!(ch.write_n((0..10).collect(), false));
        assert_eq!(ch.read_n(10, false), Some((0..10).collect()));
    }

    #[test]
    fn test_nonblock_full_and_empty() {
        let ch = Channel::new(2);
        assert!(ch.write(1, true));
        assert!(ch.write(2, true));
        // Full: a third nonblocking write fails, the queue is untouched.
        assert!(!ch.write(3, true));
        assert_eq!(ch.len(), 2);

        assert_eq!(ch.read(true), Some(1));
        assert_eq!(ch.read(true), Some(2));
        assert_eq!(ch.read(true), None);
    }

    #[test]
    fn test_group_write_is_all_or_nothing() {
        let ch = Channel::new(4);
        assert!(ch.write_n(vec![1, 2, 3], false));
        // Only one slot free: the pair must not be split.
        assert!(!ch.write_n(vec![4, 5], true));
        assert_eq!(ch.len(), 3);
        // A group larger than the capacity can never fit.
        assert!(!ch.write_n(vec![0; 5], false));
    }

    #[test]
    fn test_blocking_handoff_across_threads() {
        let ch = Arc::new(Channel::new(4));
        let tx = Arc::clone(&ch);
        let producer = thread::spawn(move || {
            for i in 0..100 {
                assert!(tx.write(i, false));
            }
        });

        let mut got = Vec::new();
        for _ in 0..20 {
            got.extend(ch.read_n(5, false).unwrap());
        }
        producer.join().unwrap();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_close_wakes_blocked_writers() {
        let ch = Arc::new(Channel::new(10));
        assert!(ch.write_n((0..10).collect(), false));

        let failures = Arc::new(AtomicUsize::new(0));
        let mut writers = Vec::new();
        for _ in 0..4 {
            let ch = Arc::clone(&ch);
            let failures = Arc::clone(&failures);
            writers.push(thread::spawn(move || {
                if !ch.write_n(vec![0; 5], false) {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        // Give the writers time to block on the full channel.
        thread::sleep(Duration::from_millis(50));
        ch.close();
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(failures.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_ops_fail_after_close() {
        let ch = Channel::new(4);
        assert!(ch.write(1, false));
        ch.close();
        assert!(!ch.write(2, false));
        assert_eq!(ch.read(false), None);
        assert!(ch.is_closed());
        // close is idempotent
        ch.close();
    }

    #[test]
    fn test_many_writers_many_readers() {
        let ch = Arc::new(Channel::new(100));
        let mut handles = Vec::new();

        for _ in 0..10 {
            let ch = Arc::clone(&ch);
            handles.push(thread::spawn(move || {
                assert!(ch.write_n(vec![1u32; 10], false));
            }));
        }
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let ch = Arc::clone(&ch);
            let total = Arc::clone(&total);
            handles.push(thread::spawn(move || {
                let got = ch.read_n(5, false).unwrap();
                total.fetch_add(got.len(), Ordering::SeqCst);
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(total.load(Ordering::SeqCst), 100);
        assert!(ch.is_empty());
    }
}
