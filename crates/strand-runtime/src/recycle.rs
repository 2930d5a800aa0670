//! Sharded instance recycler
//!
//! A pool of reusable objects split into shards ("levels") addressed by a
//! round-robin counter. Each shard has a private slot behind a spinlock,
//! contended only by a get and a put landing on the same shard, and a
//! shared FIFO behind a mutex that any shard may raid.
//!
//! Reclamation is generational: a background thread periodically replaces
//! the live generation with a fresh one and demotes the old generation to
//! victim status. Instances still parked in the victim when the next
//! rotation comes around are dropped with it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwap;
use log::debug;
use strand_core::sem::Semaphore;
use strand_core::spinlock::SpinLock;

/// An object that can be parked in an [`InstancePool`]
pub trait Poolable: Send + 'static {
    /// Return the instance to a blank state before reuse
    fn reset(&mut self);
}

/// One shard of a generation
struct Shard<T> {
    single: SpinLock<Option<T>>,
    shared: Mutex<VecDeque<T>>,
}

impl<T> Shard<T> {
    fn new() -> Self {
        Shard {
            single: SpinLock::new(None),
            shared: Mutex::new(VecDeque::new()),
        }
    }
}

type Generation<T> = Arc<Vec<Arc<Shard<T>>>>;

fn fresh_generation<T>(levels: usize) -> Generation<T> {
    Arc::new((0..levels).map(|_| Arc::new(Shard::new())).collect())
}

/// State shared with the eviction thread
struct PoolShared<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
    local: ArcSwap<Vec<Arc<Shard<T>>>>,
    victim: ArcSwap<Vec<Arc<Shard<T>>>>,
    level: AtomicUsize,
    levels: usize,
    closed: AtomicBool,
    evict_done: Semaphore,
    interval: Duration,
}

impl<T: Poolable> PoolShared<T> {
    /// Take an instance from one generation, preferring the addressed
    /// shard's private slot, then its FIFO, then any sibling FIFO.
    fn take(shards: &[Arc<Shard<T>>], level: usize) -> Option<T> {
        if shards.is_empty() {
            return None;
        }
        if let Some(got) = Self::take_from_shard(&shards[level], false) {
            return Some(got);
        }
        for (i, shard) in shards.iter().enumerate() {
            if i == level {
                continue;
            }
            if let Some(got) = Self::take_from_shard(shard, true) {
                return Some(got);
            }
        }
        None
    }

    fn take_from_shard(shard: &Shard<T>, skip_single: bool) -> Option<T> {
        if !skip_single {
            if let Some(got) = shard.single.lock().take() {
                return Some(got);
            }
        }
        shard.shared.lock().unwrap().pop_front()
    }

    /// Generation rotation loop; runs until the pool closes
    fn evict_loop(&self) {
        while !self.closed.load(Ordering::Acquire) {
            thread::sleep(self.interval);
            self.victim.store(self.local.load_full());
            self.local.store(fresh_generation(self.levels));
        }
        debug!("instance pool eviction thread exiting");
        self.evict_done.notify();
    }
}

/// Sharded recycler for expensive-to-build objects
pub struct InstancePool<T: Poolable> {
    shared: Arc<PoolShared<T>>,
}

impl<T: Poolable> InstancePool<T> {
    /// Default number of shards
    pub const DEFAULT_LEVELS: usize = 8;

    /// Default idle expiry
    pub const DEFAULT_EXPIRY: Duration = Duration::from_millis(500);

    /// Create a pool with default sharding and expiry
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_options(factory, Self::DEFAULT_LEVELS, Self::DEFAULT_EXPIRY)
    }

    /// Create a pool with `levels` shards whose idle instances live at
    /// most ~`expiry` before being dropped.
    pub fn with_options<F>(factory: F, levels: usize, expiry: Duration) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        assert!(levels > 0, "instance pool needs at least one level");
        assert!(!expiry.is_zero(), "instance pool expiry must be positive");

        let shared = Arc::new(PoolShared {
            factory: Box::new(factory),
            local: ArcSwap::new(fresh_generation(levels)),
            victim: ArcSwap::new(Arc::new(Vec::new())),
            level: AtomicUsize::new(0),
            levels,
            closed: AtomicBool::new(false),
            evict_done: Semaphore::new(0),
            interval: Duration::from_millis((expiry.as_millis() as u64 / 2).max(1)),
        });

        let evictor = Arc::clone(&shared);
        thread::Builder::new()
            .name("strand-evict".into())
            .spawn(move || evictor.evict_loop())
            .expect("failed to spawn eviction thread");

        InstancePool { shared }
    }

    /// Fetch an instance, building a new one only when both generations
    /// come up empty.
    pub fn get(&self) -> T {
        let shared = &self.shared;
        let level = shared.level.fetch_add(1, Ordering::Relaxed) % shared.levels;
        PoolShared::take(&shared.local.load(), level)
            .or_else(|| PoolShared::take(&shared.victim.load(), level))
            .unwrap_or_else(|| (shared.factory)())
    }

    /// Return an instance for reuse; it is reset before parking.
    pub fn put(&self, mut instance: T) {
        instance.reset();
        let shared = &self.shared;
        let level = shared.level.fetch_add(1, Ordering::Relaxed) % shared.levels;
        let generation = shared.local.load();
        let shard = &generation[level];
        {
            let mut single = shard.single.lock();
            if single.is_none() {
                *single = Some(instance);
                return;
            }
        }
        shard.shared.lock().unwrap().push_back(instance);
    }
}

impl<T: Poolable> Drop for InstancePool<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        // The eviction thread posts on its way out; parked instances die
        // with the generations.
        self.shared.evict_done.wait();
    }
}
