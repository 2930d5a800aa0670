//! Read-optimized concurrent key/value map
//!
//! The map keeps two views of its entries:
//!
//! * a **readonly** snapshot behind an atomic pointer, consulted without
//!   locking; values are updated in place through per-entry CAS
//! * a **dirty** map behind a mutex, holding every live entry plus any keys
//!   inserted since the last promotion
//!
//! A snapshot miss that has to fall through to the dirty map bumps a miss
//! counter; once misses reach the dirty size, the dirty map is promoted
//! wholesale into a fresh snapshot. Suited to workloads where reads and
//! in-place updates dominate insertions of new keys.
//!
//! Deletion is two-phase. `evict` marks an entry's slot as a tombstone; the
//! entry stays in both views and a later `store` revives it in place. When
//! the dirty map is rebuilt from the snapshot, tombstoned entries are
//! flipped to **expunged** and left out of the dirty map; an expunged entry
//! can only be revived under the dirty lock, which reinserts it.

use std::collections::HashMap;
use std::hash::Hash;
use std::mem;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use log::trace;

/// Contents of an entry's atomic slot
enum Slot<V> {
    /// A present value
    Live(V),

    /// Soft-deleted: reads miss, the dirty map still references the entry
    Tombstone,

    /// Hard-deleted: the entry is absent from the dirty map; reviving it
    /// requires the dirty lock
    Expunged,
}

/// One entry, shared between the readonly snapshot and the dirty map
struct Entry<V> {
    slot: ArcSwap<Slot<V>>,
}

impl<V: Clone> Entry<V> {
    fn new(value: V) -> Self {
        Entry {
            slot: ArcSwap::from_pointee(Slot::Live(value)),
        }
    }

    fn load(&self) -> Option<V> {
        match &**self.slot.load() {
            Slot::Live(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Install a value unless the entry is expunged. Lock-free update path.
    fn try_store(&self, value: &V) -> bool {
        let new = Arc::new(Slot::Live(value.clone()));
        loop {
            let cur = self.slot.load_full();
            if matches!(*cur, Slot::Expunged) {
                return false;
            }
            let prev = self.slot.compare_and_swap(&cur, Arc::clone(&new));
            if Arc::ptr_eq(&cur, &prev) {
                return true;
            }
        }
    }

    /// Install a value. Caller holds the dirty lock, so the slot cannot be
    /// expunged underneath us.
    fn store_locked(&self, value: V) {
        self.slot.store(Arc::new(Slot::Live(value)));
    }

    /// Soft-delete the value, if any
    fn evict(&self) {
        loop {
            let cur = self.slot.load_full();
            if !matches!(*cur, Slot::Live(_)) {
                return;
            }
            let prev = self.slot.compare_and_swap(&cur, Arc::new(Slot::Tombstone));
            if Arc::ptr_eq(&cur, &prev) {
                return;
            }
        }
    }

    /// Revert an expunged slot to a tombstone. Returns true when the entry
    /// was expunged and therefore needs reinserting into the dirty map.
    /// Caller holds the dirty lock.
    fn unexpunge_locked(&self) -> bool {
        if matches!(**self.slot.load(), Slot::Expunged) {
            self.slot.store(Arc::new(Slot::Tombstone));
            true
        } else {
            false
        }
    }

    /// Flip a tombstone to expunged, racing only against lock-free stores.
    /// Returns true when the entry ends up (or already was) expunged.
    /// Caller holds the dirty lock.
    fn try_expunge_locked(&self) -> bool {
        let mut cur = self.slot.load_full();
        while matches!(*cur, Slot::Tombstone) {
            let prev = self.slot.compare_and_swap(&cur, Arc::new(Slot::Expunged));
            if Arc::ptr_eq(&cur, &prev) {
                return true;
            }
            cur = self.slot.load_full();
        }
        matches!(*cur, Slot::Expunged)
    }
}

type EntryMap<K, V> = HashMap<K, Arc<Entry<V>>>;

/// Immutable snapshot view
struct ReadOnly<K, V> {
    m: Arc<EntryMap<K, V>>,

    /// True when the dirty map holds keys this snapshot does not; a miss
    /// must then fall through to the dirty map.
    amended: bool,
}

/// Mutable view, guarded by the map's mutex
struct Dirty<K, V> {
    m: EntryMap<K, V>,
    misses: usize,
}

/// Concurrent map with a lock-free read path and a mutex-guarded dirty map
pub struct SplitMap<K, V> {
    readonly: ArcSwap<ReadOnly<K, V>>,
    dirty: Mutex<Dirty<K, V>>,
}

impl<K, V> SplitMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty map
    pub fn new() -> Self {
        SplitMap {
            readonly: ArcSwap::from_pointee(ReadOnly {
                m: Arc::new(EntryMap::new()),
                amended: false,
            }),
            dirty: Mutex::new(Dirty {
                m: EntryMap::new(),
                misses: 0,
            }),
        }
    }

    /// Look up `key`, cloning the value out
    pub fn load(&self, key: &K) -> Option<V> {
        let ro = self.readonly.load();
        if let Some(e) = ro.m.get(key) {
            return e.load();
        }
        if !ro.amended {
            return None;
        }
        drop(ro);

        let mut dirty = self.dirty.lock().unwrap();
        // The snapshot may have been promoted while we waited for the lock.
        let ro = self.readonly.load_full();
        if let Some(e) = ro.m.get(key) {
            return e.load();
        }
        if !ro.amended {
            return None;
        }

        let entry = dirty.m.get(key).cloned();
        self.miss_locked(&mut dirty);
        entry.and_then(|e| e.load())
    }

    /// Insert or replace the value for `key`
    pub fn store(&self, key: K, value: V) {
        let ro = self.readonly.load();
        if let Some(e) = ro.m.get(&key) {
            if e.try_store(&value) {
                return;
            }
        }
        drop(ro);

        let mut dirty = self.dirty.lock().unwrap();
        let ro = self.readonly.load_full();
        if let Some(e) = ro.m.get(&key) {
            if e.unexpunge_locked() {
                // The entry was hard-deleted; the dirty map lost it.
                dirty.m.insert(key, Arc::clone(e));
            }
            e.store_locked(value);
            return;
        }
        if let Some(e) = dirty.m.get(&key) {
            e.store_locked(value);
            return;
        }

        // A brand-new key goes into the dirty map. Flag the snapshot as
        // incomplete, seeding the dirty map from it first if necessary.
        if !ro.amended {
            self.readonly.store(Arc::new(ReadOnly {
                m: Arc::clone(&ro.m),
                amended: true,
            }));
            self.seed_dirty_locked(&mut dirty, &ro.m);
        }
        dirty.m.insert(key, Arc::new(Entry::new(value)));
    }

    /// Delete the value for `key`, if present
    pub fn evict(&self, key: &K) {
        let ro = self.readonly.load();
        if let Some(e) = ro.m.get(key) {
            e.evict();
            return;
        }
        if !ro.amended {
            return;
        }
        drop(ro);

        let mut dirty = self.dirty.lock().unwrap();
        let ro = self.readonly.load_full();
        if let Some(e) = ro.m.get(key) {
            e.evict();
            return;
        }
        if !ro.amended {
            return;
        }

        dirty.m.remove(key);
        self.miss_locked(&mut dirty);
    }

    /// Visit every live entry; stop early when `f` returns false.
    ///
    /// If the snapshot is incomplete the dirty map is promoted first, so
    /// the walk sees every key live at that point. Writers landing after
    /// the promotion are not observed by this call.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, V) -> bool,
    {
        let mut ro = self.readonly.load_full();
        if ro.amended {
            let mut dirty = self.dirty.lock().unwrap();
            ro = self.readonly.load_full();
            if ro.amended {
                self.promote_locked(&mut dirty);
                ro = self.readonly.load_full();
            }
        }

        for (k, e) in ro.m.iter() {
            if let Some(v) = e.load() {
                if !f(k, v) {
                    break;
                }
            }
        }
    }

    /// Record a snapshot miss; promote once misses catch up with the dirty
    /// size. Caller holds the dirty lock.
    fn miss_locked(&self, dirty: &mut Dirty<K, V>) {
        dirty.misses += 1;
        if dirty.misses < dirty.m.len() {
            return;
        }
        self.promote_locked(dirty);
    }

    /// Move the dirty map wholesale into a fresh complete snapshot.
    /// Caller holds the dirty lock.
    fn promote_locked(&self, dirty: &mut Dirty<K, V>) {
        let promoted = mem::take(&mut dirty.m);
        trace!("promoting {} dirty entries to the read snapshot", promoted.len());
        self.readonly.store(Arc::new(ReadOnly {
            m: Arc::new(promoted),
            amended: false,
        }));
        dirty.misses = 0;
    }

    /// Rebuild an empty dirty map from the snapshot: tombstones become
    /// expunged and are skipped, live entries are shared into the dirty
    /// map. Caller holds the dirty lock.
    fn seed_dirty_locked(&self, dirty: &mut Dirty<K, V>, snapshot: &EntryMap<K, V>) {
        if !dirty.m.is_empty() {
            return;
        }
        dirty.m.reserve(snapshot.len());
        for (k, e) in snapshot.iter() {
            if e.try_expunge_locked() {
                continue;
            }
            dirty.m.insert(k.clone(), Arc::clone(e));
        }
    }
}

impl<K, V> Default for SplitMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        SplitMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_store_load_round_trip() {
        let map = SplitMap::new();
        map.store("a", 1);
        assert_eq!(map.load(&"a"), Some(1));
        assert_eq!(map.load(&"missing"), None);
    }

    #[test]
    fn test_store_overwrites() {
        let map = SplitMap::new();
        map.store(1, "one");
        map.store(1, "uno");
        assert_eq!(map.load(&1), Some("uno"));
    }

    #[test]
    fn test_evict_hides_value() {
        let map = SplitMap::new();
        map.store(7, 7);
        map.evict(&7);
        assert_eq!(map.load(&7), None);
        // Evicting an absent key is a no-op.
        map.evict(&8);
        assert_eq!(map.load(&8), None);
    }

    #[test]
    fn test_store_after_evict_revives() {
        let map = SplitMap::new();
        map.store(1, 10);
        map.evict(&1);
        map.store(1, 11);
        assert_eq!(map.load(&1), Some(11));
    }

    #[test]
    fn test_misses_trigger_promotion() {
        let map = SplitMap::new();
        map.store(1, 1);
        // Force a promotion so key 1 lives in the snapshot, then amend it.
        map.range(|_, _| true);
        map.store(2, 2);

        // Each load of key 2 misses the snapshot; eventually the dirty map
        // is promoted and the misses stop.
        for _ in 0..8 {
            assert_eq!(map.load(&2), Some(2));
        }
        let mut seen = Vec::new();
        map.range(|k, v| {
            seen.push((*k, v));
            true
        });
        seen.sort();
        assert_eq!(seen, vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn test_expunged_key_revived_through_lock() {
        let map = SplitMap::new();
        map.store("k", 1);
        map.range(|_, _| true); // promote: "k" is snapshot-resident
        map.evict(&"k"); // tombstone in the snapshot
        map.store("fresh", 2); // seeds dirty, expunging "k"
        map.store("k", 3); // must reinsert "k" into dirty
        assert_eq!(map.load(&"k"), Some(3));

        let mut keys: Vec<&'static str> = Vec::new();
        map.range(|k, _| {
            keys.push(k);
            true
        });
        keys.sort();
        assert_eq!(keys, vec!["fresh", "k"]);
    }

    #[test]
    fn test_range_early_stop() {
        let map = SplitMap::new();
        for i in 0..10 {
            map.store(i, i);
        }
        let visited = AtomicUsize::new(0);
        map.range(|_, _| {
            visited.fetch_add(1, Ordering::Relaxed);
            false
        });
        assert_eq!(visited.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_range_skips_evicted() {
        let map = SplitMap::new();
        for i in 0..6 {
            map.store(i, i * 10);
        }
        map.evict(&0);
        map.evict(&3);
        let mut seen = Vec::new();
        map.range(|k, v| {
            seen.push((*k, v));
            true
        });
        seen.sort();
        assert_eq!(seen, vec![(1, 10), (2, 20), (4, 40), (5, 50)]);
    }

    #[test]
    fn test_concurrent_store_load_evict() {
        #[derive(Clone)]
        struct Demo {
            index: usize,
        }

        let map = Arc::new(SplitMap::new());
        let mut handles = Vec::new();

        for t in 0..4 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let key = (t * 500 + i) % 100;
                    map.store(key, Demo { index: key });
                }
            }));
        }
        for t in 0..4 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let key = (t * 500 + i) % 100;
                    if let Some(v) = map.load(&key) {
                        assert_eq!(v.index, key);
                    }
                }
            }));
        }
        for t in 0..2 {
            let map = Arc::clone(&map);
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    let key = (t * 250 + i) % 100;
                    map.evict(&key);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let mut distinct = 0;
        map.range(|k, v| {
            assert_eq!(v.index, *k);
            distinct += 1;
            true
        });
        assert!(distinct <= 100);
    }
}
