//! Module `cache` implement the cache facade and the cleanup sweep.

use log::info;

use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering::SeqCst},
        Arc, Mutex,
    },
};

use crate::{
    chain::Chain,
    cmp::{CityHash, KeyCmp, ValueCmp},
    entry::Entry,
    segment::{Rebalances, Segment},
    stats::Stats,
    ticker::{Clock, SystemClock, Ticker, CLEANUP_TICK_THRESHOLD},
    Result,
};
use crate::err_at;

/// Upper bound of chain entries examined by one cleanup sweep. A single
/// write performs at most this many removals, plus one trailing removal.
pub const REMOVE_DEPTH: usize = 100;

/// Configuration type for [Cache].
///
/// TTLs are in ticks; one tick is one millisecond under the default
/// clock. Both TTLs can also be adjusted on a live cache.
#[derive(Clone)]
pub struct Config {
    pub name: String,
    /// Entries pre-allocated into the reservoir, default 1000.
    pub initial_capacity: usize,
    /// Expire entries this many ticks after their last read or write,
    /// default 200.
    pub access_ttl: u64,
    /// Expire entries this many ticks after their last write,
    /// default 600.
    pub create_ttl: u64,
    /// Allow concurrent readers, serializing structural mutation on a
    /// cache wide mutex. Default false, single owner, no
    /// synchronization.
    pub shared: bool,
    /// Ticks between two cleanup sweeps, default
    /// [CLEANUP_TICK_THRESHOLD].
    pub cleanup_tick_threshold: u64,
    /// Chain entries examined per sweep, default [REMOVE_DEPTH].
    pub remove_depth: usize,
}

impl Config {
    pub fn new(name: &str) -> Config {
        Config {
            name: name.to_string(),
            initial_capacity: 1000,
            access_ttl: 200,
            create_ttl: 600,
            shared: false,
            cleanup_tick_threshold: CLEANUP_TICK_THRESHOLD,
            remove_depth: REMOVE_DEPTH,
        }
    }

    pub fn set_initial_capacity(&mut self, capacity: usize) -> &mut Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn set_expire_after_access(&mut self, ticks: u64) -> &mut Self {
        self.access_ttl = ticks;
        self
    }

    pub fn set_expire_after_write(&mut self, ticks: u64) -> &mut Self {
        self.create_ttl = ticks;
        self
    }

    pub fn set_shared(&mut self, shared: bool) -> &mut Self {
        self.shared = shared;
        self
    }

    pub fn set_cleanup_tick_threshold(&mut self, ticks: u64) -> &mut Self {
        self.cleanup_tick_threshold = ticks;
        self
    }

    pub fn set_remove_depth(&mut self, depth: usize) -> &mut Self {
        self.remove_depth = depth;
        self
    }
}

/// Cache type, a self cleaning key,value lookup accelerator.
///
/// Entries expire on two clocks, expire-after-write and
/// expire-after-access; cleanup is amortized over write operations.
/// In shared mode the lookup path is lock-free while structural
/// mutations serialize on a cache wide mutex. A cache configured as
/// single-owner must be confined to one thread.
pub struct Cache<K, V, H = CityHash> {
    name: String,
    shared: bool,
    key_cmp: KeyCmp<H>,
    value_cmp: ValueCmp,
    access_ttl: AtomicU64,
    create_ttl: AtomicU64,
    remove_depth: usize,

    clock: Arc<dyn Clock + Send + Sync>,
    ticker: Ticker,
    root: Segment<K, V>,
    chain: Chain<K, V>,
    tomb: *mut Entry<K, V>,
    mu: Mutex<u32>,

    rebalances: Rebalances,
    n_gets: AtomicUsize,
    n_sets: AtomicUsize,
    n_removes: AtomicUsize,
    n_evicted: AtomicUsize,
}

unsafe impl<K: Send, V: Send, H: Send> Send for Cache<K, V, H> {}
unsafe impl<K: Send + Sync, V: Send + Sync, H: Sync> Sync for Cache<K, V, H> {}

impl<K, V, H> Drop for Cache<K, V, H> {
    fn drop(&mut self) {
        // chain reclaims its entries; the tombstone sentinel is ours.
        let _tomb = unsafe { Box::from_raw(self.tomb) };
    }
}

impl<K, V> Cache<K, V, CityHash> {
    pub fn from_config(config: Config) -> Cache<K, V, CityHash> {
        Cache::with_hash(CityHash::new(), config)
    }
}

impl<K, V, H> Cache<K, V, H> {
    pub fn with_hash(hash_builder: H, config: Config) -> Cache<K, V, H> {
        Cache {
            name: config.name.clone(),
            shared: config.shared,
            key_cmp: KeyCmp::with_hash(hash_builder),
            value_cmp: ValueCmp::default(),
            access_ttl: AtomicU64::new(config.access_ttl),
            create_ttl: AtomicU64::new(config.create_ttl),
            remove_depth: config.remove_depth,

            clock: Arc::new(SystemClock),
            ticker: Ticker::new(config.cleanup_tick_threshold),
            root: Segment::root(),
            chain: Chain::new(config.initial_capacity),
            tomb: Box::leak(Entry::new_blank()) as *mut Entry<K, V>,
            mu: Mutex::new(0),

            rebalances: Rebalances::default(),
            n_gets: AtomicUsize::new(0),
            n_sets: AtomicUsize::new(0),
            n_removes: AtomicUsize::new(0),
            n_evicted: AtomicUsize::new(0),
        }
    }

    /// Swap the wall-clock source, useful for tests and simulated time.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock + Send + Sync>) -> &mut Self {
        self.clock = clock;
        self
    }

    /// Replace the key comparator. Must be done before any entry goes
    /// in, comparators are required to be stable for the lifetime of a
    /// key.
    pub fn set_key_cmp(&mut self, key_cmp: KeyCmp<H>) -> &mut Self {
        self.key_cmp = key_cmp;
        self
    }

    /// Replace the value comparator. The lookup path does not consult
    /// it.
    pub fn set_value_cmp(&mut self, value_cmp: ValueCmp) -> &mut Self {
        self.value_cmp = value_cmp;
        self
    }

    /// Return the value comparator held for entry level equality.
    pub fn as_value_cmp(&self) -> &ValueCmp {
        &self.value_cmp
    }

    /// Adjust the expire-after-access TTL, in ticks.
    pub fn set_expire_after_access(&self, ticks: u64) {
        self.access_ttl.store(ticks, SeqCst)
    }

    /// Adjust the expire-after-write TTL, in ticks.
    pub fn set_expire_after_write(&self, ticks: u64) {
        self.create_ttl.store(ticks, SeqCst)
    }

    /// Return name of this cache instance.
    #[inline]
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    /// Return whether this cache admits concurrent readers.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Return number of live entries.
    pub fn len(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, H> Cache<K, V, H>
where
    H: BuildHasher,
{
    /// Return the value mapped to `key` and stamp the entry's access
    /// time with the cached tick. No cleanup, no clock read.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + PartialEq + ?Sized,
        V: Clone,
    {
        self.n_gets.fetch_add(1, SeqCst);
        let key_hash = self.key_cmp.hash_of(key);
        let ptr = self.root.locate(key, key_hash, self.tomb, &self.key_cmp)?;
        let entry = unsafe { &*ptr };
        entry.set_access_time(self.ticker.to_next_tick());
        entry.to_value()
    }

    /// Return whether `key` is mapped, without touching its access time.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + PartialEq + ?Sized,
    {
        let key_hash = self.key_cmp.hash_of(key);
        self.root.locate(key, key_hash, self.tomb, &self.key_cmp).is_some()
    }

    /// Map `key` to `value`, overwriting any older mapping. Refreshes
    /// the ticker from the clock, stamps the entry and runs the cleanup
    /// sweep. Returns the older value if any.
    pub fn set(&self, key: K, value: V) -> Result<Option<V>>
    where
        K: Hash + PartialEq,
        V: Clone,
    {
        self.n_sets.fetch_add(1, SeqCst);
        let key_hash = self.key_cmp.hash_of(&key);

        let (ptr, old_value) =
            match self.root.locate(&key, key_hash, self.tomb, &self.key_cmp) {
                // value overwrite is not structural, skip the mutex.
                Some(ptr) => {
                    let old = unsafe { &*ptr }.replace_value(value);
                    (ptr, old)
                }
                None => {
                    let _w = if self.shared { Some(self.mu.lock()) } else { None };
                    self.root.set(
                        key,
                        value,
                        key_hash,
                        &self.chain,
                        self.tomb,
                        &self.key_cmp,
                        self.shared,
                        &self.rebalances,
                    )?
                }
            };

        let tick = self.clock.now();
        self.ticker.set_next_tick(tick);
        let entry = unsafe { &*ptr };
        entry.set_create_time(tick);
        entry.set_access_time(tick);

        self.cleanup()?;
        Ok(old_value)
    }

    /// Map every pair of `iter`, in iteration order.
    pub fn set_all<I>(&self, iter: I) -> Result<()>
    where
        K: Hash + PartialEq,
        V: Clone,
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in iter {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Unmap `key`, returning the older value if any.
    pub fn remove<Q>(&self, key: &Q) -> Result<Option<V>>
    where
        K: Borrow<Q>,
        Q: Hash + PartialEq + ?Sized,
        V: Clone,
    {
        self.n_removes.fetch_add(1, SeqCst);
        let key_hash = self.key_cmp.hash_of(key);
        if self.root.locate(key, key_hash, self.tomb, &self.key_cmp).is_none() {
            return Ok(None);
        }

        let _w = if self.shared { Some(self.mu.lock()) } else { None };
        let ptr = match self.root.locate(key, key_hash, self.tomb, &self.key_cmp) {
            Some(ptr) => ptr,
            None => return Ok(None),
        };
        self.chain.unlink(ptr);
        self.root.remove_ptr(ptr, key_hash, self.tomb)?;

        let entry = unsafe { &*ptr };
        let old_value = if self.shared {
            // readers may still traverse the entry, leave it intact.
            let value = entry.to_value();
            self.chain.bury(ptr);
            value
        } else {
            let value = entry.take_value();
            self.chain.recycle(ptr);
            value
        };
        Ok(old_value)
    }

    /// Walk a bounded prefix of the insertion order chain and retire
    /// entries that fell out of either TTL window. Runs within
    /// [set][Cache::set], gated by the ticker; applications normally
    /// never call it.
    /// Returns the number of entries retired.
    pub fn cleanup(&self) -> Result<usize> {
        if self.ticker.skip_cleanup() {
            return Ok(0);
        }
        let next_tick = self.ticker.to_next_tick();
        // a TTL larger than the current tick cannot expire anything yet.
        let create_threshold = next_tick.checked_sub(self.create_ttl.load(SeqCst));
        let access_threshold = next_tick.checked_sub(self.access_ttl.load(SeqCst));

        let _w = if self.shared { Some(self.mu.lock()) } else { None };

        let mut n_removed = 0;
        // one removal stays buffered so the entry under the cursor is
        // never the one being removed.
        let mut pending: Option<*mut Entry<K, V>> = None;
        let mut cursor = self.chain.first_live();
        let mut n_seen = 0;
        while !self.chain.is_end(cursor) && n_seen < self.remove_depth {
            let ptr = cursor;
            let entry = unsafe { &*ptr };
            let expired = create_threshold
                .map_or(false, |threshold| entry.to_create_time() <= threshold)
                || access_threshold
                    .map_or(false, |threshold| entry.to_access_time() <= threshold);
            cursor = entry.as_next();
            n_seen += 1;
            if expired {
                if let Some(prev) = pending.take() {
                    self.evict(prev)?;
                    n_removed += 1;
                }
                pending = Some(ptr);
            }
        }
        if let Some(prev) = pending.take() {
            self.evict(prev)?;
            n_removed += 1;
        }

        self.ticker.mark_cleanup();
        self.n_evicted.fetch_add(n_removed, SeqCst);
        Ok(n_removed)
    }

    // Retire one live entry, write exclusivity already held.
    fn evict(&self, ptr: *mut Entry<K, V>) -> Result<()> {
        let key_hash = unsafe { &*ptr }.to_key_hash();
        self.chain.unlink(ptr);
        self.root.remove_ptr(ptr, key_hash, self.tomb)?;
        if self.shared {
            self.chain.bury(ptr);
        } else {
            self.chain.recycle(ptr);
        }
        Ok(())
    }

    /// Drop every mapping. Single-owner caches reuse both entries and
    /// tables in place; shared caches swap in a fresh chain and root so
    /// in-flight readers stay on the old, intact structure.
    pub fn clear(&self) -> Result<()> {
        if self.shared {
            let _w = self.mu.lock();
            self.chain.reset_abandon();
            self.root.reset();
        } else {
            self.chain.reset_keep();
            self.root.clear_in_place();
        }
        info!(target: "scache", "{:?}, cleared", self.name);
        Ok(())
    }

    /// Iterate live entries in insertion order. In shared mode the
    /// iterator tolerates concurrent mutation, it may observe a slightly
    /// stale chain.
    pub fn iter(&self) -> Iter<K, V, H> {
        Iter {
            cache: self,
            cursor: self.chain.first_live(),
        }
    }

    /// Validate cache invariants, probe reachability, load factors,
    /// counter agreement between table and chain, and chain link
    /// symmetry.
    pub fn validate(&self) -> Result<()> {
        let _w = if self.shared { Some(self.mu.lock()) } else { None };
        let n_table = self.root.validate(0, self.tomb)?;
        let n_chain = self.chain.live_count();
        if n_table != n_chain {
            return err_at!(Fatal, msg: "table holds {} entries, chain {}", n_table, n_chain);
        }
        self.chain.validate()
    }

    /// Gather statistics. Probe distances are measured over every live
    /// slot, so this walks the whole structure.
    pub fn to_stats(&self) -> Result<Stats> {
        let mut stats = Stats::new(&self.name, self.shared);
        self.root.gather(0, self.tomb, &mut stats);
        stats.n_allocated = self.chain.to_allocated();
        stats.n_gets = self.n_gets.load(SeqCst);
        stats.n_sets = self.n_sets.load(SeqCst);
        stats.n_removes = self.n_removes.load(SeqCst);
        stats.n_evicted = self.n_evicted.load(SeqCst);
        stats.n_grows = self.rebalances.n_grows.load(SeqCst);
        stats.n_compactions = self.rebalances.n_compactions.load(SeqCst);
        stats.n_splits = self.rebalances.n_splits.load(SeqCst);
        stats.n_degraded = self.rebalances.n_degraded.load(SeqCst);
        Ok(stats)
    }
}

/// Insertion order iterator over `(key, value)` clones, returned by
/// [Cache::iter].
pub struct Iter<'a, K, V, H> {
    cache: &'a Cache<K, V, H>,
    cursor: *mut Entry<K, V>,
}

impl<'a, K, V, H> Iterator for Iter<'a, K, V, H>
where
    K: Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            if self.cache.chain.is_end(self.cursor) {
                return None;
            }
            let entry = unsafe { &*self.cursor };
            self.cursor = entry.as_next();
            match (entry.as_key(), entry.to_value()) {
                (Some(key), Some(value)) => return Some((key.clone(), value)),
                // entry got recycled under the iterator, skip.
                _ => (),
            }
        }
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
