//! Module `segment` implement the segmented, open addressed hash table.
//!
//! A segment is either a _leaf_, holding a power-of-two table of entry
//! pointers, or an _inner_ node routing to a fixed fan-out of child
//! segments by hash bits. Leaves double in size as they fill up; at the
//! ceiling they partition into [FANOUT] children, each child consuming
//! [FANOUT_BITS] more hash bits than its parent. `key_shift` records
//! how many low hash bits the ancestors have already consumed.
//!
//! Readers snapshot a segment's body once per level and probe that
//! snapshot; writers publish a new table or child list only after it is
//! fully populated, by swapping the latched body. A reader therefore
//! sees either the old complete structure or the new complete one.

use log::{debug, warn};

use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash},
    sync::{
        atomic::{AtomicPtr, AtomicUsize, Ordering::SeqCst},
        Arc,
    },
};

use crate::{chain::Chain, cmp::KeyCmp, entry::Entry, latch::Latch, stats::Stats, Result};
use crate::err_at;

/// Slot count of a fresh leaf table.
pub const INITIAL_SLOTS: usize = 16; // 4 hash bits
/// A leaf doubles up to this many slots before it splits.
pub const RESIZE_CEILING: usize = 1024; // 10 hash bits
/// Hash bits consumed by one level of routing.
pub const FANOUT_BITS: u32 = 6;
/// Child segments created by a split.
pub const FANOUT: usize = 1 << FANOUT_BITS;

// Rebalance accounting, lives on the cache, bumped down here.
#[derive(Default)]
pub(crate) struct Rebalances {
    pub n_grows: AtomicUsize,
    pub n_compactions: AtomicUsize,
    pub n_splits: AtomicUsize,
    pub n_degraded: AtomicUsize,
}

// Leaf table. EMPTY slots are null, vacated slots hold the cache's
// tombstone sentinel. Tombstones keep a probe going but never count as
// live. Invariant: n_entries + n_tombs <= slots.len() / 2 after any
// completed structural mutation.
pub(crate) struct Table<K, V> {
    slots: Vec<AtomicPtr<Entry<K, V>>>,
    n_entries: AtomicUsize,
    n_tombs: AtomicUsize,
}

impl<K, V> Table<K, V> {
    fn new(len: usize) -> Table<K, V> {
        debug_assert!(len.is_power_of_two());
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || AtomicPtr::new(std::ptr::null_mut()));
        Table {
            slots,
            n_entries: AtomicUsize::new(0),
            n_tombs: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    #[inline]
    pub fn to_entries(&self) -> usize {
        self.n_entries.load(SeqCst)
    }

    #[inline]
    pub fn to_tombs(&self) -> usize {
        self.n_tombs.load(SeqCst)
    }

    #[inline]
    fn load(&self) -> usize {
        self.to_entries() + self.to_tombs()
    }

    // Live entry pointers, in slot order.
    fn live(&self, tomb: *mut Entry<K, V>) -> Vec<*mut Entry<K, V>> {
        let mut live = Vec::with_capacity(self.to_entries());
        for slot in self.slots.iter() {
            let ptr = slot.load(SeqCst);
            if !ptr.is_null() && ptr != tomb {
                live.push(ptr)
            }
        }
        live
    }

    fn clear_slots(&self) {
        for slot in self.slots.iter() {
            slot.store(std::ptr::null_mut(), SeqCst);
        }
        self.n_entries.store(0, SeqCst);
        self.n_tombs.store(0, SeqCst);
    }

    // Insert into a table known to be free of the entry and of
    // tombstones, first empty slot from the ideal one wins.
    fn probe_insert(&self, key_shift: u32, ptr: *mut Entry<K, V>) -> Result<()> {
        let mask = self.mask();
        let start = unsafe { &*ptr }.to_key_hash().wrapping_shr(key_shift) as usize;
        for i in 0..self.len() {
            let idx = start.wrapping_add(i) & mask;
            if self.slots[idx].load(SeqCst).is_null() {
                self.slots[idx].store(ptr, SeqCst);
                self.n_entries.fetch_add(1, SeqCst);
                return Ok(());
            }
        }
        err_at!(Fatal, msg: "rebuilt table ran out of slots")
    }
}

pub(crate) enum Body<K, V> {
    Leaf(Arc<Table<K, V>>),
    Inner(Arc<Vec<Segment<K, V>>>),
}

impl<K, V> Clone for Body<K, V> {
    fn clone(&self) -> Body<K, V> {
        match self {
            Body::Leaf(table) => Body::Leaf(Arc::clone(table)),
            Body::Inner(children) => Body::Inner(Arc::clone(children)),
        }
    }
}

pub(crate) struct Segment<K, V> {
    key_shift: u32,
    body: Latch<Body<K, V>>,
}

impl<K, V> Segment<K, V> {
    pub fn root() -> Segment<K, V> {
        Segment::leaf(0, INITIAL_SLOTS)
    }

    fn leaf(key_shift: u32, len: usize) -> Segment<K, V> {
        Segment {
            key_shift,
            body: Latch::new(Body::Leaf(Arc::new(Table::new(len)))),
        }
    }

    // Unmasked probe origin for `key_hash` at this segment's depth.
    // Shift semantics wrap like the host's 32-bit right shift.
    #[inline]
    fn start(&self, key_hash: u32) -> usize {
        key_hash.wrapping_shr(self.key_shift) as usize
    }

    #[inline]
    fn child_of(&self, key_hash: u32) -> usize {
        self.start(key_hash) & (FANOUT - 1)
    }

    /// Lock-free lookup. Snapshot the body, route inner nodes, probe the
    /// leaf: EMPTY terminates, tombstones keep going, a matching hash
    /// code is confirmed against key equality.
    pub fn locate<Q, H>(
        &self,
        key: &Q,
        key_hash: u32,
        tomb: *mut Entry<K, V>,
        cmp: &KeyCmp<H>,
    ) -> Option<*mut Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + PartialEq + ?Sized,
        H: BuildHasher,
    {
        let body = self.body.read().clone();
        match body {
            Body::Inner(children) => {
                children[self.child_of(key_hash)].locate(key, key_hash, tomb, cmp)
            }
            Body::Leaf(table) => {
                let mask = table.mask();
                let start = self.start(key_hash);
                for i in 0..table.len() {
                    let ptr = table.slots[start.wrapping_add(i) & mask].load(SeqCst);
                    if ptr.is_null() {
                        return None;
                    }
                    if ptr == tomb {
                        continue;
                    }
                    let entry = unsafe { &*ptr };
                    if entry.to_key_hash() == key_hash {
                        match entry.as_key() {
                            Some(k) if cmp.are_equal(k.borrow(), key) => return Some(ptr),
                            _ => (),
                        }
                    }
                }
                None
            }
        }
    }

    /// Insert `key,value`, consuming an entry from `chain`'s reservoir,
    /// or overwrite the value of an existing entry. Caller must hold
    /// write exclusivity (sole owner, or the cache mutex). Returns the
    /// entry and the older value if any.
    #[allow(clippy::too_many_arguments)]
    pub fn set<H>(
        &self,
        key: K,
        value: V,
        key_hash: u32,
        chain: &Chain<K, V>,
        tomb: *mut Entry<K, V>,
        cmp: &KeyCmp<H>,
        shared: bool,
        score: &Rebalances,
    ) -> Result<(*mut Entry<K, V>, Option<V>)>
    where
        K: Hash + PartialEq,
        H: BuildHasher,
    {
        let body = self.body.read().clone();
        match body {
            Body::Inner(children) => children[self.child_of(key_hash)]
                .set(key, value, key_hash, chain, tomb, cmp, shared, score),
            Body::Leaf(table) => {
                let mask = table.mask();
                let start = self.start(key_hash);
                let mut vacated: Option<usize> = None;
                let mut empty: Option<usize> = None;
                for i in 0..table.len() {
                    let idx = start.wrapping_add(i) & mask;
                    let ptr = table.slots[idx].load(SeqCst);
                    if ptr.is_null() {
                        empty = Some(idx);
                        break;
                    }
                    if ptr == tomb {
                        if vacated.is_none() {
                            vacated = Some(idx);
                        }
                        continue;
                    }
                    let entry = unsafe { &*ptr };
                    if entry.to_key_hash() == key_hash {
                        if let Some(k) = entry.as_key() {
                            if cmp.are_equal(k, &key) {
                                return Ok((ptr, entry.replace_value(value)));
                            }
                        }
                    }
                }
                // earliest vacated slot in the probe sequence wins.
                let (slot, was_vacated) = match (vacated, empty) {
                    (Some(idx), _) => (idx, true),
                    (None, Some(idx)) => (idx, false),
                    (None, None) => return err_at!(Fatal, msg: "leaf table has no free slot"),
                };

                let ptr = chain.take();
                unsafe { (*ptr).init(key, value, key_hash) };
                table.slots[slot].store(ptr, SeqCst);
                // count moves only after the slot store is visible.
                table.n_entries.fetch_add(1, SeqCst);
                if was_vacated {
                    table.n_tombs.fetch_sub(1, SeqCst);
                }
                chain.advance();

                if table.load() > table.len() / 2 {
                    self.rebalance(&table, tomb, shared, score)?;
                }
                Ok((ptr, None))
            }
        }
    }

    /// Vacate the slot holding exactly this entry, leaving a tombstone.
    /// Caller must hold write exclusivity and has already unlinked the
    /// entry from the insertion order chain.
    pub fn remove_ptr(
        &self,
        ptr: *mut Entry<K, V>,
        key_hash: u32,
        tomb: *mut Entry<K, V>,
    ) -> Result<()> {
        let body = self.body.read().clone();
        match body {
            Body::Inner(children) => {
                children[self.child_of(key_hash)].remove_ptr(ptr, key_hash, tomb)
            }
            Body::Leaf(table) => {
                let mask = table.mask();
                let start = self.start(key_hash);
                for i in 0..table.len() {
                    let idx = start.wrapping_add(i) & mask;
                    let slot = table.slots[idx].load(SeqCst);
                    if slot.is_null() {
                        break;
                    }
                    if slot == ptr {
                        table.slots[idx].store(tomb, SeqCst);
                        table.n_tombs.fetch_add(1, SeqCst);
                        table.n_entries.fetch_sub(1, SeqCst);
                        return Ok(());
                    }
                }
                err_at!(Fatal, msg: "entry missing from its leaf table")
            }
        }
    }

    // Load factor crossed 1/2. Either compact tombstones away, double
    // the table, or at the ceiling partition into sub-segments. A
    // pathologically skewed hash distribution aborts the partition and
    // doubles past the ceiling instead.
    fn rebalance(
        &self,
        table: &Arc<Table<K, V>>,
        tomb: *mut Entry<K, V>,
        shared: bool,
        score: &Rebalances,
    ) -> Result<()> {
        let live = table.live(tomb);
        let len = table.len();
        if table.to_tombs() > table.to_entries() {
            score.n_compactions.fetch_add(1, SeqCst);
            debug!(
                target: "scache",
                "compacting leaf, {} live in {} slots", live.len(), len
            );
            if shared {
                // readers on the old table stay correct.
                self.rebuild(&live, len)
            } else {
                table.clear_slots();
                for ptr in live.into_iter() {
                    table.probe_insert(self.key_shift, ptr)?;
                }
                Ok(())
            }
        } else if len * 2 <= RESIZE_CEILING {
            score.n_grows.fetch_add(1, SeqCst);
            debug!(target: "scache", "doubling leaf to {} slots", len * 2);
            self.rebuild(&live, len * 2)
        } else {
            match self.partition(&live, len)? {
                Some(children) => {
                    score.n_splits.fetch_add(1, SeqCst);
                    debug!(
                        target: "scache",
                        "leaf split into {} sub-segments at shift {}",
                        FANOUT,
                        self.key_shift + FANOUT_BITS
                    );
                    *self.body.write() = Body::Inner(children);
                    Ok(())
                }
                None => {
                    score.n_degraded.fetch_add(1, SeqCst);
                    warn!(
                        target: "scache",
                        "skewed key hashes, doubling leaf to {} slots past the ceiling",
                        len * 2
                    );
                    self.rebuild(&live, len * 2)
                }
            }
        }
    }

    fn rebuild(&self, live: &[*mut Entry<K, V>], len: usize) -> Result<()> {
        let table = Table::new(len);
        for &ptr in live.iter() {
            table.probe_insert(self.key_shift, ptr)?;
        }
        *self.body.write() = Body::Leaf(Arc::new(table));
        Ok(())
    }

    // Build the fan-out of children, each child one routing level deeper
    // and sized so total slot count doubles. Returns None if any child
    // would start above half load.
    fn partition(
        &self,
        live: &[*mut Entry<K, V>],
        len: usize,
    ) -> Result<Option<Arc<Vec<Segment<K, V>>>>> {
        let child_len = (len * 2) / FANOUT;
        let key_shift = self.key_shift + FANOUT_BITS;
        let children: Vec<Segment<K, V>> =
            (0..FANOUT).map(|_| Segment::leaf(key_shift, child_len)).collect();
        for &ptr in live.iter() {
            let key_hash = unsafe { &*ptr }.to_key_hash();
            let child = &children[self.child_of(key_hash)];
            let table = match &*child.body.read() {
                Body::Leaf(table) => Arc::clone(table),
                Body::Inner(_) => unreachable!(),
            };
            if (table.to_entries() + 1) > table.len() / 2 {
                return Ok(None);
            }
            table.probe_insert(key_shift, ptr)?;
        }
        Ok(Some(Arc::new(children)))
    }

    /// Live entries under this segment.
    pub fn count(&self) -> usize {
        let body = self.body.read().clone();
        match body {
            Body::Leaf(table) => table.to_entries(),
            Body::Inner(children) => children.iter().map(|c| c.count()).sum(),
        }
    }

    /// Null out every slot, zero the counters, recursively. The tree
    /// shape is kept. Single-owner caches only.
    pub fn clear_in_place(&self) {
        let body = self.body.read().clone();
        match body {
            Body::Leaf(table) => table.clear_slots(),
            Body::Inner(children) => {
                for child in children.iter() {
                    child.clear_in_place()
                }
            }
        }
    }

    /// Swap in a fresh initial leaf, dropping sub-segments. Caller must
    /// hold the cache mutex; readers on the old structure stay correct.
    pub fn reset(&self) {
        *self.body.write() = Body::Leaf(Arc::new(Table::new(INITIAL_SLOTS)));
    }

    /// Fold table shape and probe distances into `stats`.
    pub fn gather(&self, depth: usize, tomb: *mut Entry<K, V>, stats: &mut Stats) {
        let body = self.body.read().clone();
        match body {
            Body::Leaf(table) => {
                stats.n_leafs += 1;
                stats.n_slots += table.len();
                stats.n_entries += table.to_entries();
                stats.n_tombstones += table.to_tombs();
                stats.depth = usize::max(stats.depth, depth);
                let mask = table.mask();
                for (idx, slot) in table.slots.iter().enumerate() {
                    let ptr = slot.load(SeqCst);
                    if ptr.is_null() || ptr == tomb {
                        continue;
                    }
                    let start = self.start(unsafe { &*ptr }.to_key_hash()) & mask;
                    let distance = idx.wrapping_sub(start) & mask;
                    stats.probe_samples += 1;
                    stats.probe_total += distance;
                    stats.probe_max = usize::max(stats.probe_max, distance);
                }
            }
            Body::Inner(children) => {
                stats.n_inners += 1;
                for child in children.iter() {
                    child.gather(depth + 1, tomb, stats)
                }
            }
        }
    }

    /// Validate structural invariants under this segment and return the
    /// live count: counter agreement, load factor, probe reachability of
    /// every live entry and `key_shift` lineage.
    pub fn validate(&self, key_shift: u32, tomb: *mut Entry<K, V>) -> Result<usize> {
        if self.key_shift != key_shift {
            return err_at!(Fatal, msg: "key_shift {} expected {}", self.key_shift, key_shift);
        }
        let body = self.body.read().clone();
        match body {
            Body::Inner(children) => {
                if children.len() != FANOUT {
                    return err_at!(Fatal, msg: "fan-out {} expected {}", children.len(), FANOUT);
                }
                let mut count = 0;
                for child in children.iter() {
                    count += child.validate(key_shift + FANOUT_BITS, tomb)?;
                }
                Ok(count)
            }
            Body::Leaf(table) => {
                let mask = table.mask();
                let (mut n_live, mut n_tombs) = (0, 0);
                for (idx, slot) in table.slots.iter().enumerate() {
                    let ptr = slot.load(SeqCst);
                    if ptr.is_null() {
                        continue;
                    }
                    if ptr == tomb {
                        n_tombs += 1;
                        continue;
                    }
                    n_live += 1;
                    let start = self.start(unsafe { &*ptr }.to_key_hash()) & mask;
                    let mut reached = false;
                    for i in 0..table.len() {
                        let j = start.wrapping_add(i) & mask;
                        let probed = table.slots[j].load(SeqCst);
                        if probed.is_null() {
                            break;
                        }
                        if j == idx {
                            reached = true;
                            break;
                        }
                    }
                    if !reached {
                        return err_at!(Fatal, msg: "entry at slot {} unreachable by probe", idx);
                    }
                }
                if n_live != table.to_entries() {
                    return err_at!(Fatal, msg: "live {} counter {}", n_live, table.to_entries());
                }
                if n_tombs != table.to_tombs() {
                    return err_at!(Fatal, msg: "tombs {} counter {}", n_tombs, table.to_tombs());
                }
                if n_live + n_tombs > table.len() / 2 {
                    return err_at!(
                        Fatal,
                        msg: "load {} over half of {}", n_live + n_tombs, table.len()
                    );
                }
                Ok(n_live)
            }
        }
    }
}

#[cfg(test)]
#[path = "segment_test.rs"]
mod segment_test;
