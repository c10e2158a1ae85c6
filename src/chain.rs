//! Module `chain` implement the insertion order list and the entry
//! reservoir.
//!
//! All live entries hang between two sentinel entries, `head` and
//! `tail`, in strict insertion order. Beyond `tail` a singly-consumed
//! run of blank entries, the reservoir, waits to be handed out. Taking
//! an entry returns `tail.next`; once the caller has published it,
//! [Chain::advance] swaps `tail` forward past the consumed entry so it
//! lands at the live end of the list. When the reservoir runs dry a
//! batch of [RESERVOIR_BATCH] fresh entries is appended.
//!
//! Chain edits happen either on the sole owner or under the cache's
//! mutex; the links themselves are atomic so concurrent readers can
//! walk the chain while it is edited.

use std::sync::{
    atomic::{AtomicUsize, Ordering::SeqCst},
    Mutex,
};

use crate::{entry::Entry, Result};
use crate::err_at;

/// Number of entries appended to the reservoir when it runs dry.
pub const RESERVOIR_BATCH: usize = 8;

pub struct Chain<K, V> {
    head: *mut Entry<K, V>,
    tail: *mut Entry<K, V>,
    n_allocated: AtomicUsize,
    graveyard: Mutex<Vec<*mut Entry<K, V>>>,
}

unsafe impl<K: Send, V: Send> Send for Chain<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Chain<K, V> {}

impl<K, V> Drop for Chain<K, V> {
    fn drop(&mut self) {
        let mut ptr = self.head;
        while !ptr.is_null() {
            let next = unsafe { &*ptr }.as_next();
            let _entry = unsafe { Box::from_raw(ptr) };
            ptr = next;
        }
        let mut graveyard = match self.graveyard.lock() {
            Ok(graveyard) => graveyard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for ptr in graveyard.drain(..) {
            let _entry = unsafe { Box::from_raw(ptr) };
        }
    }
}

impl<K, V> Chain<K, V> {
    /// Create a new chain, `head` and `tail` back to back, with
    /// `capacity` blank entries pre-allocated into the reservoir.
    pub fn new(capacity: usize) -> Chain<K, V> {
        let head = Box::leak(Entry::new_blank()) as *mut Entry<K, V>;
        let tail = Box::leak(Entry::new_blank()) as *mut Entry<K, V>;
        unsafe {
            (*head).set_next(tail);
            (*tail).set_prev(head);
        }

        let chain = Chain {
            head,
            tail,
            n_allocated: AtomicUsize::new(0),
            graveyard: Mutex::new(Vec::new()),
        };
        chain.refill(capacity);
        chain
    }

    // Append `n` blank entries after the last reservoir entry.
    fn refill(&self, n: usize) {
        let mut last = self.tail;
        loop {
            let next = unsafe { &*last }.as_next();
            if next.is_null() {
                break;
            }
            last = next;
        }
        for _i in 0..n {
            let entry = Box::leak(Entry::new_blank()) as *mut Entry<K, V>;
            unsafe {
                (*last).set_next(entry);
                (*entry).set_prev(last);
            }
            last = entry;
        }
        self.n_allocated.fetch_add(n, SeqCst);
    }

    /// Hand out the next reservoir entry, without yet linking it into
    /// the live region. Callers publish the entry and then
    /// [advance][Chain::advance].
    pub fn take(&self) -> *mut Entry<K, V> {
        let next = unsafe { &*self.tail }.as_next();
        if !next.is_null() {
            return next;
        }
        self.refill(RESERVOIR_BATCH);
        unsafe { &*self.tail }.as_next()
    }

    /// Swap `tail` forward past the entry handed out by the last
    /// [take][Chain::take], so the consumed entry becomes the newest
    /// live one.
    pub fn advance(&self) {
        let tail = unsafe { &*self.tail };
        let entry = tail.as_next();
        let before = tail.as_prev();
        let after = unsafe { &*entry }.as_next();

        unsafe {
            (*before).set_next(entry);
            (*entry).set_prev(before);
            (*entry).set_next(self.tail);
        }
        tail.set_prev(entry);
        tail.set_next(after);
        if !after.is_null() {
            unsafe { (*after).set_prev(self.tail) };
        }
    }

    /// Unlink a live entry from the chain. Its own links are left
    /// untouched so an in-flight iterator standing on it can recover.
    pub fn unlink(&self, ptr: *mut Entry<K, V>) {
        let entry = unsafe { &*ptr };
        let prev = entry.as_prev();
        let next = entry.as_next();
        unsafe {
            (*prev).set_next(next);
            (*next).set_prev(prev);
        }
    }

    /// Reset an unlinked entry and re-link it right after `tail`, making
    /// it the next allocation. Single-owner caches only.
    pub fn recycle(&self, ptr: *mut Entry<K, V>) {
        unsafe { (*ptr).reset() };
        let after = unsafe { &*self.tail }.as_next();
        unsafe {
            (*self.tail).set_next(ptr);
            (*ptr).set_prev(self.tail);
            (*ptr).set_next(after);
        }
        if !after.is_null() {
            unsafe { (*after).set_prev(ptr) };
        }
    }

    /// Park an unlinked entry until the cache drops. Shared caches
    /// cannot recycle, a concurrent reader may still traverse the entry.
    pub fn bury(&self, ptr: *mut Entry<K, V>) {
        let mut graveyard = match self.graveyard.lock() {
            Ok(graveyard) => graveyard,
            Err(poisoned) => poisoned.into_inner(),
        };
        graveyard.push(ptr);
    }

    #[inline]
    pub fn first_live(&self) -> *mut Entry<K, V> {
        unsafe { &*self.head }.as_next()
    }

    #[inline]
    pub fn is_end(&self, ptr: *mut Entry<K, V>) -> bool {
        ptr.is_null() || ptr == self.tail
    }

    /// Number of entries allocated over the chain's lifetime, reservoir
    /// pre-allocation plus batched refills; sentinels not counted.
    #[inline]
    pub fn to_allocated(&self) -> usize {
        self.n_allocated.load(SeqCst)
    }

    pub fn live_count(&self) -> usize {
        let mut count = 0;
        let mut ptr = self.first_live();
        while !self.is_end(ptr) {
            count += 1;
            ptr = unsafe { &*ptr }.as_next();
        }
        count
    }

    /// Reset every live entry in place and point `tail` back to
    /// `head.next`, turning the whole chain into reservoir again.
    /// Single-owner caches only.
    pub fn reset_keep(&self) {
        let first = self.first_live();
        if first == self.tail {
            return;
        }
        let mut ptr = first;
        while !self.is_end(ptr) {
            let next = unsafe { &*ptr }.as_next();
            unsafe { (*ptr).reset() };
            ptr = next;
        }

        let tail = unsafe { &*self.tail };
        let last_live = tail.as_prev();
        let free = tail.as_next();

        unsafe {
            (*self.head).set_next(self.tail);
        }
        tail.set_prev(self.head);
        tail.set_next(first);
        unsafe {
            (*first).set_prev(self.tail);
            (*last_live).set_next(free);
        }
        if !free.is_null() {
            unsafe { (*free).set_prev(last_live) };
        }
    }

    /// Swap in an empty chain, abandoning live entries and reservoir to
    /// the graveyard. In-flight iterators on the old chain stay valid,
    /// the entries are reclaimed when the cache drops.
    pub fn reset_abandon(&self) {
        let mut ptr = self.first_live();
        {
            let mut graveyard = match self.graveyard.lock() {
                Ok(graveyard) => graveyard,
                Err(poisoned) => poisoned.into_inner(),
            };
            while !ptr.is_null() {
                let next = unsafe { &*ptr }.as_next();
                if ptr != self.tail {
                    graveyard.push(ptr);
                }
                ptr = next;
            }
        }
        unsafe {
            (*self.head).set_next(self.tail);
            (*self.tail).set_prev(self.head);
            (*self.tail).set_next(std::ptr::null_mut());
        }
    }

    /// Check link symmetry and key presence over the live region.
    pub fn validate(&self) -> Result<()> {
        let mut ptr = self.first_live();
        while !self.is_end(ptr) {
            let entry = unsafe { &*ptr };
            if entry.is_blank() {
                return err_at!(InvalidKey, msg: "blank entry on the live chain");
            }
            let next = entry.as_next();
            if next.is_null() {
                return err_at!(Fatal, msg: "live chain broke before tail");
            }
            if unsafe { &*next }.as_prev() != ptr {
                return err_at!(Fatal, msg: "chain links out of sync");
            }
            ptr = next;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "chain_test.rs"]
mod chain_test;
