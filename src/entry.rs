//! Module `entry` implement the unit of storage for the cache.
//!
//! An entry moves through three states: blank in the reservoir, live in
//! the table and on the insertion order chain, and finally either back
//! in the reservoir (single-owner caches) or parked in the graveyard
//! until the cache drops (shared caches, where a concurrent reader may
//! still hold a reference). Entries are addressed by raw pointer; the
//! cache guarantees they stay allocated for its whole lifetime.

use std::{
    ptr,
    sync::atomic::{AtomicPtr, AtomicU64, Ordering::SeqCst},
};

use crate::latch::Latch;

/// Access timestamp of an entry that has never been read or written.
pub const NEVER: u64 = u64::MAX;

/// One key,value slot, intrusively linked into the insertion order chain.
///
/// `access_time` and `create_time` are integer ticks, see
/// [Ticker][crate::Ticker]. Concurrent access-time updates from readers
/// race and the last writer wins, which is fine for approximate
/// expiry. The value sits behind a [Latch] so a shared cache can
/// overwrite it while readers clone it out.
pub struct Entry<K, V> {
    key: Option<K>,
    value: Latch<Option<V>>,
    key_hash: u32,
    access_time: AtomicU64,
    create_time: AtomicU64,
    prev: AtomicPtr<Entry<K, V>>,
    next: AtomicPtr<Entry<K, V>>,
}

impl<K, V> Entry<K, V> {
    /// Entries start out blank, either as chain sentinels or parked in
    /// the reservoir. [Entry::init] makes them live.
    pub fn new_blank() -> Box<Entry<K, V>> {
        Box::new(Entry {
            key: None,
            value: Latch::new(None),
            key_hash: 0,
            access_time: AtomicU64::new(NEVER),
            create_time: AtomicU64::new(0),
            prev: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Initialize a reservoir entry into a live one. Caller must have
    /// exclusive access, the entry is not yet visible to readers.
    pub fn init(&mut self, key: K, value: V, key_hash: u32) {
        self.key = Some(key);
        *self.value.write() = Some(value);
        self.key_hash = key_hash;
        self.access_time.store(NEVER, SeqCst);
        self.create_time.store(0, SeqCst);
    }

    /// Strip a recycled entry back to reservoir state.
    pub fn reset(&mut self) {
        self.key = None;
        self.value.write().take();
        self.key_hash = 0;
        self.access_time.store(NEVER, SeqCst);
        self.create_time.store(0, SeqCst);
    }

    #[inline]
    pub fn as_key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    #[inline]
    pub fn is_blank(&self) -> bool {
        self.key.is_none()
    }

    #[inline]
    pub fn to_key_hash(&self) -> u32 {
        self.key_hash
    }

    pub fn to_value(&self) -> Option<V>
    where
        V: Clone,
    {
        self.value.read().clone()
    }

    pub fn replace_value(&self, value: V) -> Option<V> {
        self.value.write().replace(value)
    }

    pub fn take_value(&self) -> Option<V> {
        self.value.write().take()
    }

    #[inline]
    pub fn to_access_time(&self) -> u64 {
        self.access_time.load(SeqCst)
    }

    #[inline]
    pub fn set_access_time(&self, tick: u64) {
        self.access_time.store(tick, SeqCst)
    }

    #[inline]
    pub fn to_create_time(&self) -> u64 {
        self.create_time.load(SeqCst)
    }

    #[inline]
    pub fn set_create_time(&self, tick: u64) {
        self.create_time.store(tick, SeqCst)
    }

    #[inline]
    pub fn as_next(&self) -> *mut Entry<K, V> {
        self.next.load(SeqCst)
    }

    #[inline]
    pub fn as_prev(&self) -> *mut Entry<K, V> {
        self.prev.load(SeqCst)
    }

    #[inline]
    pub fn set_next(&self, ptr: *mut Entry<K, V>) {
        self.next.store(ptr, SeqCst)
    }

    #[inline]
    pub fn set_prev(&self, ptr: *mut Entry<K, V>) {
        self.prev.store(ptr, SeqCst)
    }
}
