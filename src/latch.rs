//! Module `latch` implement a latch-and-spin guarded cell, useful for
//! non-blocking reads.
//!
//! The cache's read path must never park on a mutex. A [Latch] wraps a
//! value with a single atomic word carrying a writer flag and a reader
//! count. Readers increment the count while the writer flag is clear;
//! the writer flips the flag, waits out live readers and then owns the
//! value exclusively. Both sides spin, neither blocks, and writes are
//! expected to be short - typically swapping one `Arc` for another.

use std::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
    result,
    sync::atomic::{AtomicU32, Ordering::SeqCst},
};

/// Latch guards a value for concurrent readers and a serialized writer.
///
/// It uses AtomicU32 for:
/// * ref-count, bits [0-30].
/// * writer flag, bit 31.
pub struct Latch<T> {
    latchlock: AtomicU32,
    reads: AtomicU32,
    writes: AtomicU32,
    spins: AtomicU32,

    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Latch<T> {}
unsafe impl<T: Send + Sync> Sync for Latch<T> {}

impl<T> Latch<T> {
    const WRITER_FLAG: u32 = 0x80000000;
    const READERS_FLAG: u32 = 0x7FFFFFFF;

    /// Create a new Latch over `value`.
    pub fn new(value: T) -> Latch<T> {
        Latch {
            latchlock: AtomicU32::new(0),
            reads: AtomicU32::new(0),
            writes: AtomicU32::new(0),
            spins: AtomicU32::new(0),

            value: UnsafeCell::new(value),
        }
    }

    /// Consume the latch and return the guarded value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    /// Acquire latch for read permission, spinning while a writer holds it.
    pub fn read(&self) -> ReadGuard<T> {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::WRITER_FLAG) == 0 {
                if self.latchlock.compare_exchange(old, old + 1, SeqCst, SeqCst).is_ok() {
                    if cfg!(feature = "debug") {
                        self.reads.fetch_add(1, SeqCst);
                    }
                    break ReadGuard { door: self };
                }
            }
            if cfg!(feature = "debug") {
                self.spins.fetch_add(1, SeqCst);
            }
        }
    }

    /// Acquire latch for write permission, first flip the writer flag,
    /// then spin until already-admitted readers have drained out.
    pub fn write(&self) -> WriteGuard<T> {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::WRITER_FLAG) == 0 {
                let new = old | Self::WRITER_FLAG;
                if self.latchlock.compare_exchange(old, new, SeqCst, SeqCst).is_ok() {
                    break;
                }
            }
            if cfg!(feature = "debug") {
                self.spins.fetch_add(1, SeqCst);
            }
        }
        loop {
            if (self.latchlock.load(SeqCst) & Self::READERS_FLAG) == 0 {
                if cfg!(feature = "debug") {
                    self.writes.fetch_add(1, SeqCst);
                }
                break WriteGuard { door: self };
            }
            if cfg!(feature = "debug") {
                self.spins.fetch_add(1, SeqCst);
            }
        }
    }

    /// Decode the latch word into a [Stats] snapshot.
    pub fn to_stats(&self) -> Stats {
        let word = self.latchlock.load(SeqCst);
        Stats {
            write_latched: (word & Self::WRITER_FLAG) != 0,
            n_readers: (word & Self::READERS_FLAG) as usize,
            reads: self.reads.load(SeqCst) as usize,
            writes: self.writes.load(SeqCst) as usize,
            spins: self.spins.load(SeqCst) as usize,
        }
    }
}

/// Type to handle read-latch, when value gets dropped the latch is released.
pub struct ReadGuard<'a, T> {
    door: &'a Latch<T>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.door.value.get() }
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.door.latchlock.fetch_sub(1, SeqCst);
    }
}

/// Type to handle write-latch, when value gets dropped the latch is released.
pub struct WriteGuard<'a, T> {
    door: &'a Latch<T>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.door.value.get() }
    }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.door.value.get() }
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        let old = self.door.latchlock.load(SeqCst);
        if (old & Latch::<T>::READERS_FLAG) > 0 {
            panic!("active readers while write latched, call the programmer");
        }
        self.door.latchlock.store(0, SeqCst);
    }
}

/// Point-in-time snapshot of a [Latch]: who holds it now, decoded from
/// the latch word, and how often it has been taken. The cumulative
/// `reads`/`writes`/`spins` counters tick only under the `debug`
/// feature and stay zero otherwise.
pub struct Stats {
    /// A writer currently holds, or is draining readers for, the latch.
    pub write_latched: bool,
    /// Readers inside the latch right now.
    pub n_readers: usize,
    /// Read acquisitions so far.
    pub reads: usize,
    /// Write acquisitions so far.
    pub writes: usize,
    /// Spin iterations wasted waiting for the latch so far.
    pub spins: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            "latch = {{ write_latched={}, n_readers={}, reads={}, writes={}, spins={} }}",
            self.write_latched, self.n_readers, self.reads, self.writes, self.spins,
        )
    }
}

#[cfg(test)]
#[path = "latch_test.rs"]
mod latch_test;
