//! Module `ticker` implement the cached timestamp source gating the
//! cleanup sweeps.
//!
//! A tick is an integer timestamp. The ticker is not a clock: its value
//! is stored by the write path, typically from wall-clock milliseconds,
//! so that the read path can stamp access times without touching the
//! clock at all.

use std::{
    sync::atomic::{AtomicU64, Ordering::SeqCst},
    time,
};

/// Number of ticks that must pass between two cleanup sweeps.
pub const CLEANUP_TICK_THRESHOLD: u64 = 50;

/// Source of wall-clock ticks, sampled once per write operation.
/// One tick is one millisecond under [SystemClock].
pub trait Clock {
    fn now(&self) -> u64;
}

/// Default clock, milliseconds since unix epoch.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        match time::SystemTime::now().duration_since(time::UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as u64,
            Err(_) => 0,
        }
    }
}

/// Reusable timestamp cache with a cleanup-rate gate.
///
/// `next_tick` is the latest timestamp stored by a write; `prev_tick`
/// remembers when the last cleanup sweep ran. Sweeps are skipped until
/// the ticker has moved `threshold` ticks past `prev_tick`.
pub struct Ticker {
    next_tick: AtomicU64,
    prev_tick: AtomicU64,
    threshold: u64,
}

impl Ticker {
    pub fn new(threshold: u64) -> Ticker {
        Ticker {
            next_tick: AtomicU64::new(0),
            prev_tick: AtomicU64::new(0),
            threshold,
        }
    }

    #[inline]
    pub fn to_next_tick(&self) -> u64 {
        self.next_tick.load(SeqCst)
    }

    #[inline]
    pub fn set_next_tick(&self, tick: u64) {
        self.next_tick.store(tick, SeqCst)
    }

    /// True while the ticker has not moved far enough since the last
    /// sweep to warrant another one.
    pub fn skip_cleanup(&self) -> bool {
        let next = self.next_tick.load(SeqCst);
        let prev = self.prev_tick.load(SeqCst);
        next.saturating_sub(prev) < self.threshold
    }

    /// Account a finished sweep.
    pub fn mark_cleanup(&self) {
        self.prev_tick.store(self.next_tick.load(SeqCst), SeqCst)
    }
}

#[cfg(test)]
#[path = "ticker_test.rs"]
mod ticker_test;
