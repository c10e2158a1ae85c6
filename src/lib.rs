//! Scache provide a self cleaning, in-process key,value cache tuned
//! for search style workloads - lookup heavy traffic, a bounded working
//! set and entries that go stale on a wall-clock schedule.
//!
//! Entries are indexed by a segmented, open addressed hash table. Leaf
//! tables double in size as they fill up, and beyond a ceiling they
//! partition into a fan-out of sub-segments addressed by hash bits. All
//! live entries are additionally threaded onto a single insertion order
//! chain, so that the cleanup sweep can retire the oldest entries in
//! bounded work per write.
//!
//! Two time-to-live policies run side by side:
//!
//! * **expire-after-write**, measured from the entry's last write.
//! * **expire-after-access**, measured from the entry's last read or write.
//!
//! Timestamps are integer ticks supplied by a [Ticker], refreshed from a
//! [Clock] on every write. By default one tick is one millisecond of wall
//! clock. Cleanup is amortized, each write walks at most [REMOVE_DEPTH]
//! entries from the head of the chain, and only when the ticker has moved
//! far enough since the previous sweep.
//!
//! **Sharing**: a cache is single-owner by default and performs no
//! synchronization. Configure it as _shared_ to allow concurrent readers,
//! in which case structural mutations serialize on a cache wide mutex
//! while the lookup path stays lock-free. Readers may observe a state no
//! older than their last synchronization point; stronger visibility is
//! not promised.

mod error;

mod cache;
mod chain;
mod cmp;
mod entry;
mod latch;
mod segment;
mod stats;
mod ticker;

pub use crate::cache::{Cache, Config, Iter, REMOVE_DEPTH};
pub use crate::cmp::{CityHash, KeyCmp, ValueCmp};
pub use crate::error::Error;
pub use crate::latch::Latch;
pub use crate::stats::Stats;
pub use crate::ticker::{Clock, SystemClock, Ticker, CLEANUP_TICK_THRESHOLD};

/// Type alias for Result return type, used by this package.
pub type Result<T> = std::result::Result<T, Error>;

/// Convert rust-native type to json string, which can be fed to
/// database applications, dashboards and the like.
pub trait ToJson {
    fn to_json(&self) -> String;
}
