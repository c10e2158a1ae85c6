//! Module `cmp` implement hash and equality capabilities for cache keys.
//!
//! Keys are located by a 32-bit hash code, computed once on insert and
//! cached on the entry. [KeyCmp] bundles the hash computation with the
//! equality check so applications can swap either without touching the
//! table code.

use std::hash::{BuildHasher, Hash, Hasher};

/// Type uses google's city hash to convert [Hash]able key into `u64`.
/// Refer [cityhash_rs] for details.
#[derive(Clone, Copy, Default)]
pub struct CityHash {
    digest: u128,
}

impl CityHash {
    pub fn new() -> CityHash {
        CityHash::default()
    }
}

impl BuildHasher for CityHash {
    type Hasher = Self;

    #[inline]
    fn build_hasher(&self) -> Self {
        *self
    }
}

impl Hasher for CityHash {
    fn finish(&self) -> u64 {
        ((self.digest >> 64) as u64) ^ ((self.digest & 0xFFFFFFFFFFFFFFFF) as u64)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.digest = cityhash_rs::cityhash_110_128(bytes);
    }
}

/// Key comparator capability, provide `hash_of` and `are_equal` for the
/// probe sequence.
///
/// A `direct` comparator, the default, trusts the key's own [PartialEq]
/// on the hot path. Opting out via [KeyCmp::set_direct] re-verifies the
/// folded hash before falling back to [PartialEq]. Comparators must be
/// stable for the lifetime of a key.
#[derive(Clone)]
pub struct KeyCmp<H = CityHash> {
    hash_builder: H,
    direct: bool,
}

impl Default for KeyCmp<CityHash> {
    fn default() -> Self {
        KeyCmp::new()
    }
}

impl KeyCmp<CityHash> {
    pub fn new() -> KeyCmp<CityHash> {
        KeyCmp::with_hash(CityHash::new())
    }
}

impl<H> KeyCmp<H> {
    pub fn with_hash(hash_builder: H) -> KeyCmp<H> {
        KeyCmp { hash_builder, direct: true }
    }

    pub fn set_direct(&mut self, direct: bool) -> &mut Self {
        self.direct = direct;
        self
    }

    pub fn is_direct(&self) -> bool {
        self.direct
    }
}

impl<H> KeyCmp<H>
where
    H: BuildHasher,
{
    /// Hash `key` into the 32-bit code used for slot addressing, folding
    /// the builder's 64-bit output.
    pub fn hash_of<Q>(&self, key: &Q) -> u32
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        let code = hasher.finish();
        ((code >> 32) as u32) ^ (code as u32)
    }

    pub fn are_equal<Q>(&self, a: &Q, b: &Q) -> bool
    where
        Q: Hash + PartialEq + ?Sized,
    {
        if self.direct {
            a == b
        } else {
            self.hash_of(a) == self.hash_of(b) && a == b
        }
    }
}

/// Value comparator capability. The lookup path never consults it, the
/// field is carried for entry level equality.
#[derive(Clone, Copy, Default)]
pub struct ValueCmp;

impl ValueCmp {
    pub fn are_equal<V>(&self, a: &V, b: &V) -> bool
    where
        V: PartialEq + ?Sized,
    {
        a == b
    }
}
