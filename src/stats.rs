use std::{fmt, result};

#[allow(unused_imports)]
use crate::cache::Cache;
use crate::ToJson;

/// Statistic type, for [Cache] type.
///
/// Probe distance is the number of slot steps from an entry's ideal
/// slot to where it actually landed; the gather walk sums it over every
/// live entry, so only the running total, the sample count and the
/// worst case are carried here.
pub struct Stats {
    pub name: String,
    pub shared: bool,
    pub n_entries: usize,
    pub n_tombstones: usize,
    pub n_slots: usize,
    pub n_leafs: usize,
    pub n_inners: usize,
    pub depth: usize,
    pub n_allocated: usize,
    pub n_gets: usize,
    pub n_sets: usize,
    pub n_removes: usize,
    pub n_evicted: usize,
    pub n_grows: usize,
    pub n_compactions: usize,
    pub n_splits: usize,
    pub n_degraded: usize,
    pub probe_samples: usize,
    pub probe_total: usize,
    pub probe_max: usize,
}

impl Stats {
    pub(crate) fn new(name: &str, shared: bool) -> Stats {
        Stats {
            name: name.to_string(),
            shared,
            n_entries: Default::default(),
            n_tombstones: Default::default(),
            n_slots: Default::default(),
            n_leafs: Default::default(),
            n_inners: Default::default(),
            depth: Default::default(),
            n_allocated: Default::default(),
            n_gets: Default::default(),
            n_sets: Default::default(),
            n_removes: Default::default(),
            n_evicted: Default::default(),
            n_grows: Default::default(),
            n_compactions: Default::default(),
            n_splits: Default::default(),
            n_degraded: Default::default(),
            probe_samples: Default::default(),
            probe_total: Default::default(),
            probe_max: Default::default(),
        }
    }

    /// Return the average probe distance across live entries.
    pub fn to_probe_mean(&self) -> usize {
        match self.probe_samples {
            0 => 0,
            n => self.probe_total / n,
        }
    }

    /// Return the mean probe distance as a percentage of cache size.
    pub fn to_probe_percent(&self) -> usize {
        match self.n_entries {
            0 => 0,
            n => (self.to_probe_mean() * 100) / n,
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        writeln!(f, "scache.name = {}", self.name)?;
        writeln!(
            f,
            "scache = {{ shared={}, n_entries={}, n_tombstones={}, n_slots={} }}",
            self.shared, self.n_entries, self.n_tombstones, self.n_slots,
        )?;
        writeln!(
            f,
            "scache = {{ n_leafs={}, n_inners={}, depth={}, n_allocated={} }}",
            self.n_leafs, self.n_inners, self.depth, self.n_allocated,
        )?;
        writeln!(
            f,
            "scache.ops = {{ n_gets={}, n_sets={}, n_removes={}, n_evicted={} }}",
            self.n_gets, self.n_sets, self.n_removes, self.n_evicted,
        )?;
        writeln!(
            f,
            "scache.rebalance = {{ grows={}, compactions={}, splits={}, degraded={} }}",
            self.n_grows, self.n_compactions, self.n_splits, self.n_degraded,
        )?;
        write!(
            f,
            "scache.probe = {{ mean={}, max={}, percent={} }}",
            self.to_probe_mean(),
            self.probe_max,
            self.to_probe_percent(),
        )
    }
}

impl ToJson for Stats {
    fn to_json(&self) -> String {
        format!(
            concat!(
                r#"{{ "scache": {{ "name": "{}", "shared": {}, "#,
                r#""n_entries": {}, "n_tombstones": {}, "n_slots": {}, "#,
                r#""n_leafs": {}, "n_inners": {}, "depth": {}, "#,
                r#""n_allocated": {}, "#,
                r#""n_gets": {}, "n_sets": {}, "n_removes": {}, "#,
                r#""n_evicted": {}, "#,
                r#""n_grows": {}, "n_compactions": {}, "n_splits": {}, "#,
                r#""n_degraded": {}, "#,
                r#""probe_mean": {}, "probe_max": {}, "probe_percent": {} }} }}"#,
            ),
            self.name,
            self.shared,
            self.n_entries,
            self.n_tombstones,
            self.n_slots,
            self.n_leafs,
            self.n_inners,
            self.depth,
            self.n_allocated,
            self.n_gets,
            self.n_sets,
            self.n_removes,
            self.n_evicted,
            self.n_grows,
            self.n_compactions,
            self.n_splits,
            self.n_degraded,
            self.to_probe_mean(),
            self.probe_max,
            self.to_probe_percent(),
        )
    }
}
