use dashmap::DashSet;
use probabilistic_collections::bloom::BloomFilter;
use std::sync::Mutex;

use crate::config::{DedupConfig, DedupMode};
use crate::models::RecordId;

type PairKey = (RecordId, RecordId);

/// Run-scoped set of pairs already handed to the evaluator.
///
/// The exact set grows with the number of distinct candidate pairs; the
/// approximate set has fixed memory but its false positives drop a pair that
/// was never evaluated.
pub enum SeenPairs {
    Off,
    Exact(DashSet<PairKey>),
    Approximate(Mutex<BloomFilter<PairKey>>),
}

impl SeenPairs {
    pub fn new(cfg: &DedupConfig) -> Self {
        match cfg.mode {
            DedupMode::Off => SeenPairs::Off,
            DedupMode::Exact => SeenPairs::Exact(DashSet::new()),
            DedupMode::Approximate => {
                SeenPairs::Approximate(Mutex::new(BloomFilter::new(cfg.expected_pairs, cfg.false_positive_rate)))
            }
        }
    }

    /// Records the pair and returns true the first time it is offered.
    pub fn first_sighting(&self, key: PairKey) -> bool {
        match self {
            SeenPairs::Off => true,
            SeenPairs::Exact(set) => set.insert(key),
            SeenPairs::Approximate(filter) => {
                let mut f = match filter.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if f.contains(&key) {
                    false
                } else {
                    f.insert(&key);
                    true
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(a: i64, b: i64) -> PairKey { (RecordId::new(0, a), RecordId::new(0, b)) }

    #[test]
    fn exact_reports_each_pair_once() {
        let seen = SeenPairs::new(&DedupConfig { mode: DedupMode::Exact, ..Default::default() });
        assert!(seen.first_sighting(key(1, 2)));
        assert!(!seen.first_sighting(key(1, 2)));
        assert!(seen.first_sighting(key(1, 3)));
    }

    #[test]
    fn off_never_suppresses() {
        let seen = SeenPairs::new(&DedupConfig { mode: DedupMode::Off, ..Default::default() });
        assert!(seen.first_sighting(key(1, 2)));
        assert!(seen.first_sighting(key(1, 2)));
    }

    #[test]
    fn approximate_never_misses_a_repeat() {
        let seen = SeenPairs::new(&DedupConfig { mode: DedupMode::Approximate, expected_pairs: 1000, false_positive_rate: 0.01 });
        for i in 0..200 { seen.first_sighting(key(i, i + 1)); }
        for i in 0..200 { assert!(!seen.first_sighting(key(i, i + 1))); }
    }
}
