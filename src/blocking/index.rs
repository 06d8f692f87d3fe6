use dashmap::DashMap;
use std::collections::BTreeSet;

use crate::models::{BlockKey, RecordId};

/// One block of one pass, materialized for draining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub pass: usize,
    /// Position of the key in the pass's ascending key order.
    pub ordinal: u64,
    pub key: BlockKey,
    /// Unique member ids in ascending order.
    pub members: Vec<RecordId>,
}

/// Concurrent mapping from `(pass, key)` to member set. Each pass owns a
/// sharded map, so inserts into different buckets never contend on one lock.
#[derive(Debug)]
pub struct BlockIndex {
    passes: Vec<DashMap<BlockKey, BTreeSet<RecordId>>>,
}

impl BlockIndex {
    pub fn new(pass_count: usize) -> Self {
        Self { passes: (0..pass_count).map(|_| DashMap::new()).collect() }
    }

    pub fn pass_count(&self) -> usize { self.passes.len() }

    /// Idempotent: inserting the same `(pass, key, record)` twice leaves one member.
    /// Returns true if the record was newly added.
    pub fn insert(&self, pass: usize, key: BlockKey, record: RecordId) -> bool {
        match self.passes.get(pass) {
            Some(map) => map.entry(key).or_default().insert(record),
            None => false,
        }
    }

    pub fn block_count(&self, pass: usize) -> usize {
        self.passes.get(pass).map(|m| m.len()).unwrap_or(0)
    }

    pub fn members(&self, pass: usize, key: &BlockKey) -> Option<Vec<RecordId>> {
        let map = self.passes.get(pass)?;
        map.get(key).map(|set| set.iter().copied().collect())
    }

    /// Frees a drained block. Later cursors skip it.
    pub fn evict(&self, pass: usize, key: &BlockKey) -> bool {
        self.passes.get(pass).map(|m| m.remove(key).is_some()).unwrap_or(false)
    }

    /// Lazy cursor over the pass's blocks in ascending key order. The key order
    /// is captured when the cursor is created; member sets are fetched as the
    /// cursor advances.
    pub fn blocks_for_pass(&self, pass: usize) -> Blocks<'_> {
        let mut keys: Vec<BlockKey> = self
            .passes
            .get(pass)
            .map(|m| m.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default();
        keys.sort_unstable();
        Blocks { index: self, pass, keys, pos: 0 }
    }
}

pub struct Blocks<'a> {
    index: &'a BlockIndex,
    pass: usize,
    keys: Vec<BlockKey>,
    pos: usize,
}

impl<'a> Blocks<'a> {
    /// Number of blocks the cursor was created over, evicted or not.
    pub fn total(&self) -> u64 { self.keys.len() as u64 }

    pub fn key_at(&self, ordinal: u64) -> Option<&BlockKey> { self.keys.get(ordinal as usize) }

    /// Repositions the cursor so the next block yielded has `ordinal`.
    pub fn skip_to(&mut self, ordinal: u64) {
        self.pos = (ordinal as usize).min(self.keys.len());
    }

    /// Materializes the block at `ordinal`, or `None` if it was evicted.
    pub fn block_at(&self, ordinal: u64) -> Option<Block> {
        let key = self.keys.get(ordinal as usize)?;
        let members = self.index.members(self.pass, key)?;
        Some(Block { pass: self.pass, ordinal, key: key.clone(), members })
    }
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        while self.pos < self.keys.len() {
            let ordinal = self.pos as u64;
            self.pos += 1;
            if let Some(block) = self.block_at(ordinal) {
                return Some(block);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn rid(id: i64) -> RecordId { RecordId::new(0, id) }

    #[test]
    fn insert_is_idempotent() {
        let idx = BlockIndex::new(1);
        assert!(idx.insert(0, BlockKey::new("a"), rid(1)));
        assert!(!idx.insert(0, BlockKey::new("a"), rid(1)));
        assert_eq!(idx.members(0, &BlockKey::new("a")).unwrap(), vec![rid(1)]);
    }

    #[test]
    fn blocks_are_sorted_and_members_ascending() {
        let idx = BlockIndex::new(2);
        for (k, id) in [("c", 3), ("a", 9), ("b", 1), ("a", 2)] {
            idx.insert(0, BlockKey::new(k), rid(id));
        }
        idx.insert(1, BlockKey::new("z"), rid(1));
        let blocks: Vec<Block> = idx.blocks_for_pass(0).collect();
        let keys: Vec<&str> = blocks.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(blocks[0].members, vec![rid(2), rid(9)]);
        assert_eq!(blocks[2].ordinal, 2);
        assert_eq!(idx.block_count(1), 1);
    }

    #[test]
    fn cursor_restarts_at_ordinal_and_skips_evicted() {
        let idx = BlockIndex::new(1);
        for k in ["a", "b", "c", "d"] { idx.insert(0, BlockKey::new(k), rid(1)); }
        let mut cur = idx.blocks_for_pass(0);
        cur.skip_to(2);
        assert_eq!(cur.next().map(|b| b.ordinal), Some(2));
        assert!(idx.evict(0, &BlockKey::new("d")));
        assert!(cur.next().is_none());

        let mut again = idx.blocks_for_pass(0);
        again.skip_to(1);
        assert_eq!(again.next().map(|b| b.key), Some(BlockKey::new("b")));
    }

    #[test]
    fn parallel_inserts_are_not_lost() {
        let idx = BlockIndex::new(1);
        (0..1000i64).into_par_iter().for_each(|i| {
            idx.insert(0, BlockKey::new(format!("k{}", i % 7)), rid(i));
            idx.insert(0, BlockKey::new(format!("k{}", i % 7)), rid(i));
        });
        let total: usize = idx.blocks_for_pass(0).map(|b| b.members.len()).sum();
        assert_eq!(total, 1000);
    }
}
