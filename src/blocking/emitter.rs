use std::collections::HashMap;

use crate::blocking::index::Block;
use crate::config::LinkMode;
use crate::models::{CandidatePair, Provenance};

/// Per-block emission metadata, known before the first pair is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    pub pass: usize,
    pub ordinal: u64,
    pub members: usize,
    /// Pairs the block would yield without a ceiling.
    pub potential_pairs: u64,
    /// Pairs actually emitted, `min(potential_pairs, ceiling)`.
    pub emitted_pairs: u64,
    pub truncated: bool,
}

impl BlockMeta {
    pub fn dropped_pairs(&self) -> u64 { self.potential_pairs - self.emitted_pairs }
}

/// Lazy pair enumeration over one block in `(i, j)` order, `i < j`, on the
/// ascending member list. Stops after `ceiling` pairs.
pub struct CandidatePairs<'a> {
    block: &'a Block,
    mode: LinkMode,
    meta: BlockMeta,
    i: usize,
    j: usize,
    offset: u64,
}

pub fn potential_pairs(block: &Block, mode: LinkMode) -> u64 {
    let m = block.members.len() as u64;
    let all = m * m.saturating_sub(1) / 2;
    match mode {
        LinkMode::Deduplicate => all,
        LinkMode::Link => {
            let mut per_source: HashMap<u16, u64> = HashMap::new();
            for r in &block.members { *per_source.entry(r.source).or_default() += 1; }
            let same: u64 = per_source.values().map(|c| c * c.saturating_sub(1) / 2).sum();
            all - same
        }
    }
}

impl<'a> CandidatePairs<'a> {
    pub fn new(block: &'a Block, ceiling: usize, mode: LinkMode) -> Self {
        let potential = potential_pairs(block, mode);
        let emitted = potential.min(ceiling as u64);
        let meta = BlockMeta {
            pass: block.pass,
            ordinal: block.ordinal,
            members: block.members.len(),
            potential_pairs: potential,
            emitted_pairs: emitted,
            truncated: potential > emitted,
        };
        Self { block, mode, meta, i: 0, j: 1, offset: 0 }
    }

    pub fn meta(&self) -> BlockMeta { self.meta }

    /// Restarts enumeration so the next pair yielded is the one at `offset`.
    pub fn starting_at(mut self, offset: u64) -> Self {
        self.i = 0;
        self.j = 1;
        self.offset = 0;
        let target = offset.min(self.meta.emitted_pairs);
        match self.mode {
            LinkMode::Deduplicate => {
                let m = self.block.members.len();
                let mut remaining = target;
                let mut i = 0usize;
                while i + 1 < m && remaining >= (m - i - 1) as u64 {
                    remaining -= (m - i - 1) as u64;
                    i += 1;
                }
                self.i = i;
                self.j = i + 1 + remaining as usize;
                self.offset = target;
            }
            LinkMode::Link => {
                while self.offset < target {
                    if self.next().is_none() { break; }
                }
            }
        }
        self
    }

    fn advance(&mut self) {
        self.j += 1;
        if self.j >= self.block.members.len() {
            self.i += 1;
            self.j = self.i + 1;
        }
    }
}

impl<'a> Iterator for CandidatePairs<'a> {
    type Item = CandidatePair;

    fn next(&mut self) -> Option<CandidatePair> {
        let members = &self.block.members;
        while self.offset < self.meta.emitted_pairs && self.j < members.len() {
            let (a, b) = (members[self.i], members[self.j]);
            self.advance();
            if self.mode == LinkMode::Link && a.source == b.source { continue; }
            let provenance = Provenance { pass: self.block.pass, block: self.block.ordinal, offset: self.offset };
            self.offset += 1;
            return Some(CandidatePair::new(a, b, provenance));
        }
        None
    }
}
