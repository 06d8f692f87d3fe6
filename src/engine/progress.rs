use serde::Serialize;

use crate::blocking::BlockMeta;

/// Counters that advance with drained blocks. These are what a checkpoint
/// commits, so a resumed run reports totals for the whole job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub blocks_processed: u64,
    pub pairs_evaluated: u64,
    pub pairs_truncated: u64,
    pub truncated_blocks: u64,
    pub matches_found: u64,
    pub duplicates_suppressed: u64,
}

impl Counters {
    pub fn merge(&mut self, other: &Counters) {
        self.blocks_processed += other.blocks_processed;
        self.pairs_evaluated += other.pairs_evaluated;
        self.pairs_truncated += other.pairs_truncated;
        self.truncated_blocks += other.truncated_blocks;
        self.matches_found += other.matches_found;
        self.duplicates_suppressed += other.duplicates_suppressed;
    }

    /// Counters contributed by one fully drained block.
    pub fn for_block(meta: &BlockMeta, evaluated: u64, matches: u64, suppressed: u64) -> Self {
        Self {
            blocks_processed: 1,
            pairs_evaluated: evaluated,
            pairs_truncated: meta.dropped_pairs(),
            truncated_blocks: u64::from(meta.truncated),
            matches_found: matches,
            duplicates_suppressed: suppressed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub records_processed: u64,
    /// Records excluded from each pass for a missing or empty blocking field.
    pub unblockable: Vec<u64>,
    pub blocks_total: u64,
    pub counters: Counters,
    /// Mid-run checkpoint saves that failed. Non-zero means a restart may
    /// resume from an older marker than this run reached.
    pub checkpoint_save_failures: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithTruncation,
    /// Cancelled; the persisted checkpoint resumes the run.
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::CompletedWithTruncation => 0,
            RunStatus::Interrupted => 3,
            RunStatus::Failed => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub stats: RunStats,
    /// Pass/ordinal the run started from, if it resumed a checkpoint.
    pub resumed_from: Option<(usize, u64)>,
}

/// Where a run stands between stages. Each stage takes the state and returns
/// the advanced one; nothing is held in globals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    /// Pass to drain next.
    pub pass: usize,
    /// First block ordinal of `pass` not yet drained.
    pub next_block: u64,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub processed: usize,
    pub total: usize,
    pub percent: f32,
    pub eta_secs: u64,
    /// Resident memory of this process.
    pub mem_rss_mb: u64,
    pub mem_avail_mb: u64,
    pub stage: &'static str,
    pub pass: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_counters_report_truncation() {
        let meta = BlockMeta { pass: 0, ordinal: 0, members: 100, potential_pairs: 4950, emitted_pairs: 1024, truncated: true };
        let c = Counters::for_block(&meta, 1000, 3, 24);
        assert_eq!(c.pairs_truncated, 3926);
        assert_eq!(c.truncated_blocks, 1);
        let mut total = Counters::default();
        total.merge(&c);
        total.merge(&c);
        assert_eq!(total.blocks_processed, 2);
        assert_eq!(total.matches_found, 6);
    }
}
