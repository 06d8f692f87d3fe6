use std::collections::BTreeMap;

use crate::engine::checkpoint::{Checkpoint, Checkpointer, ProgressMarker};
use crate::engine::progress::Counters;
use crate::models::BlockKey;

/// Single writer for checkpoints.
///
/// Workers finish blocks in any order. The coordinator only advances the
/// persisted marker across a contiguous prefix of completed ordinals, so a
/// resumed run never skips a block that was still in flight.
pub struct CheckpointCoordinator<'c> {
    job: String,
    fingerprint: String,
    cadence: u64,
    checkpointer: Option<&'c mut dyn Checkpointer>,
    pass: usize,
    next_expected: u64,
    pending: BTreeMap<u64, (BlockKey, Counters)>,
    committed: Counters,
    last_committed: Option<(usize, u64, BlockKey)>,
    since_save: u64,
    save_failures: u64,
}

impl<'c> CheckpointCoordinator<'c> {
    pub fn new(
        job: &str,
        fingerprint: &str,
        cadence: u64,
        checkpointer: Option<&'c mut dyn Checkpointer>,
        resumed: Option<&ProgressMarker>,
    ) -> Self {
        Self {
            job: job.to_string(),
            fingerprint: fingerprint.to_string(),
            cadence: cadence.max(1),
            checkpointer,
            pass: resumed.map(|m| m.pass).unwrap_or(0),
            next_expected: resumed.map(|m| m.ordinal + 1).unwrap_or(0),
            pending: BTreeMap::new(),
            committed: resumed.map(|m| m.counters).unwrap_or_default(),
            last_committed: resumed.map(|m| (m.pass, m.ordinal, m.key.clone())),
            since_save: 0,
            save_failures: 0,
        }
    }

    /// Persists the "nothing processed yet" sentinel for a fresh run.
    pub fn save_sentinel(&mut self) {
        let cp = Checkpoint { fingerprint: self.fingerprint.clone(), marker: None };
        self.persist(&cp);
    }

    pub fn begin_pass(&mut self, pass: usize, start: u64) {
        self.pass = pass;
        self.next_expected = start;
        self.pending.clear();
    }

    /// Reports a fully drained block. Saves once `cadence` blocks have been
    /// committed since the last save.
    pub fn complete(&mut self, ordinal: u64, key: BlockKey, counters: Counters) {
        if ordinal < self.next_expected { return; }
        self.pending.insert(ordinal, (key, counters));
        while let Some((key, counters)) = self.pending.remove(&self.next_expected) {
            self.committed.merge(&counters);
            self.last_committed = Some((self.pass, self.next_expected, key));
            self.next_expected += 1;
            self.since_save += 1;
        }
        if self.since_save >= self.cadence {
            self.save();
        }
    }

    /// Flushes the committed prefix. Called at pass boundaries and on cancellation.
    pub fn finish_pass(&mut self) {
        if self.since_save > 0 {
            self.save();
        }
    }

    /// Counters for the committed prefix only.
    pub fn committed(&self) -> Counters { self.committed }

    /// Committed counters plus blocks completed out of order past the prefix.
    pub fn live(&self) -> Counters {
        let mut c = self.committed;
        for (_, counters) in self.pending.values() { c.merge(counters); }
        c
    }

    pub fn save_failures(&self) -> u64 { self.save_failures }

    fn save(&mut self) {
        let Some((pass, ordinal, key)) = self.last_committed.clone() else { return; };
        let cp = Checkpoint {
            fingerprint: self.fingerprint.clone(),
            marker: Some(ProgressMarker { pass, ordinal, key, counters: self.committed }),
        };
        self.persist(&cp);
        self.since_save = 0;
    }

    fn persist(&mut self, cp: &Checkpoint) {
        let Some(ck) = self.checkpointer.as_deref_mut() else { return; };
        // Mid-run persistence failures are not fatal: keep draining, the next
        // save retries with a newer marker.
        if let Err(e) = ck.save(&self.job, cp) {
            self.save_failures += 1;
            log::warn!("checkpoint save failed for job {}: {}", self.job, e);
        }
    }
}
