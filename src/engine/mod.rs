//! Run orchestration: ingest records into the block index, drain every pass
//! block by block on a worker pool, evaluate candidate pairs and hand
//! `match` decisions to the sink, checkpointing as blocks complete.

pub mod checkpoint;
pub mod coordinator;
pub mod progress;
pub mod seen;

use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::blocking::{Block, BlockIndex, Blocking, Blocks, CandidatePairs, KeyGenerator};
use crate::config::{ResumePolicy, RunConfig};
use crate::error::{CheckpointError, ConfigError, EngineError};
use crate::matching::{rayon_pool, Evaluator};
use crate::metrics::{MemoryProbe, ThroughputMonitor};
use crate::models::{MatchDecision, RecordStore};

pub use checkpoint::{Checkpoint, Checkpointer, FileCheckpointer, MemoryCheckpointer, ProgressMarker};
pub use coordinator::CheckpointCoordinator;
pub use progress::{Counters, ProgressState, ProgressUpdate, RunReport, RunStats, RunStatus};
pub use seen::SeenPairs;

const THROUGHPUT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Cooperative cancellation flag shared between the caller and the workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancel: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.cancel.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.cancel.load(Ordering::Relaxed) }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything the drain workers of one run share.
struct Drain<'r, 'c, F, P> {
    store: &'r RecordStore,
    index: &'r BlockIndex,
    seen: &'r SeenPairs,
    coordinator: &'r Mutex<CheckpointCoordinator<'c>>,
    sink: &'r Mutex<F>,
    on_progress: &'r P,
    cancel: &'r CancelToken,
    monitor: &'r Mutex<ThroughputMonitor>,
    probe: &'r Mutex<MemoryProbe>,
    /// Internal stop after a worker failure; distinct from caller cancellation.
    abort: AtomicBool,
    failure: Mutex<Option<EngineError>>,
}

impl<'r, 'c, F, P> Drain<'r, 'c, F, P> {
    fn stopped(&self) -> bool { self.cancel.is_cancelled() || self.abort.load(Ordering::Relaxed) }

    fn fail(&self, e: EngineError) {
        self.abort.store(true, Ordering::SeqCst);
        let mut slot = lock(&self.failure);
        if slot.is_none() {
            log::error!("run aborted: {}", e);
            *slot = Some(e);
        }
    }
}

/// Output of a fully evaluated block: its `match` decisions and counters.
type DrainedBlock = (Vec<MatchDecision>, Counters);

pub struct Engine {
    config: RunConfig,
    keygen: KeyGenerator,
    evaluator: Evaluator,
    fingerprint: String,
}

impl Engine {
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            keygen: KeyGenerator::new(&config.passes),
            evaluator: Evaluator::new(&config.predicates, config.rule.clone()),
            fingerprint: config.fingerprint(),
            config,
        })
    }

    pub fn config(&self) -> &RunConfig { &self.config }
    pub fn fingerprint(&self) -> &str { &self.fingerprint }

    /// Runs every pass over `store`, sending `match` decisions to `sink`.
    ///
    /// Returns `Ok` with [`RunStatus::Interrupted`] when `cancel` fires; the
    /// checkpoint left behind resumes the run. Configuration, startup
    /// checkpoint, store and sink failures are errors.
    pub fn run<F, P>(
        &self,
        store: &RecordStore,
        checkpointer: Option<&mut dyn Checkpointer>,
        sink: F,
        cancel: &CancelToken,
        on_progress: P,
    ) -> Result<RunReport, EngineError>
    where
        F: FnMut(&MatchDecision) -> anyhow::Result<()> + Send,
        P: Fn(ProgressUpdate) + Sync,
    {
        self.config.validate_against(store)?;
        let marker = self.load_marker(checkpointer.as_deref())?;
        let pool = rayon_pool::build_pool(self.config.parallelism)?;
        let passes = self.keygen.pass_count();
        log::info!(
            "Job {} (config {}): {} records, {} passes, {} workers",
            self.config.job, self.fingerprint, store.len(), passes, pool.current_num_threads()
        );

        let state = ProgressState {
            pass: marker.as_ref().map(|m| m.pass).unwrap_or(0),
            next_block: 0,
            stats: RunStats { records_processed: store.len() as u64, unblockable: vec![0; passes], ..Default::default() },
        };
        let probe = Mutex::new(MemoryProbe::new());
        emit_progress(&on_progress, &probe, "blocking", 0, store.len(), 0, Instant::now(), state.pass);
        let (index, state) = self.build_index(store, &pool, state);
        let mut state = position(&index, state, marker.as_ref())?;
        let resumed_from = marker.as_ref().map(|m| (m.pass, m.ordinal));
        if let Some((pass, ordinal)) = resumed_from {
            log::info!("Resuming job {} after pass {} block {}", self.config.job, pass, ordinal);
        }

        let coordinator = Mutex::new(CheckpointCoordinator::new(
            &self.config.job,
            &self.fingerprint,
            self.config.checkpoint_every_blocks,
            checkpointer,
            marker.as_ref(),
        ));
        if marker.is_none() {
            lock(&coordinator).save_sentinel();
        }
        let seen = SeenPairs::new(&self.config.dedup);
        let sink = Mutex::new(sink);
        let monitor = Mutex::new(ThroughputMonitor::new(THROUGHPUT_LOG_INTERVAL));
        let ctx = Drain {
            store,
            index: &index,
            seen: &seen,
            coordinator: &coordinator,
            sink: &sink,
            on_progress: &on_progress,
            cancel,
            monitor: &monitor,
            probe: &probe,
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
        };

        let mut interrupted = false;
        for pass in state.pass..passes {
            let start = if pass == state.pass { state.next_block } else { 0 };
            let complete = self.drain_pass(pass, start, &ctx, &pool);
            lock(&coordinator).finish_pass();
            if ctx.abort.load(Ordering::SeqCst) { break; }
            if !complete {
                interrupted = true;
                break;
            }
            state.pass = pass + 1;
            state.next_block = 0;
        }

        if let Some(e) = lock(&ctx.failure).take() {
            return Err(e);
        }

        let (counters, save_failures) = {
            let co = lock(&coordinator);
            (co.live(), co.save_failures())
        };
        state.stats.counters = counters;
        state.stats.checkpoint_save_failures = save_failures;
        if save_failures > 0 {
            log::warn!("Job {}: {} checkpoint saves failed; the persisted checkpoint may lag this run", self.config.job, save_failures);
        }
        let status = if interrupted {
            RunStatus::Interrupted
        } else if counters.truncated_blocks > 0 {
            RunStatus::CompletedWithTruncation
        } else {
            RunStatus::Completed
        };
        let rate = lock(&monitor).overall_rate(counters.pairs_evaluated);
        log::info!(
            "Job {} {:?}: {} blocks, {} pairs evaluated ({:.0} pairs/sec), {} matches, {} duplicates suppressed, {} pairs truncated",
            self.config.job, status, counters.blocks_processed, counters.pairs_evaluated, rate,
            counters.matches_found, counters.duplicates_suppressed, counters.pairs_truncated
        );
        emit_progress(&on_progress, &probe, "done", 1, 1, 0, Instant::now(), state.pass);
        Ok(RunReport { status, stats: state.stats, resumed_from })
    }

    /// Convenience wrapper that collects `match` decisions in memory.
    pub fn run_collect(
        &self,
        store: &RecordStore,
        checkpointer: Option<&mut dyn Checkpointer>,
        cancel: &CancelToken,
    ) -> Result<(RunReport, Vec<MatchDecision>), EngineError> {
        let mut out = Vec::new();
        let report = self.run(store, checkpointer, |d: &MatchDecision| { out.push(d.clone()); Ok(()) }, cancel, |_| {})?;
        Ok((report, out))
    }

    fn load_marker(&self, checkpointer: Option<&dyn Checkpointer>) -> Result<Option<ProgressMarker>, CheckpointError> {
        if self.config.resume == ResumePolicy::Never { return Ok(None); }
        let loaded = match checkpointer {
            Some(ck) => ck.load(&self.config.job)?,
            None => None,
        };
        match loaded {
            None if self.config.resume == ResumePolicy::Required => {
                Err(CheckpointError::Missing { job: self.config.job.clone() })
            }
            None => Ok(None),
            Some(cp) if cp.fingerprint != self.fingerprint => {
                Err(CheckpointError::FingerprintMismatch { expected: self.fingerprint.clone(), found: cp.fingerprint })
            }
            Some(cp) => Ok(cp.marker),
        }
    }

    /// Computes every record's keys in parallel and fills the index for the
    /// passes still to drain.
    fn build_index(&self, store: &RecordStore, pool: &ThreadPool, mut state: ProgressState) -> (BlockIndex, ProgressState) {
        let passes = self.keygen.pass_count();
        let first = state.pass;
        let index = BlockIndex::new(passes);
        let unblockable: Vec<AtomicU64> = (0..passes).map(|_| AtomicU64::new(0)).collect();
        pool.install(|| {
            store.records().par_iter().for_each(|record| {
                for pass in first..passes {
                    match self.keygen.generate(record, pass) {
                        Blocking::Key(key) => { index.insert(pass, key, record.id); }
                        Blocking::Unblockable { .. } => { unblockable[pass].fetch_add(1, Ordering::Relaxed); }
                    }
                }
            })
        });
        state.stats.unblockable = unblockable.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        state.stats.blocks_total = (first..passes).map(|p| index.block_count(p) as u64).sum();
        for pass in first..passes {
            log::info!("Pass {}: {} blocks, {} unblockable records", pass, index.block_count(pass), state.stats.unblockable[pass]);
        }
        (index, state)
    }

    /// Drains one pass from `start`. Returns true if every block of the pass
    /// was fully drained.
    fn drain_pass<F, P>(&self, pass: usize, start: u64, ctx: &Drain<'_, '_, F, P>, pool: &ThreadPool) -> bool
    where
        F: FnMut(&MatchDecision) -> anyhow::Result<()> + Send,
        P: Fn(ProgressUpdate) + Sync,
    {
        let blocks = ctx.index.blocks_for_pass(pass);
        let total = blocks.total();
        lock(ctx.coordinator).begin_pass(pass, start);
        if start >= total { return true; }
        log::info!("Pass {}: draining blocks {}..{}", pass, start, total);
        let cursor = AtomicU64::new(start);
        let done = AtomicU64::new(start);
        let started = Instant::now();
        pool.scope(|s| {
            for _ in 0..pool.current_num_threads() {
                s.spawn(|_| self.drain_worker(pass, start, &blocks, &cursor, &done, started, ctx));
            }
        });
        done.load(Ordering::SeqCst) >= total
    }

    #[allow(clippy::too_many_arguments)]
    fn drain_worker<F, P>(
        &self,
        pass: usize,
        start: u64,
        blocks: &Blocks<'_>,
        cursor: &AtomicU64,
        done: &AtomicU64,
        started: Instant,
        ctx: &Drain<'_, '_, F, P>,
    ) where
        F: FnMut(&MatchDecision) -> anyhow::Result<()> + Send,
        P: Fn(ProgressUpdate) + Sync,
    {
        let total = blocks.total();
        let report_every = (total / 100).max(1);
        loop {
            if ctx.stopped() { return; }
            let ordinal = cursor.fetch_add(1, Ordering::Relaxed);
            let Some(key) = blocks.key_at(ordinal).cloned() else { return; };
            let Some(block) = blocks.block_at(ordinal) else {
                // Already drained and evicted
                lock(ctx.coordinator).complete(ordinal, key, Counters::default());
                done.fetch_add(1, Ordering::SeqCst);
                continue;
            };
            let (decisions, counters) = match self.drain_block(&block, ctx) {
                Ok(Some(drained)) => drained,
                Ok(None) => return,
                Err(e) => { ctx.fail(e); return; }
            };
            if let Err(e) = emit(&decisions, ctx.sink) {
                ctx.fail(e);
                return;
            }
            let live = {
                let mut co = lock(ctx.coordinator);
                co.complete(ordinal, key.clone(), counters);
                co.live()
            };
            if self.config.evict_drained_blocks {
                ctx.index.evict(pass, &key);
            }
            let n = done.fetch_add(1, Ordering::SeqCst) + 1;
            if let Ok(mut mon) = ctx.monitor.try_lock() {
                mon.check_and_log(live.pairs_evaluated, live.blocks_processed);
            }
            if n % report_every == 0 || n == total {
                emit_progress(ctx.on_progress, ctx.probe, "draining", n as usize, total as usize, n - start, started, pass);
            }
        }
    }

    /// Evaluates every candidate pair of one block. `Ok(None)` means the run
    /// was stopped mid-block and nothing from the block may be emitted.
    fn drain_block<F, P>(&self, block: &Block, ctx: &Drain<'_, '_, F, P>) -> Result<Option<DrainedBlock>, EngineError> {
        let pairs = CandidatePairs::new(block, self.config.candidate_ceiling_per_block, self.config.link_mode);
        let meta = pairs.meta();
        if meta.truncated {
            log::warn!(
                "Pass {} block {} ({} members) truncated at {} of {} candidate pairs",
                meta.pass, meta.ordinal, meta.members, meta.emitted_pairs, meta.potential_pairs
            );
        }
        let mut evaluated = 0u64;
        let mut suppressed = 0u64;
        let mut matches = Vec::new();
        for pair in pairs {
            if ctx.stopped() { return Ok(None); }
            if !ctx.seen.first_sighting(pair.key()) {
                suppressed += 1;
                continue;
            }
            let a = ctx.store.get(&pair.a).ok_or(EngineError::UnknownRecord(pair.a))?;
            let b = ctx.store.get(&pair.b).ok_or(EngineError::UnknownRecord(pair.b))?;
            let decision = self.evaluator.evaluate(&pair, a, b);
            evaluated += 1;
            if decision.is_match() { matches.push(decision); }
        }
        let counters = Counters::for_block(&meta, evaluated, matches.len() as u64, suppressed);
        Ok(Some((matches, counters)))
    }
}

/// Hands one block's decisions to the sink under its lock.
fn emit<F>(decisions: &[MatchDecision], sink: &Mutex<F>) -> Result<(), EngineError>
where F: FnMut(&MatchDecision) -> anyhow::Result<()>,
{
    if decisions.is_empty() { return Ok(()); }
    let mut sink = lock(sink);
    for d in decisions {
        (*sink)(d).map_err(EngineError::Sink)?;
    }
    Ok(())
}

/// Checks the resumed marker against the rebuilt index and positions the
/// state at the block after it.
fn position(index: &BlockIndex, mut state: ProgressState, marker: Option<&ProgressMarker>) -> Result<ProgressState, CheckpointError> {
    let Some(m) = marker else { return Ok(state); };
    let blocks = index.blocks_for_pass(m.pass);
    if blocks.key_at(m.ordinal) != Some(&m.key) {
        return Err(CheckpointError::StaleMarker { pass: m.pass, ordinal: m.ordinal });
    }
    state.pass = m.pass;
    state.next_block = m.ordinal + 1;
    Ok(state)
}

#[allow(clippy::too_many_arguments)]
fn emit_progress<P: Fn(ProgressUpdate)>(
    on_progress: &P,
    probe: &Mutex<MemoryProbe>,
    stage: &'static str,
    processed: usize,
    total: usize,
    fresh: u64,
    started: Instant,
    pass: usize,
) {
    let frac = if total == 0 { 1.0 } else { (processed as f32 / total as f32).clamp(0.0, 1.0) };
    let elapsed = started.elapsed().as_secs_f32();
    let eta_secs = if fresh > 0 && frac < 1.0 {
        let per_block = elapsed / fresh as f32;
        (per_block * total.saturating_sub(processed) as f32) as u64
    } else {
        0
    };
    let mem = lock(probe).sample();
    on_progress(ProgressUpdate {
        processed,
        total,
        percent: frac * 100.0,
        eta_secs,
        mem_rss_mb: mem.rss_mb,
        mem_avail_mb: mem.avail_mb,
        stage,
        pass,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HashFunction, PassConfig, PredicateConfig, PredicateKind, SimilarityFunction};
    use crate::models::{Record, RecordId, Value};
    use chrono::NaiveDate;

    fn person(id: i64, name: &str, dob: &str) -> Record {
        let dob = NaiveDate::parse_from_str(dob, "%Y-%m-%d").unwrap();
        Record::new(RecordId::new(0, id), vec![("name".into(), Value::from(name)), ("dob".into(), Value::from(dob))])
    }

    fn config() -> RunConfig {
        RunConfig {
            job: "unit".into(),
            passes: vec![PassConfig { fields: vec!["dob".into()], hash: HashFunction::Exact }],
            predicates: vec![
                PredicateConfig { name: "dob".into(), field: "dob".into(), other_field: None, kind: PredicateKind::Equality, required: true, weight: 1.0 },
                PredicateConfig {
                    name: "name".into(), field: "name".into(), other_field: None,
                    kind: PredicateKind::Similarity { function: SimilarityFunction::JaroWinkler, threshold: 0.85, direction: None },
                    required: true, weight: 1.0,
                },
            ],
            parallelism: 2,
            ..Default::default()
        }
    }

    fn store() -> RecordStore {
        RecordStore::from_records(vec![
            person(1, "John Smith", "1980-01-01"),
            person(2, "Jon Smith", "1980-01-01"),
            person(3, "Mary Jones", "1975-05-05"),
        ]).unwrap()
    }

    #[test]
    fn finds_the_obvious_match() {
        let engine = Engine::new(config()).unwrap();
        let (report, decisions) = engine.run_collect(&store(), None, &CancelToken::new()).unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(decisions.len(), 1);
        assert_eq!((decisions[0].a.id, decisions[0].b.id), (1, 2));
        assert_eq!(report.stats.counters.blocks_processed, 2);
        assert_eq!(report.stats.counters.pairs_evaluated, 1);
    }

    #[test]
    fn cancelled_before_start_is_interrupted() {
        let engine = Engine::new(config()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut ck = MemoryCheckpointer::new();
        let (report, decisions) = engine.run_collect(&store(), Some(&mut ck), &cancel).unwrap();
        assert_eq!(report.status, RunStatus::Interrupted);
        assert!(decisions.is_empty());
        // Only the sentinel was persisted
        let cp = ck.load("unit").unwrap().unwrap();
        assert!(cp.marker.is_none());
    }

    #[test]
    fn required_resume_without_checkpoint_fails() {
        let engine = Engine::new(RunConfig { resume: ResumePolicy::Required, ..config() }).unwrap();
        let mut ck = MemoryCheckpointer::new();
        let err = engine.run_collect(&store(), Some(&mut ck), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, EngineError::Checkpoint(CheckpointError::Missing { .. })));
    }

    #[test]
    fn fingerprint_mismatch_is_fatal() {
        let mut ck = MemoryCheckpointer::new();
        ck.save("unit", &Checkpoint { fingerprint: "0000000000000000".into(), marker: None }).unwrap();
        let engine = Engine::new(config()).unwrap();
        let err = engine.run_collect(&store(), Some(&mut ck), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, EngineError::Checkpoint(CheckpointError::FingerprintMismatch { .. })));
    }

    struct FullDisk;
    impl Checkpointer for FullDisk {
        fn save(&mut self, _job: &str, _cp: &Checkpoint) -> Result<(), CheckpointError> {
            Err(CheckpointError::Io { path: "unit.ckpt".into(), source: std::io::Error::new(std::io::ErrorKind::Other, "no space left") })
        }
        fn load(&self, _job: &str) -> Result<Option<Checkpoint>, CheckpointError> { Ok(None) }
    }

    #[test]
    fn failed_saves_are_reported_not_fatal() {
        let engine = Engine::new(RunConfig { checkpoint_every_blocks: 1, ..config() }).unwrap();
        let mut ck = FullDisk;
        let (report, decisions) = engine.run_collect(&store(), Some(&mut ck), &CancelToken::new()).unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(decisions.len(), 1);
        // Sentinel plus at least one marker save
        assert!(report.stats.checkpoint_save_failures >= 2);

        let (clean, _) = engine.run_collect(&store(), None, &CancelToken::new()).unwrap();
        assert_eq!(clean.stats.checkpoint_save_failures, 0);
    }

    #[test]
    fn marker_that_no_longer_fits_the_index_is_fatal() {
        let engine = Engine::new(config()).unwrap();
        let mut ck = MemoryCheckpointer::new();
        let marker = ProgressMarker { pass: 0, ordinal: 0, key: crate::models::BlockKey::new("not-a-date"), counters: Counters::default() };
        ck.save("unit", &Checkpoint { fingerprint: engine.fingerprint().to_string(), marker: Some(marker) }).unwrap();
        let err = engine.run_collect(&store(), Some(&mut ck), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, EngineError::Checkpoint(CheckpointError::StaleMarker { pass: 0, ordinal: 0 })));
    }

    #[test]
    fn sink_failure_fails_the_run() {
        let engine = Engine::new(config()).unwrap();
        let err = engine
            .run(&store(), None, |_: &MatchDecision| Err(anyhow::anyhow!("disk full")), &CancelToken::new(), |_| {})
            .unwrap_err();
        assert!(matches!(err, EngineError::Sink(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn progress_reports_stages() {
        let engine = Engine::new(config()).unwrap();
        let stages = Mutex::new(Vec::new());
        engine
            .run(&store(), None, |_: &MatchDecision| Ok(()), &CancelToken::new(), |u| lock(&stages).push(u.stage))
            .unwrap();
        let stages = stages.into_inner().unwrap();
        assert_eq!(stages.first(), Some(&"blocking"));
        assert!(stages.contains(&"draining"));
        assert_eq!(stages.last(), Some(&"done"));
    }
}
