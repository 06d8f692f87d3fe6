//! Checkpoint persistence.
//!
//! A checkpoint record is one line of fields separated by
//! [`CHECKPOINT_DELIMITER`]:
//!
//! ```text
//! job fingerprint pass ordinal key_hex blocks pairs truncated_pairs truncated_blocks matches suppressed
//! ```
//!
//! "Nothing processed yet" is the record `job fingerprint <CHECKPOINT_SENTINEL>`.
//! Block keys are hex-encoded and the job name is rejected at configuration
//! time if it contains the delimiter, so no field can contain it.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::engine::progress::Counters;
use crate::error::CheckpointError;
use crate::models::BlockKey;

/// Reserved "no checkpoint" value. Pass indices and block ordinals never reach it.
pub const CHECKPOINT_SENTINEL: u64 = u64::MAX;
/// Field separator of a serialized checkpoint record.
pub const CHECKPOINT_DELIMITER: char = ' ';

/// Journal lines written before the file is compacted to its latest record.
const COMPACT_EVERY: usize = 256;

/// Last contiguous fully-drained block, plus the counters committed with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressMarker {
    pub pass: usize,
    pub ordinal: u64,
    pub key: BlockKey,
    pub counters: Counters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub fingerprint: String,
    /// `None` is the sentinel state: the run started but no block is done.
    pub marker: Option<ProgressMarker>,
}

pub trait Checkpointer: Send {
    fn save(&mut self, job: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
    /// `Ok(None)` means nothing was ever persisted for `job`.
    fn load(&self, job: &str) -> Result<Option<Checkpoint>, CheckpointError>;
}

pub fn encode(job: &str, cp: &Checkpoint) -> String {
    let d = CHECKPOINT_DELIMITER.to_string();
    match &cp.marker {
        None => [job.to_string(), cp.fingerprint.clone(), CHECKPOINT_SENTINEL.to_string()].join(&d),
        Some(m) => {
            let c = &m.counters;
            [
                job.to_string(),
                cp.fingerprint.clone(),
                m.pass.to_string(),
                m.ordinal.to_string(),
                m.key.to_hex(),
                c.blocks_processed.to_string(),
                c.pairs_evaluated.to_string(),
                c.pairs_truncated.to_string(),
                c.truncated_blocks.to_string(),
                c.matches_found.to_string(),
                c.duplicates_suppressed.to_string(),
            ]
            .join(&d)
        }
    }
}

pub fn decode(job: &str, line: &str, line_no: usize) -> Result<Checkpoint, CheckpointError> {
    let bad = |reason: &str| CheckpointError::Malformed { line: line_no, reason: reason.to_string() };
    let fields: Vec<&str> = line.split(CHECKPOINT_DELIMITER).collect();
    if fields.len() < 3 { return Err(bad("too few fields")); }
    if fields[0] != job { return Err(bad("record belongs to another job")); }
    let fingerprint = fields[1].to_string();
    let num = |i: usize| -> Result<u64, CheckpointError> {
        fields.get(i).and_then(|s| s.parse::<u64>().ok()).ok_or_else(|| bad("expected an unsigned integer"))
    };
    let pass = num(2)?;
    if pass == CHECKPOINT_SENTINEL {
        if fields.len() != 3 { return Err(bad("sentinel record carries extra fields")); }
        return Ok(Checkpoint { fingerprint, marker: None });
    }
    if fields.len() != 11 { return Err(bad("expected 11 fields")); }
    let key = BlockKey::from_hex(fields[4]).ok_or_else(|| bad("block key is not valid hex"))?;
    let counters = Counters {
        blocks_processed: num(5)?,
        pairs_evaluated: num(6)?,
        pairs_truncated: num(7)?,
        truncated_blocks: num(8)?,
        matches_found: num(9)?,
        duplicates_suppressed: num(10)?,
    };
    Ok(Checkpoint {
        fingerprint,
        marker: Some(ProgressMarker { pass: pass as usize, ordinal: num(3)?, key, counters }),
    })
}

/// Append-only journal under `<dir>/<job>.ckpt`, compacted periodically.
pub struct FileCheckpointer {
    dir: PathBuf,
    appended: usize,
}

impl FileCheckpointer {
    pub fn new(dir: impl AsRef<Path>) -> Self { Self { dir: dir.as_ref().to_path_buf(), appended: 0 } }

    pub fn path_for(&self, job: &str) -> PathBuf { self.dir.join(format!("{}.ckpt", job)) }

    fn compact(&mut self, job: &str, line: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(job);
        let tmp = self.dir.join(format!("{}.ckpt.tmp", job));
        {
            let mut f = fs::File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
            writeln!(f, "{}", line).map_err(|e| io_err(&tmp, e))?;
            f.sync_all().map_err(|e| io_err(&tmp, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        self.appended = 0;
        Ok(())
    }
}

fn io_err(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io { path: path.display().to_string(), source }
}

impl Checkpointer for FileCheckpointer {
    fn save(&mut self, job: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let line = encode(job, checkpoint);
        if self.appended >= COMPACT_EVERY {
            return self.compact(job, &line);
        }
        let path = self.path_for(job);
        let mut f = OpenOptions::new().create(true).append(true).open(&path).map_err(|e| io_err(&path, e))?;
        writeln!(f, "{}", line).map_err(|e| io_err(&path, e))?;
        f.sync_data().map_err(|e| io_err(&path, e))?;
        self.appended += 1;
        Ok(())
    }

    fn load(&self, job: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(job);
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        let complete = raw.ends_with('\n');
        let lines: Vec<&str> = raw.lines().collect();
        let mut last = None;
        for (i, line) in lines.iter().enumerate() {
            match decode(job, line, i + 1) {
                Ok(cp) => last = Some(cp),
                // A crash mid-append can leave one torn trailing line
                Err(e) if i + 1 == lines.len() && !complete && last.is_some() => {
                    log::warn!("ignoring torn trailing checkpoint record in {}: {}", path.display(), e);
                }
                Err(e) => return Err(e),
            }
        }
        match last {
            Some(cp) => Ok(Some(cp)),
            None => Err(CheckpointError::Malformed { line: 0, reason: format!("{} holds no checkpoint record", path.display()) }),
        }
    }
}

/// In-process checkpoint store, for tests and embedders that persist elsewhere.
#[derive(Debug, Default, Clone)]
pub struct MemoryCheckpointer {
    records: HashMap<String, Vec<String>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self { Self::default() }

    /// Every serialized record saved for `job`, oldest first.
    pub fn history(&self, job: &str) -> &[String] {
        self.records.get(job).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl Checkpointer for MemoryCheckpointer {
    fn save(&mut self, job: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.records.entry(job.to_string()).or_default().push(encode(job, checkpoint));
        Ok(())
    }

    fn load(&self, job: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        match self.records.get(job).and_then(|v| v.last().map(|l| (v.len(), l))) {
            Some((n, line)) => decode(job, line, n).map(Some),
            None => Ok(None),
        }
    }
}
