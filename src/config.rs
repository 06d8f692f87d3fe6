use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::engine::checkpoint::CHECKPOINT_DELIMITER;
use crate::error::ConfigError;
use crate::models::RecordStore;

pub const DEFAULT_CANDIDATE_CEILING: usize = 1024;
pub const DEFAULT_CHECKPOINT_EVERY_BLOCKS: u64 = 64;

/// Block-key transform applied to the fields of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HashFunction {
    Exact,
    Normalized,
    Prefix { len: usize },
    Soundex,
    Year,
    Digest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassConfig {
    pub fields: Vec<String>,
    pub hash: HashFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// Every pair within a block is a candidate.
    #[default]
    Deduplicate,
    /// Only pairs whose records come from different sources.
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityFunction {
    Levenshtein,
    Jaro,
    JaroWinkler,
    SorensenDice,
    EditDistance,
    NumericDifference,
    DateDifferenceDays,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Passes when score >= threshold.
    AtLeast,
    /// Passes when score <= threshold.
    AtMost,
}

impl SimilarityFunction {
    pub fn natural_direction(self) -> Direction {
        match self {
            Self::Levenshtein | Self::Jaro | Self::JaroWinkler | Self::SorensenDice => Direction::AtLeast,
            Self::EditDistance | Self::NumericDifference | Self::DateDifferenceDays => Direction::AtMost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateKind {
    Equality,
    Similarity {
        function: SimilarityFunction,
        threshold: f64,
        #[serde(default)]
        direction: Option<Direction>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateConfig {
    pub name: String,
    pub field: String,
    /// Field read from the second record when the two sources name it differently.
    #[serde(default)]
    pub other_field: Option<String>,
    #[serde(flatten)]
    pub kind: PredicateKind,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_true() -> bool { true }
fn default_weight() -> f64 { 1.0 }

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CombinationRule {
    #[default]
    AllRequired,
    Weighted { threshold: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    #[default]
    Exact,
    Approximate,
    Off,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub mode: DedupMode,
    /// Expected number of distinct pairs, sizes the bloom filter.
    pub expected_pairs: usize,
    pub false_positive_rate: f64,
}

impl Default for DedupConfig {
    fn default() -> Self { Self { mode: DedupMode::Exact, expected_pairs: 1_000_000, false_positive_rate: 0.001 } }
}

/// Type a CSV column is parsed into. Columns not listed are text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub id_column: String,
    pub date_format: String,
    pub field_types: BTreeMap<String, FieldType>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { id_column: "id".into(), date_format: "%Y-%m-%d".into(), field_types: BTreeMap::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    Never,
    #[default]
    IfPresent,
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub job: String,
    pub passes: Vec<PassConfig>,
    pub candidate_ceiling_per_block: usize,
    pub link_mode: LinkMode,
    pub predicates: Vec<PredicateConfig>,
    pub rule: CombinationRule,
    pub checkpoint_dir: Option<PathBuf>,
    pub checkpoint_every_blocks: u64,
    pub resume: ResumePolicy,
    /// Worker count; 0 picks the default pool size.
    pub parallelism: usize,
    pub dedup: DedupConfig,
    pub evict_drained_blocks: bool,
    pub ingest: IngestConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            job: "hyperblocker".into(),
            passes: Vec::new(),
            candidate_ceiling_per_block: DEFAULT_CANDIDATE_CEILING,
            link_mode: LinkMode::Deduplicate,
            predicates: Vec::new(),
            rule: CombinationRule::AllRequired,
            checkpoint_dir: None,
            checkpoint_every_blocks: DEFAULT_CHECKPOINT_EVERY_BLOCKS,
            resume: ResumePolicy::IfPresent,
            parallelism: 0,
            dedup: DedupConfig::default(),
            evict_drained_blocks: true,
            ingest: IngestConfig::default(),
        }
    }
}

fn out_of_range(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::OutOfRange { field: field.into(), reason: reason.into() }
}

impl RunConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        let cfg: RunConfig = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn pass_count(&self) -> usize { self.passes.len() }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.job.is_empty() { return Err(ConfigError::MissingField("job")); }
        if self.job.contains(CHECKPOINT_DELIMITER) || self.job.contains('\n') {
            return Err(ConfigError::DelimiterCollision { field: "job", value: self.job.clone(), delimiter: CHECKPOINT_DELIMITER });
        }
        // The job name is the checkpoint file stem
        if self.job.contains(['/', '\\']) || self.job == "." || self.job == ".." {
            return Err(out_of_range("job", "must not contain path separators or be a relative directory"));
        }
        if self.passes.is_empty() { return Err(ConfigError::MissingField("passes")); }
        for (i, pass) in self.passes.iter().enumerate() {
            if pass.fields.is_empty() { return Err(out_of_range(format!("passes[{}].fields", i), "at least one field is required")); }
            if let HashFunction::Prefix { len: 0 } = pass.hash {
                return Err(out_of_range(format!("passes[{}].hash.len", i), "prefix length must be >= 1"));
            }
        }
        if self.candidate_ceiling_per_block == 0 {
            return Err(out_of_range("candidate_ceiling_per_block", "must be >= 1"));
        }
        if self.checkpoint_every_blocks == 0 {
            return Err(out_of_range("checkpoint_every_blocks", "must be >= 1"));
        }
        if self.predicates.is_empty() { return Err(ConfigError::MissingField("predicates")); }
        let mut names = HashSet::new();
        for p in &self.predicates {
            if p.name.is_empty() { return Err(ConfigError::MissingField("predicates[].name")); }
            if !names.insert(p.name.as_str()) { return Err(ConfigError::DuplicatePredicate(p.name.clone())); }
            if p.field.is_empty() { return Err(ConfigError::MissingField("predicates[].field")); }
            if let PredicateKind::Similarity { threshold, .. } = p.kind {
                if !threshold.is_finite() {
                    return Err(ConfigError::InvalidThreshold { predicate: p.name.clone(), value: threshold });
                }
            }
            if !p.weight.is_finite() || p.weight < 0.0 {
                return Err(out_of_range(format!("predicates.{}.weight", p.name), "must be finite and >= 0"));
            }
        }
        match self.rule {
            CombinationRule::AllRequired => {
                if !self.predicates.iter().any(|p| p.required) { return Err(ConfigError::NoRequiredPredicate); }
            }
            CombinationRule::Weighted { threshold } => {
                if !threshold.is_finite() { return Err(out_of_range("rule.threshold", "must be finite")); }
            }
        }
        if self.ingest.id_column.is_empty() { return Err(ConfigError::MissingField("ingest.id_column")); }
        if self.dedup.mode == DedupMode::Approximate {
            if self.dedup.expected_pairs == 0 { return Err(out_of_range("dedup.expected_pairs", "must be >= 1")); }
            let fp = self.dedup.false_positive_rate;
            if !(fp > 0.0 && fp < 1.0) { return Err(out_of_range("dedup.false_positive_rate", "must be in (0, 1)")); }
        }
        Ok(())
    }

    /// Checks that every referenced field exists in at least one record.
    pub fn validate_against(&self, store: &RecordStore) -> Result<(), ConfigError> {
        if store.is_empty() { return Ok(()); }
        for (i, pass) in self.passes.iter().enumerate() {
            if let Some(f) = pass.fields.iter().find(|f| !store.has_field(f)) {
                return Err(ConfigError::UnknownPassField { pass: i, field: f.clone() });
            }
        }
        for p in &self.predicates {
            for f in std::iter::once(&p.field).chain(p.other_field.iter()) {
                if !store.has_field(f) {
                    return Err(ConfigError::UnknownField { predicate: p.name.clone(), field: f.clone() });
                }
            }
        }
        Ok(())
    }

    /// Digest over the settings that change which pairs are produced.
    /// A checkpoint is only resumable under the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let material = serde_json::json!({
            "passes": self.passes,
            "ceiling": self.candidate_ceiling_per_block,
            "link_mode": self.link_mode,
            "predicates": self.predicates,
            "rule": self.rule,
        });
        let hash = blake3::hash(material.to_string().as_bytes());
        hash.to_hex().as_str()[..16].to_string()
    }
}
