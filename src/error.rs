use thiserror::Error;

/// Errors detected while validating a run configuration. Always fatal, always
/// raised before any record is blocked.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("value out of range for {field}: {reason}")]
    OutOfRange { field: String, reason: String },
    #[error("predicate '{predicate}' references unknown field '{field}'")]
    UnknownField { predicate: String, field: String },
    #[error("pass {pass} references unknown field '{field}'")]
    UnknownPassField { pass: usize, field: String },
    #[error("duplicate predicate name '{0}'")]
    DuplicatePredicate(String),
    #[error("{field} contains the checkpoint delimiter {delimiter:?}: {value:?}")]
    DelimiterCollision { field: &'static str, value: String, delimiter: char },
    #[error("invalid threshold for predicate '{predicate}': {value}")]
    InvalidThreshold { predicate: String, value: f64 },
    #[error("rule all_required needs at least one predicate marked required")]
    NoRequiredPredicate,
    #[error("failed to read config {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Checkpoint persistence failures. Fatal at startup, warnings mid-run.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error on {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed checkpoint record at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("checkpoint for job '{job}' was required but none exists")]
    Missing { job: String },
    #[error("checkpoint fingerprint {found} does not match current configuration {expected}")]
    FingerprintMismatch { expected: String, found: String },
    #[error("checkpoint marker for pass {pass} block {ordinal} does not match the rebuilt index")]
    StaleMarker { pass: usize, ordinal: u64 },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("duplicate record id {0} in record store")]
    DuplicateRecord(crate::models::RecordId),
    #[error("record {0} referenced by a block is not in the store")]
    UnknownRecord(crate::models::RecordId),
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("decision sink failed: {0:#}")]
    Sink(anyhow::Error),
}
