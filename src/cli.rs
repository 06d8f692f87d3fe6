use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::{ResumePolicy, RunConfig};
use crate::error::ConfigError;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, ValueEnum, Debug)]
pub enum ResumeOpt { Never, IfPresent, Required }

impl ResumeOpt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::IfPresent => "if-present",
            Self::Required => "required",
        }
    }
}

impl std::fmt::Display for ResumeOpt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ResumeOpt> for ResumePolicy {
    fn from(o: ResumeOpt) -> Self {
        match o {
            ResumeOpt::Never => ResumePolicy::Never,
            ResumeOpt::IfPresent => ResumePolicy::IfPresent,
            ResumeOpt::Required => ResumePolicy::Required,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "hyperblocker", version, about = "Multi-pass blocking and candidate matching (CLI)", disable_help_subcommand = true)]
pub struct Cli {
    /// Run configuration JSON (env: HYPERBLOCKER_CONFIG)
    #[arg(long, short = 'c', value_name = "FILE", env = "HYPERBLOCKER_CONFIG")]
    pub config: PathBuf,
    /// One CSV to deduplicate, or two CSVs to link
    #[arg(long = "input", short = 'i', value_name = "CSV", required = true, num_args = 1..=2)]
    pub inputs: Vec<PathBuf>,
    /// Output CSV for match decisions (env: HYPERBLOCKER_OUT)
    #[arg(long, short = 'o', value_name = "CSV", env = "HYPERBLOCKER_OUT")]
    pub out: PathBuf,
    /// Checkpoint directory, overrides the config (env: HYPERBLOCKER_CHECKPOINT_DIR)
    #[arg(long, value_name = "DIR", env = "HYPERBLOCKER_CHECKPOINT_DIR")]
    pub checkpoint_dir: Option<PathBuf>,
    /// Job name, overrides the config (env: HYPERBLOCKER_JOB)
    #[arg(long, env = "HYPERBLOCKER_JOB")]
    pub job: Option<String>,
    /// Worker threads, 0 for auto (env: HYPERBLOCKER_THREADS)
    #[arg(long, env = "HYPERBLOCKER_THREADS")]
    pub threads: Option<usize>,
    /// Candidate pair ceiling per block (env: HYPERBLOCKER_CEILING)
    #[arg(long, env = "HYPERBLOCKER_CEILING")]
    pub ceiling: Option<usize>,
    /// Checkpoint resume policy (env: HYPERBLOCKER_RESUME)
    #[arg(long, value_enum, env = "HYPERBLOCKER_RESUME")]
    pub resume: Option<ResumeOpt>,
}

impl Cli {
    /// Loads the JSON config, applies command-line overrides and validates.
    pub fn to_run_config(&self) -> Result<RunConfig, ConfigError> {
        let mut cfg = RunConfig::from_json_file(&self.config)?;
        self.apply_overrides(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides(&self, cfg: &mut RunConfig) {
        if let Some(dir) = &self.checkpoint_dir { cfg.checkpoint_dir = Some(dir.clone()); }
        if let Some(job) = &self.job { cfg.job = job.clone(); }
        if let Some(t) = self.threads { cfg.parallelism = t; }
        if let Some(c) = self.ceiling { cfg.candidate_ceiling_per_block = c; }
        if let Some(r) = self.resume { cfg.resume = r.into(); }
    }
}
