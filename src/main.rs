use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

use hyperblocker::cli::Cli;
use hyperblocker::config::LinkMode;
use hyperblocker::engine::{CancelToken, Checkpointer, Engine, FileCheckpointer, RunReport, RunStatus};
use hyperblocker::error::{ConfigError, EngineError};
use hyperblocker::export::csv_export::CsvDecisionWriter;
use hyperblocker::ingest;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("could not render run report: {}", e),
            }
            std::process::exit(report.status.exit_code());
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(exit_code_for(&e));
        }
    }
}

/// Configuration problems exit with 2, every other failure with the failed-run code.
fn exit_code_for(e: &anyhow::Error) -> i32 {
    let config = e.chain().any(|c| {
        c.downcast_ref::<ConfigError>().is_some() || matches!(c.downcast_ref::<EngineError>(), Some(EngineError::Config(_)))
    });
    if config { 2 } else { RunStatus::Failed.exit_code() }
}

fn run(cli: &Cli) -> Result<RunReport> {
    let config = cli.to_run_config().context("loading run configuration")?;
    if cli.inputs.len() == 2 && config.link_mode == LinkMode::Deduplicate {
        info!("Two inputs with link_mode=deduplicate: pairs within each source are compared too");
    }
    let store = ingest::load_store(&cli.inputs, &config.ingest)?;
    let mut file_ck = config.checkpoint_dir.as_ref().map(FileCheckpointer::new);
    if let Some(ck) = &file_ck {
        info!("Checkpointing to {}", ck.path_for(&config.job).display());
    }
    let engine = Engine::new(config)?;

    let mut writer = CsvDecisionWriter::create(&cli.out)
        .with_context(|| format!("creating {}", cli.out.display()))?;
    let cancel = CancelToken::new();
    let report = engine.run(
        &store,
        file_ck.as_mut().map(|c| c as &mut dyn Checkpointer),
        |d| writer.write(d),
        &cancel,
        |u| {
            if u.stage == "draining" {
                info!("Pass {} {:.1}% ({} / {} blocks) eta {}s | rss {} MB, system avail {} MB",
                    u.pass, u.percent, u.processed, u.total, u.eta_secs, u.mem_rss_mb, u.mem_avail_mb);
            }
        },
    )?;
    let written = writer.written();
    writer.flush()?;
    info!("Wrote {} match decisions to {}", written, cli.out.display());
    if report.status == RunStatus::Interrupted {
        warn!("Run interrupted; rerun with the same configuration to resume");
    }
    Ok(report)
}
