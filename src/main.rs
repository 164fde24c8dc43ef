use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use evbatch::config::Config;
use evbatch::deadline::SystemClock;
use evbatch::driver::{self, JobError};

/// Batch event loop: fills histograms from a slice of a sample within a time slot.
#[derive(Parser)]
#[command(name = "evbatch", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Batch job index. Without it the run is interactive and never preempts itself.
    #[arg(short, long)]
    job_index: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
    /// Print the number of batch jobs and the range each one owns.
    Plan,
}

/// Build-time version info, injected via build.rs.
mod version {
    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            evbatch::VERSION,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("evbatch {}", version::full());
        return ExitCode::SUCCESS;
    }

    let result = init_tracing(&cli.log_level)
        .and_then(|()| load_config(cli.config.as_ref()))
        .map_err(JobError::Setup)
        .and_then(|cfg| match cli.command {
            Some(Command::Plan) => plan(&cfg),
            _ => run(&cfg, cli.job_index),
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.exit_code();
            let report = format!("{:#}", anyhow::Error::from(e));
            tracing::error!(error = %report, exit_code = code, "job failed");
            eprintln!("evbatch: {report}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let path = path.context("--config is required (use --help for usage)")?;
    Config::load(path).with_context(|| format!("loading config from {}", path.display()))
}

fn run(cfg: &Config, job_index: Option<u64>) -> Result<(), JobError> {
    tracing::info!(
        version = evbatch::VERSION,
        commit = version::git_commit(),
        job_index = ?job_index,
        "starting evbatch",
    );

    let report = driver::run_job(cfg, job_index, Arc::new(SystemClock::new()))?;

    tracing::info!(
        entries = report.entries_processed,
        stop_reason = ?report.stop_reason,
        "evbatch done",
    );
    Ok(())
}

fn plan(cfg: &Config) -> Result<(), JobError> {
    let plan = driver::plan_jobs(cfg)?;
    println!(
        "{} events in {} files, {} per job: {} jobs",
        plan.total_events,
        plan.manifest.len(),
        plan.events_per_job,
        plan.jobs.len()
    );
    for (index, range) in plan.jobs.iter().enumerate() {
        println!("job {index}: {range}");
    }
    Ok(())
}
