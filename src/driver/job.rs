use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use super::{EventLoopDriver, JobError, JobReport, LoopSettings};
use crate::aggregate::AggregateStore;
use crate::collections::{CalibrationTable, TreeCollector};
use crate::config::Config;
use crate::deadline::{DeadlineMonitor, MonotonicClock};
use crate::manifest::{self, FileManifest};
use crate::partition::{self, EventRange, JobQuota};
use crate::plotters;
use crate::reader::SequentialEntryReader;
use crate::sink::JsonFileSink;

/// Batch layout of a sample: how many jobs and which range each one owns.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub manifest: FileManifest,
    pub total_events: u64,
    pub events_per_job: u64,
    pub jobs: Vec<EventRange>,
}

fn discover(cfg: &Config) -> Result<(FileManifest, u64), JobError> {
    let dir = cfg.input_dir();
    let manifest = manifest::discover(&dir, &cfg.input.tree_name)?;
    let available = manifest.total_entries();
    let total = cfg
        .events
        .max_events
        .map_or(available, |cap| cap.min(available));
    info!(
        dir = %dir.display(),
        files = manifest.len(),
        available,
        total,
        "indexed input sample",
    );
    Ok((manifest, total))
}

fn events_per_job(cfg: &Config) -> Result<u64, JobError> {
    Ok(cfg
        .events
        .per_job
        .context("events.per_job is required for batch jobs")?)
}

/// Computes the range of every batch job for the configured sample.
pub fn plan_jobs(cfg: &Config) -> Result<JobPlan, JobError> {
    let (manifest, total_events) = discover(cfg)?;
    let per_job = events_per_job(cfg)?;
    let count = partition::job_count(total_events, per_job)?;

    let jobs = (0..count)
        .map(|job_index| {
            let quota = JobQuota::Batch {
                events_per_job: per_job,
                job_index,
            };
            partition::partition(total_events, quota, &manifest).map(|p| p.range)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(JobPlan {
        manifest,
        total_events,
        events_per_job: per_job,
        jobs,
    })
}

/// Runs one job end to end: discovery, partitioning, the event loop and the flush.
///
/// `job_index` selects batch mode; without it the job reads from the first
/// entry up to `events.max_events`. A batch job's slot is charged from here,
/// so discovery, calibration and booking count against the deadline.
pub fn run_job(
    cfg: &Config,
    job_index: Option<u64>,
    clock: Arc<dyn MonotonicClock>,
) -> Result<JobReport, JobError> {
    let mut monitor = DeadlineMonitor::new(clock, cfg.budgets());
    if job_index.is_some() {
        monitor.budgets().budget(&cfg.deadline.resource_class)?;
        monitor.arm();
    }

    let (manifest, total_events) = discover(cfg)?;
    let quota = match job_index {
        Some(job_index) => JobQuota::Batch {
            events_per_job: events_per_job(cfg)?,
            job_index,
        },
        None => JobQuota::Interactive {
            max_events: cfg.events.max_events,
        },
    };

    let job = partition::partition(total_events, quota, &manifest)?;
    info!(
        job_index = ?job_index,
        range = %job.range,
        files = job.files.len(),
        "job partition",
    );
    for file in &job.files {
        info!(path = %file.path.display(), first_global = file.global_offset, "will read");
    }

    let mut reader =
        SequentialEntryReader::new(cfg.input.tree_name.clone(), job.range, Some(job.range.len()));
    reader.set_source(job.files);

    let mut collector = TreeCollector::new(cfg.collections.clone());
    if let Some(calibration) = &cfg.calibration {
        collector =
            collector.with_calibration(CalibrationTable::load(&calibration.path, &calibration.version)?);
    }
    if let Some(column) = &cfg.weight_column {
        collector = collector.with_weight_column(column.clone());
    }

    let output = cfg.output_path(job_index);
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    let store = AggregateStore::new(Box::new(JsonFileSink::new(output.clone())));

    let settings = LoopSettings {
        job_index,
        resource_class: cfg.deadline.resource_class.clone(),
        safety_margin: cfg.deadline.safety_margin,
        check_every: cfg.deadline.check_every,
    };

    let mut driver = EventLoopDriver::new(reader, Box::new(collector), store, monitor, settings);
    for plotter in plotters::build(&cfg.plotters)? {
        driver = driver.with_plotter(plotter);
    }

    let report = driver.run()?;
    info!(output = %output.display(), entries = report.entries_processed, "job output written");
    Ok(report)
}
