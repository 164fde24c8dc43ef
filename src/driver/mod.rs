//! The per-job event loop: read, materialize, fill, and stop in time.

pub mod job;

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::aggregate::{AggregateStore, StoreError};
use crate::collections::EventCollector;
use crate::deadline::{DeadlineError, DeadlineMonitor};
use crate::manifest::ManifestError;
use crate::partition::{EventRange, PartitionError};
use crate::plotters::Plotter;
use crate::reader::{EntryCursor, ReaderError, SequentialEntryReader};
use crate::sink::{RunMetadata, StopReason};

pub use job::{plan_jobs, run_job, JobPlan};

/// Exit status of a job whose entry processing failed.
pub const ENTRY_FAULT_EXIT_CODE: i32 = 200;

/// Fatal job errors. Each maps to a distinct process exit status.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("invalid job range")]
    InvalidRange(#[from] PartitionError),

    #[error(transparent)]
    FileOpen(#[from] ReaderError),

    #[error("indexing the input sample")]
    Discovery(#[from] ManifestError),

    #[error("processing {cursor}")]
    EntryProcessing {
        cursor: EntryCursor,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Deadline(#[from] DeadlineError),

    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}

impl JobError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidRange(_) => 2,
            Self::FileOpen(_) | Self::Discovery(ManifestError::Open { .. }) => 3,
            Self::Store(_) => 4,
            Self::EntryProcessing { .. } => ENTRY_FAULT_EXIT_CODE,
            Self::Discovery(ManifestError::ListDir { .. }) | Self::Deadline(_) | Self::Setup(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    OpenFile,
    Reading,
    Stopping,
    Done,
    Faulted,
}

/// Loop parameters that do not change during a job.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Set for batch jobs; interactive runs never consult the deadline.
    pub job_index: Option<u64>,
    pub resource_class: String,
    /// Stop once less than this much of the slot is left.
    pub safety_margin: Duration,
    /// Consult the deadline on every global entry divisible by this.
    pub check_every: u64,
}

impl LoopSettings {
    pub fn is_batch(&self) -> bool {
        self.job_index.is_some()
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            job_index: None,
            resource_class: "workday".to_string(),
            safety_margin: Duration::from_secs(5 * 60),
            check_every: 100,
        }
    }
}

/// Summary of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub range: EventRange,
    pub entries_processed: u64,
    pub last_global_entry: Option<u64>,
    pub stop_reason: StopReason,
}

/// Drives one job from the first entry of its range to the single flush.
pub struct EventLoopDriver {
    reader: SequentialEntryReader,
    collector: Box<dyn EventCollector>,
    plotters: Vec<Box<dyn Plotter>>,
    store: AggregateStore,
    monitor: DeadlineMonitor,
    settings: LoopSettings,
    state: LoopState,
}

impl EventLoopDriver {
    pub fn new(
        reader: SequentialEntryReader,
        collector: Box<dyn EventCollector>,
        store: AggregateStore,
        monitor: DeadlineMonitor,
        settings: LoopSettings,
    ) -> Self {
        Self {
            reader,
            collector,
            plotters: Vec::new(),
            store,
            monitor,
            settings,
            state: LoopState::Idle,
        }
    }

    /// Adds a plotter. Its aggregates are booked when the loop starts.
    pub fn with_plotter(mut self, plotter: Box<dyn Plotter>) -> Self {
        self.plotters.push(plotter);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn reader(&self) -> &SequentialEntryReader {
        &self.reader
    }

    pub fn store_mut(&mut self) -> &mut AggregateStore {
        &mut self.store
    }

    /// Runs the loop to completion and flushes the aggregates.
    ///
    /// A deadline stop is a success. Any failure while materializing or
    /// filling an entry aborts the job without flushing.
    pub fn run(&mut self) -> Result<JobReport, JobError> {
        if self.state != LoopState::Idle {
            return Err(JobError::Setup(anyhow::anyhow!(
                "event loop already ran (state {:?})",
                self.state
            )));
        }
        let started_at = Utc::now();

        for plotter in &mut self.plotters {
            if let Err(e) = plotter.book(&mut self.store) {
                return Err(match e.downcast::<StoreError>() {
                    Ok(store_err) => JobError::Store(store_err),
                    Err(e) => JobError::Setup(e.context("booking aggregates")),
                });
            }
        }
        self.store.seal();

        // A monitor armed at job entry keeps that start.
        if self.settings.is_batch() {
            self.monitor
                .budgets()
                .budget(&self.settings.resource_class)?;
            if !self.monitor.started() {
                self.monitor.arm();
            }
        }

        info!(
            range = %self.reader.range(),
            files = self.reader.files().len(),
            aggregates = self.store.len(),
            batch = self.settings.is_batch(),
            "starting event loop",
        );
        for (index, file) in self.reader.files().iter().enumerate() {
            debug!(index, path = %file.path.display(), entries = file.entry_count, "input file");
        }

        let stop_reason = loop {
            if !self.reader.is_open() {
                self.state = LoopState::OpenFile;
            }
            match self.reader.advance() {
                Ok(true) => self.state = LoopState::Reading,
                Ok(false) => break StopReason::Exhausted,
                Err(e) => return Err(self.fault(e.into())),
            }

            if let Err(source) = self.process_entry() {
                let cursor = *self.reader.cursor();
                return Err(self.fault(JobError::EntryProcessing { cursor, source }));
            }

            match self.deadline_reached() {
                Ok(false) => {}
                Ok(true) => {
                    self.state = LoopState::Stopping;
                    break StopReason::Deadline;
                }
                Err(e) => return Err(self.fault(e.into())),
            }
        };

        self.reader.close();
        self.state = LoopState::Done;

        let cursor = *self.reader.cursor();
        let metadata = RunMetadata {
            version: crate::VERSION.to_string(),
            job_index: self.settings.job_index,
            resource_class: self
                .settings
                .is_batch()
                .then(|| self.settings.resource_class.clone()),
            tree_name: self.reader.tree_name().to_string(),
            range_start: self.reader.range().start(),
            range_end: self.reader.range().end(),
            last_global_entry: self.reader.last_global_entry(),
            entries_processed: cursor.n_total_entries,
            stop_reason,
            files: self
                .reader
                .files()
                .iter()
                .map(|f| f.path.display().to_string())
                .collect(),
            started_at,
            finished_at: Utc::now(),
        };
        self.store.flush(&metadata)?;

        info!(
            entries = cursor.n_total_entries,
            last_global_entry = ?metadata.last_global_entry,
            ?stop_reason,
            "event loop finished",
        );

        Ok(JobReport {
            range: self.reader.range(),
            entries_processed: cursor.n_total_entries,
            last_global_entry: metadata.last_global_entry,
            stop_reason,
        })
    }

    fn process_entry(&mut self) -> anyhow::Result<()> {
        let record = self.collector.read(&self.reader)?;
        for plotter in &mut self.plotters {
            plotter.fill(&record)?;
        }
        Ok(())
    }

    /// Polls the deadline on checkpoint entries of armed batch jobs.
    fn deadline_reached(&self) -> Result<bool, DeadlineError> {
        if !self.settings.is_batch() || !self.monitor.started() {
            return Ok(false);
        }
        let cursor = self.reader.cursor();
        if cursor.global_entry % self.settings.check_every.max(1) != 0 {
            return Ok(false);
        }

        let class = self.settings.resource_class.as_str();
        let left = self.monitor.time_left(class)?;
        if !left.is_below(self.settings.safety_margin) {
            return Ok(false);
        }

        warn!(
            global_entry = cursor.global_entry,
            entries = cursor.n_total_entries,
            resource_class = class,
            time_left_secs = left.as_secs_f64(),
            percent_consumed = self.monitor.percent_consumed(class)? * 100.0,
            "not enough time left in the slot, stopping early",
        );
        Ok(true)
    }

    fn fault(&mut self, err: JobError) -> JobError {
        self.reader.close();
        self.state = LoopState::Faulted;
        error!(
            cursor = %self.reader.cursor(),
            error = &err as &(dyn std::error::Error + 'static),
            "job faulted",
        );
        err
    }
}
