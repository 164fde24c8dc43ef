//! Deterministic slicing of the global event stream into per-job ranges.
//!
//! Every batch job over a sample computes the same table of ranges from the
//! same manifest, so resubmitted jobs always read exactly the entries their
//! first attempt owned.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::manifest::FileManifest;

/// Errors raised when a job's range is empty or out of bounds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("job {job_index} would start at event {start} but only {total_events} events are available")]
    JobOutOfRange {
        job_index: u64,
        start: u64,
        total_events: u64,
    },

    #[error("events per job must be positive")]
    ZeroQuota,

    #[error("nothing to process: {total_events} events available, cap {max_events:?}")]
    EmptySample {
        total_events: u64,
        max_events: Option<u64>,
    },

    #[error("invalid event range [{start}, {end})")]
    Malformed { start: u64, end: u64 },
}

/// Half-open range of global entry indices owned by one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EventRange {
    start: u64,
    end: u64,
}

impl EventRange {
    /// Builds a non-empty range; `end` must be strictly greater than `start`.
    pub fn new(start: u64, end: u64) -> Result<Self, PartitionError> {
        if end <= start {
            return Err(PartitionError::Malformed { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of entries in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// A range is never empty by construction.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, entry: u64) -> bool {
        entry >= self.start && entry < self.end
    }

    /// True when `[span_start, span_end)` shares at least one entry with this range.
    pub fn intersects(&self, span_start: u64, span_end: u64) -> bool {
        span_start < self.end && span_end > self.start
    }
}

impl std::fmt::Display for EventRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// How the total event count is divided between jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobQuota {
    /// Single interactive process reading from the first entry, optionally capped.
    Interactive { max_events: Option<u64> },
    /// One of many batch jobs, each owning `events_per_job` consecutive entries.
    Batch { events_per_job: u64, job_index: u64 },
}

impl JobQuota {
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch { .. })
    }
}

/// A manifest file that contributes at least one entry to a job's range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub entry_count: u64,
    /// Global index of the file's first entry.
    pub global_offset: u64,
}

impl SelectedFile {
    /// Global index one past the file's last entry.
    pub fn global_end(&self) -> u64 {
        self.global_offset + self.entry_count
    }
}

/// The range a job owns and the files it must open to cover it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub range: EventRange,
    pub files: Vec<SelectedFile>,
}

/// Computes the range and file subset for one job.
///
/// `total_events` is the number of events the whole campaign processes
/// (normally the manifest total, possibly capped by configuration).
pub fn partition(
    total_events: u64,
    quota: JobQuota,
    manifest: &FileManifest,
) -> Result<Partition, PartitionError> {
    let range = match quota {
        JobQuota::Interactive { max_events } => {
            let end = max_events.map_or(total_events, |cap| cap.min(total_events));
            if end == 0 {
                return Err(PartitionError::EmptySample {
                    total_events,
                    max_events,
                });
            }
            EventRange::new(0, end)?
        }
        JobQuota::Batch {
            events_per_job,
            job_index,
        } => {
            if events_per_job == 0 {
                return Err(PartitionError::ZeroQuota);
            }
            let start = job_index.saturating_mul(events_per_job);
            if start >= total_events {
                return Err(PartitionError::JobOutOfRange {
                    job_index,
                    start,
                    total_events,
                });
            }
            let end = start.saturating_add(events_per_job).min(total_events);
            EventRange::new(start, end)?
        }
    };

    Ok(Partition {
        range,
        files: select_files(range, manifest),
    })
}

/// Walks the manifest in order and keeps every file with an entry inside `range`.
pub fn select_files(range: EventRange, manifest: &FileManifest) -> Vec<SelectedFile> {
    let mut selected = Vec::new();
    let mut offset = 0u64;

    for entry in manifest.entries() {
        let span_end = offset + entry.entry_count;
        if offset >= range.end() {
            break;
        }
        if range.intersects(offset, span_end) {
            selected.push(SelectedFile {
                path: entry.path.clone(),
                entry_count: entry.entry_count,
                global_offset: offset,
            });
        }
        offset = span_end;
    }

    selected
}

/// Number of batch jobs needed to cover `total_events`.
pub fn job_count(total_events: u64, events_per_job: u64) -> Result<u64, PartitionError> {
    if events_per_job == 0 {
        return Err(PartitionError::ZeroQuota);
    }
    Ok(total_events.div_ceil(events_per_job))
}
