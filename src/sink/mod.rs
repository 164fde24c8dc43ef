pub mod json;
pub mod memory;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::AggregateSnapshot;

pub use json::JsonFileSink;
pub use memory::MemorySink;

/// Errors raised while writing the job output.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("writing {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding output")]
    Encode(#[from] serde_json::Error),

    #[error("sink {0} received aggregates before metadata")]
    NotStarted(&'static str),
}

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every entry of the range (or the entry cap) was processed.
    Exhausted,
    /// The job stopped early to stay inside its scheduler slot.
    Deadline,
}

/// Provenance stored alongside the aggregates of a job.
///
/// `range_*` and `last_global_entry` allow checking after the fact that no
/// two jobs processed overlapping entries and none were skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub job_index: Option<u64>,
    pub resource_class: Option<String>,
    pub tree_name: String,
    pub range_start: u64,
    pub range_end: u64,
    pub last_global_entry: Option<u64>,
    pub entries_processed: u64,
    pub stop_reason: StopReason,
    pub files: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Everything a job writes: metadata followed by aggregates in registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDocument {
    pub metadata: RunMetadata,
    pub aggregates: Vec<AggregateSnapshot>,
}

/// Destination for a job's finalized aggregates.
///
/// Called once per job: `begin`, one `write_aggregate` per aggregate, then `finish`.
pub trait OutputSink: Send {
    /// Returns the sink's name for logging.
    fn name(&self) -> &str;

    fn begin(&mut self, metadata: &RunMetadata) -> Result<(), SinkError>;

    fn write_aggregate(&mut self, snapshot: &AggregateSnapshot) -> Result<(), SinkError>;

    /// Makes the output durable.
    fn finish(&mut self) -> Result<(), SinkError>;
}

#[cfg(test)]
pub(crate) fn test_metadata() -> RunMetadata {
    RunMetadata {
        version: "test".into(),
        job_index: None,
        resource_class: None,
        tree_name: "Ntuple".into(),
        range_start: 0,
        range_end: 10,
        last_global_entry: None,
        entries_processed: 0,
        stop_reason: StopReason::Exhausted,
        files: Vec::new(),
        started_at: Utc::now(),
        finished_at: Utc::now(),
    }
}
