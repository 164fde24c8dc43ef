//! Deadline-aware batch event processing over sharded tree files.
//!
//! A job owns a contiguous slice of the global entry range of a sample,
//! reads it file by file, fills histograms through plotters and writes them
//! out once, stopping early when its scheduler slot is about to run out.

pub mod aggregate;
pub mod collections;
pub mod config;
pub mod deadline;
pub mod driver;
pub mod manifest;
pub mod partition;
pub mod plotters;
pub mod reader;
pub mod sink;
pub mod tree;

/// Crate version recorded in every output artifact.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
