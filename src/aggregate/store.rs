use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::Aggregate;
use crate::sink::{OutputSink, RunMetadata, SinkError};

/// Contract violations and output failures of the [`AggregateStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("aggregate {name} registered after the event loop started")]
    LateRegistration { name: String },

    #[error("aggregate {name} registered twice")]
    DuplicateAggregate { name: String },

    #[error("aggregates already flushed")]
    DoubleFlush,

    #[error("flushing to {sink}")]
    Sink {
        sink: String,
        #[source]
        source: SinkError,
    },
}

/// Owns every aggregate booked for a job and writes them out exactly once.
pub struct AggregateStore {
    sink: Box<dyn OutputSink>,
    registered: Vec<Arc<dyn Aggregate>>,
    names: HashSet<String>,
    sealed: bool,
    flushed: bool,
}

impl AggregateStore {
    pub fn new(sink: Box<dyn OutputSink>) -> Self {
        Self {
            sink,
            registered: Vec::new(),
            names: HashSet::new(),
            sealed: false,
            flushed: false,
        }
    }

    /// Adds an aggregate. Only allowed before the event loop starts.
    pub fn register(&mut self, aggregate: Arc<dyn Aggregate>) -> Result<(), StoreError> {
        let name = aggregate.name().to_string();
        if self.sealed {
            return Err(StoreError::LateRegistration { name });
        }
        if !self.names.insert(name.clone()) {
            return Err(StoreError::DuplicateAggregate { name });
        }
        debug!(aggregate = %name, "registered aggregate");
        self.registered.push(aggregate);
        Ok(())
    }

    /// Closes registration; called when the event loop begins.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Finalizes every aggregate in registration order and writes them to the sink.
    ///
    /// Single-shot: a second call fails with [`StoreError::DoubleFlush`], even
    /// when the first one failed part way.
    pub fn flush(&mut self, metadata: &RunMetadata) -> Result<(), StoreError> {
        if self.flushed {
            return Err(StoreError::DoubleFlush);
        }
        self.flushed = true;
        self.sealed = true;

        let sink_err = |sink: &dyn OutputSink, source| StoreError::Sink {
            sink: sink.name().to_string(),
            source,
        };

        self.sink
            .begin(metadata)
            .map_err(|e| sink_err(self.sink.as_ref(), e))?;
        for aggregate in &self.registered {
            let snapshot = aggregate.finalize();
            self.sink
                .write_aggregate(&snapshot)
                .map_err(|e| sink_err(self.sink.as_ref(), e))?;
        }
        self.sink
            .finish()
            .map_err(|e| sink_err(self.sink.as_ref(), e))?;

        info!(
            sink = self.sink.name(),
            aggregates = self.registered.len(),
            entries = metadata.entries_processed,
            "aggregates flushed",
        );
        Ok(())
    }
}

impl std::fmt::Debug for AggregateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStore")
            .field("sink", &self.sink.name())
            .field("registered", &self.registered.len())
            .field("sealed", &self.sealed)
            .field("flushed", &self.flushed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Axis, Histogram};
    use crate::sink::MemorySink;

    fn metadata() -> RunMetadata {
        crate::sink::test_metadata()
    }

    fn store_with(sink: &MemorySink) -> AggregateStore {
        let mut store = AggregateStore::new(Box::new(sink.clone()));
        store
            .register(Arc::new(Histogram::counter("events", "events")))
            .expect("register");
        store
            .register(Arc::new(Histogram::h1(
                "pt",
                "pt",
                Axis::new(10, 0.0, 100.0).expect("axis"),
            )))
            .expect("register");
        store
    }

    #[test]
    fn test_flush_with_no_entries_writes_empty_aggregates() {
        let sink = MemorySink::new();
        let mut store = store_with(&sink);
        store.flush(&metadata()).expect("flush");

        let docs = sink.documents();
        assert_eq!(docs.len(), 1);
        let names: Vec<_> = docs[0].aggregates.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["events", "pt"]);
        for snap in &docs[0].aggregates {
            assert_eq!(snap.entries, 0);
            assert_eq!(snap.integral(), 0.0);
        }
    }

    #[test]
    fn test_second_flush_fails() {
        let sink = MemorySink::new();
        let mut store = store_with(&sink);
        store.flush(&metadata()).expect("first flush");
        assert!(matches!(
            store.flush(&metadata()),
            Err(StoreError::DoubleFlush)
        ));
        assert_eq!(sink.documents().len(), 1);
    }

    #[test]
    fn test_registration_after_seal_fails() {
        let sink = MemorySink::new();
        let mut store = store_with(&sink);
        store.seal();
        let err = store
            .register(Arc::new(Histogram::counter("late", "late")))
            .expect_err("sealed");
        assert!(matches!(err, StoreError::LateRegistration { name } if name == "late"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let sink = MemorySink::new();
        let mut store = store_with(&sink);
        let err = store
            .register(Arc::new(Histogram::counter("events", "again")))
            .expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateAggregate { .. }));
    }

    #[test]
    fn test_flush_reflects_fills_through_shared_handle() {
        let sink = MemorySink::new();
        let mut store = AggregateStore::new(Box::new(sink.clone()));
        let counter = Arc::new(Histogram::counter("events", "events"));
        store.register(counter.clone()).expect("register");
        counter.fill(&[], 1.0).expect("fill");
        counter.fill(&[], 1.0).expect("fill");
        store.flush(&metadata()).expect("flush");
        assert_eq!(sink.documents()[0].aggregates[0].integral(), 2.0);
    }
}
