use std::sync::Arc;

use super::{OutputDocument, OutputSink, RunMetadata, SinkError};
use crate::aggregate::AggregateSnapshot;

/// Keeps finished documents in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pending: Option<OutputDocument>,
    finished: Arc<parking_lot::Mutex<Vec<OutputDocument>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents completed so far, in finish order.
    pub fn documents(&self) -> Vec<OutputDocument> {
        self.finished.lock().clone()
    }
}

impl OutputSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn begin(&mut self, metadata: &RunMetadata) -> Result<(), SinkError> {
        self.pending = Some(OutputDocument {
            metadata: metadata.clone(),
            aggregates: Vec::new(),
        });
        Ok(())
    }

    fn write_aggregate(&mut self, snapshot: &AggregateSnapshot) -> Result<(), SinkError> {
        self.pending
            .as_mut()
            .ok_or(SinkError::NotStarted("memory"))?
            .aggregates
            .push(snapshot.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let document = self.pending.take().ok_or(SinkError::NotStarted("memory"))?;
        self.finished.lock().push(document);
        Ok(())
    }
}
