use std::sync::Arc;

use anyhow::{Context, Result};

use super::{book_histogram, Plotter};
use crate::aggregate::{Aggregate, AggregateStore, Histogram};
use crate::collections::EventRecord;

/// Sum of entry weights, for normalizing the other aggregates.
pub struct EventCountPlotter {
    name: String,
    counter: Option<Arc<Histogram>>,
}

impl EventCountPlotter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            counter: None,
        }
    }
}

impl Plotter for EventCountPlotter {
    fn book(&mut self, store: &mut AggregateStore) -> Result<()> {
        self.counter = Some(book_histogram(
            store,
            Histogram::counter(&self.name, "Processed entries"),
        )?);
        Ok(())
    }

    fn fill(&mut self, record: &EventRecord) -> Result<()> {
        let counter = self
            .counter
            .as_ref()
            .context("event count filled before booking")?;
        counter.fill(&[], record.weight)?;
        Ok(())
    }
}
