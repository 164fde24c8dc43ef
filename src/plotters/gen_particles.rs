use std::sync::Arc;

use anyhow::{Context, Result};

use super::{book_histogram, Plotter};
use crate::aggregate::{Aggregate, AggregateStore, Axis, Histogram};
use crate::collections::EventRecord;

struct Booked {
    pt: Arc<Histogram>,
    energy: Arc<Histogram>,
}

/// Transverse momentum and energy spectra of generator-level particles.
pub struct GenParticlePlotter {
    collection: String,
    label: String,
    booked: Option<Booked>,
}

impl GenParticlePlotter {
    pub fn new(collection: &str, label: &str) -> Self {
        Self {
            collection: collection.to_string(),
            label: label.to_string(),
            booked: None,
        }
    }
}

impl Plotter for GenParticlePlotter {
    fn book(&mut self, store: &mut AggregateStore) -> Result<()> {
        let spectrum = Axis::new(100, 0.0, 100.0)?;
        let label = &self.label;
        self.booked = Some(Booked {
            pt: book_histogram(
                store,
                Histogram::h1(&format!("{label}_pt"), "Gen Part Pt (GeV)", spectrum),
            )?,
            energy: book_histogram(
                store,
                Histogram::h1(&format!("{label}_energy"), "Gen Part Energy (GeV)", spectrum),
            )?,
        });
        Ok(())
    }

    fn fill(&mut self, record: &EventRecord) -> Result<()> {
        let h = self
            .booked
            .as_ref()
            .context("gen particle plotter filled before booking")?;
        let gen = record.collection(&self.collection)?;
        let w = record.weight;

        for (pt, energy) in gen.column("pt")?.iter().zip(gen.column("energy")?) {
            h.pt.fill(&[*pt], w)?;
            h.energy.fill(&[*energy], w)?;
        }
        Ok(())
    }
}
