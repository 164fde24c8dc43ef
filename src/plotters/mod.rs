//! Aggregation callbacks filled once per entry.

pub mod configured;
pub mod event_count;
pub mod gen_particles;
pub mod geometry;
pub mod resolution;
pub mod trigger_cells;

use std::sync::Arc;

use anyhow::Result;

use crate::aggregate::{AggregateStore, Histogram};
use crate::collections::EventRecord;
use crate::config::PlotterConfig;

pub use configured::ConfiguredPlotter;
pub use event_count::EventCountPlotter;
pub use gen_particles::GenParticlePlotter;
pub use geometry::GeometryPlotter;
pub use resolution::ResolutionPlotter;
pub use trigger_cells::TriggerCellPlotter;

/// Books aggregates before the loop and fills them for every entry.
pub trait Plotter {
    /// Registers every aggregate the plotter fills. Called once, before the loop.
    fn book(&mut self, store: &mut AggregateStore) -> Result<()>;

    /// Fills the booked aggregates from one entry.
    fn fill(&mut self, record: &EventRecord) -> Result<()>;
}

/// Registers `histogram` and returns the handle the plotter keeps for filling.
pub(crate) fn book_histogram(
    store: &mut AggregateStore,
    histogram: Histogram,
) -> Result<Arc<Histogram>> {
    let histogram = Arc::new(histogram);
    store.register(histogram.clone())?;
    Ok(histogram)
}

/// Instantiates plotters in configuration order.
pub fn build(configs: &[PlotterConfig]) -> Result<Vec<Box<dyn Plotter>>> {
    let mut plotters: Vec<Box<dyn Plotter>> = Vec::with_capacity(configs.len());
    for config in configs {
        let plotter: Box<dyn Plotter> = match config {
            PlotterConfig::TriggerCells { collection, label } => {
                Box::new(TriggerCellPlotter::new(collection, label))
            }
            PlotterConfig::GenParticles { collection, label } => {
                Box::new(GenParticlePlotter::new(collection, label))
            }
            PlotterConfig::Histograms {
                collection,
                histograms,
            } => Box::new(ConfiguredPlotter::new(collection, histograms.clone())),
            PlotterConfig::EventCount { name } => Box::new(EventCountPlotter::new(name)),
            PlotterConfig::Resolution {
                reference,
                target,
                label,
                max_dr,
            } => Box::new(ResolutionPlotter::new(reference, target, label, *max_dr)),
            PlotterConfig::Geometry { collection, label } => {
                Box::new(GeometryPlotter::new(collection, label))
            }
        };
        plotters.push(plotter);
    }
    Ok(plotters)
}
