use std::sync::Arc;

use anyhow::{Context, Result};

use super::{book_histogram, Plotter};
use crate::aggregate::{Aggregate, AggregateStore, Axis, Histogram};
use crate::collections::EventRecord;

/// Subdetector id of the electromagnetic endcap.
const EE_SUBDET: f64 = 3.0;

struct Booked {
    cells_per_layer: Arc<Histogram>,
    radius_v_layer: Arc<Histogram>,
}

/// Trigger-cell geometry: occupancy per layer and radial spread.
pub struct GeometryPlotter {
    collection: String,
    label: String,
    booked: Option<Booked>,
}

impl GeometryPlotter {
    pub fn new(collection: &str, label: &str) -> Self {
        Self {
            collection: collection.to_string(),
            label: label.to_string(),
            booked: None,
        }
    }
}

impl Plotter for GeometryPlotter {
    fn book(&mut self, store: &mut AggregateStore) -> Result<()> {
        let layers = Axis::new(60, 0.0, 60.0)?;
        let label = &self.label;
        self.booked = Some(Booked {
            cells_per_layer: book_histogram(
                store,
                Histogram::h1(
                    &format!("{label}_nTCsPerLayer"),
                    "# of Trigger Cells per layer",
                    layers,
                ),
            )?,
            radius_v_layer: book_histogram(
                store,
                Histogram::h2(
                    &format!("{label}_radiusVlayer"),
                    "# of cells radius vs layer",
                    layers,
                    Axis::new(200, 0.0, 200.0)?,
                ),
            )?,
        });
        Ok(())
    }

    fn fill(&mut self, record: &EventRecord) -> Result<()> {
        let h = self
            .booked
            .as_ref()
            .context("geometry plotter filled before booking")?;
        let tcs = record.collection(&self.collection)?;
        let w = record.weight;

        let subdet = tcs.column("subdet")?;
        let layer = tcs.column("layer")?;
        let radius = tcs.column("radius")?;

        for i in 0..tcs.len() {
            if subdet[i] == EE_SUBDET {
                h.cells_per_layer.fill(&[layer[i]], w)?;
            }
            h.radius_v_layer.fill(&[layer[i], radius[i]], w)?;
        }
        Ok(())
    }
}
