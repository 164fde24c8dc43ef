use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};

use super::{book_histogram, Plotter};
use crate::aggregate::{Aggregate, AggregateStore, Axis, Histogram};
use crate::collections::EventRecord;

/// Energy-versus-eta maps split by detector layer range (inclusive bounds).
const LAYER_BANDS: [(&str, f64, f64); 4] = [
    ("L1t5", 1.0, 5.0),
    ("L6t10", 6.0, 10.0),
    ("L11t20", 11.0, 20.0),
    ("L21t60", 21.0, 60.0),
];

struct Booked {
    energy: Arc<Histogram>,
    subdet: Arc<Histogram>,
    layer_occupancy: Arc<Histogram>,
    abs_z: Arc<Histogram>,
    wafer_type: Arc<Histogram>,
    layer_v_energy: Arc<Histogram>,
    energy_v_eta: Arc<Histogram>,
    energy_v_eta_bands: Vec<Arc<Histogram>>,
    energy_p_eta_v_phi: Arc<Histogram>,
}

/// Trigger-cell distributions: energies, positions and per-layer occupancy.
pub struct TriggerCellPlotter {
    collection: String,
    label: String,
    booked: Option<Booked>,
}

impl TriggerCellPlotter {
    pub fn new(collection: &str, label: &str) -> Self {
        Self {
            collection: collection.to_string(),
            label: label.to_string(),
            booked: None,
        }
    }

    fn name(&self, suffix: &str) -> String {
        format!("{}_{}", self.label, suffix)
    }
}

impl Plotter for TriggerCellPlotter {
    fn book(&mut self, store: &mut AggregateStore) -> Result<()> {
        let cell_energy = Axis::new(100, 0.0, 2.0)?;
        let layers = Axis::new(60, 0.0, 60.0)?;
        let eta = Axis::new(100, -3.5, 3.5)?;
        let phi = Axis::new(100, -3.2, 3.2)?;

        let mut bands = Vec::with_capacity(LAYER_BANDS.len());
        for (suffix, first, last) in LAYER_BANDS {
            bands.push(book_histogram(
                store,
                Histogram::h2(
                    &self.name(&format!("energyVeta{suffix}")),
                    &format!("Energy (GeV) vs Eta (layers {first} to {last})"),
                    eta,
                    cell_energy,
                ),
            )?);
        }

        self.booked = Some(Booked {
            energy: book_histogram(
                store,
                Histogram::h1(&self.name("energy"), "TC energy (GeV)", cell_energy),
            )?,
            subdet: book_histogram(
                store,
                Histogram::h1(&self.name("subdet"), "TC subdet #", Axis::new(8, 0.0, 8.0)?),
            )?,
            layer_occupancy: book_histogram(
                store,
                Histogram::profile1(&self.name("layer"), "TC layer #", layers),
            )?,
            abs_z: book_histogram(
                store,
                Histogram::h1(&self.name("absz"), "TC z(cm)", Axis::new(100, 300.0, 500.0)?),
            )?,
            wafer_type: book_histogram(
                store,
                Histogram::h1(&self.name("wafertype"), "Wafer type", Axis::new(10, 0.0, 10.0)?),
            )?,
            layer_v_energy: book_histogram(
                store,
                Histogram::h2(
                    &self.name("layerVenergy"),
                    "Energy (GeV) vs Layer #",
                    layers,
                    cell_energy,
                ),
            )?,
            energy_v_eta: book_histogram(
                store,
                Histogram::h2(&self.name("energyVeta"), "Energy (GeV) vs Eta", eta, cell_energy),
            )?,
            energy_v_eta_bands: bands,
            energy_p_eta_v_phi: book_histogram(
                store,
                Histogram::profile2(
                    &self.name("energyPetaVphi"),
                    "Energy profile (GeV) vs Eta and Phi",
                    eta,
                    phi,
                ),
            )?,
        });
        Ok(())
    }

    fn fill(&mut self, record: &EventRecord) -> Result<()> {
        let h = self
            .booked
            .as_ref()
            .context("trigger cell plotter filled before booking")?;
        let tcs = record.collection(&self.collection)?;
        let w = record.weight;

        let energy = tcs.column("energy")?;
        let subdet = tcs.column("subdet")?;
        let layer = tcs.column("layer")?;
        let z = tcs.column("z")?;
        let wafer_type = tcs.column("wafertype")?;
        let eta = tcs.column("eta")?;
        let phi = tcs.column("phi")?;

        let mut per_layer: BTreeMap<i64, u64> = BTreeMap::new();

        for i in 0..tcs.len() {
            h.energy.fill(&[energy[i]], w)?;
            h.subdet.fill(&[subdet[i]], w)?;
            h.abs_z.fill(&[z[i].abs()], w)?;
            h.wafer_type.fill(&[wafer_type[i]], w)?;
            h.layer_v_energy.fill(&[layer[i], energy[i]], w)?;
            h.energy_v_eta.fill(&[eta[i], energy[i]], w)?;
            h.energy_p_eta_v_phi.fill(&[eta[i], phi[i], energy[i]], w)?;

            for (band, (_, first, last)) in h.energy_v_eta_bands.iter().zip(LAYER_BANDS) {
                if layer[i] >= first && layer[i] <= last {
                    band.fill(&[eta[i], energy[i]], w)?;
                }
            }

            *per_layer.entry(layer[i].round() as i64).or_default() += 1;
        }

        for (layer, count) in per_layer {
            h.layer_occupancy.fill(&[layer as f64, count as f64], w)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::collections::Collection;
    use crate::reader::EntryCursor;
    use crate::sink::MemorySink;

    fn record(tcs: Collection) -> EventRecord {
        let mut collections = BTreeMap::new();
        collections.insert("tc".to_string(), tcs);
        EventRecord {
            cursor: EntryCursor::default(),
            weight: 1.0,
            collections,
        }
    }

    fn two_cells() -> Collection {
        Collection::from_columns([
            ("energy", vec![0.5, 1.5]),
            ("subdet", vec![3.0, 3.0]),
            ("layer", vec![3.0, 3.0]),
            ("z", vec![-320.0, 330.0]),
            ("wafertype", vec![1.0, 2.0]),
            ("eta", vec![1.7, -2.1]),
            ("phi", vec![0.1, 0.2]),
        ])
        .expect("consistent columns")
    }

    #[test]
    fn test_books_every_histogram_once() {
        let mut store = AggregateStore::new(Box::new(MemorySink::new()));
        let mut plotter = TriggerCellPlotter::new("tc", "TC");
        plotter.book(&mut store).expect("book");
        assert_eq!(store.len(), 12);
    }

    #[test]
    fn test_energy_v_eta_filled_once_per_cell() {
        let sink = MemorySink::new();
        let mut store = AggregateStore::new(Box::new(sink.clone()));
        let mut plotter = TriggerCellPlotter::new("tc", "TC");
        plotter.book(&mut store).expect("book");
        plotter.fill(&record(two_cells())).expect("fill");
        store.flush(&crate::sink::test_metadata()).expect("flush");

        let docs = sink.documents();
        let doc = &docs[0];
        let get = |name: &str| {
            doc.aggregates
                .iter()
                .find(|a| a.name == name)
                .unwrap_or_else(|| panic!("{name} booked"))
        };
        assert_eq!(get("TC_energyVeta").entries, 2);
        assert_eq!(get("TC_energyVetaL1t5").entries, 2);
        assert_eq!(get("TC_energyVetaL6t10").entries, 0);
        assert_eq!(get("TC_wafertype").entries, 2);
        assert_eq!(get("TC_absz").integral(), 2.0);

        // Two cells in layer 3: one profile fill with count 2.
        let occupancy = get("TC_layer");
        assert_eq!(occupancy.entries, 1);
        assert_eq!(occupancy.bin_mean(4), Some(2.0));
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let mut store = AggregateStore::new(Box::new(MemorySink::new()));
        let mut plotter = TriggerCellPlotter::new("tc", "TC");
        plotter.book(&mut store).expect("book");
        let partial = Collection::from_columns([("energy", vec![1.0])]).expect("columns");
        assert!(plotter.fill(&record(partial)).is_err());
    }

    #[test]
    fn test_fill_before_book_fails() {
        let mut plotter = TriggerCellPlotter::new("tc", "TC");
        assert!(plotter.fill(&record(two_cells())).is_err());
    }
}
