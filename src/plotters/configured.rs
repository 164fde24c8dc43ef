use std::sync::Arc;

use anyhow::{bail, Context, Result};

use super::{book_histogram, Plotter};
use crate::aggregate::{Aggregate, AggregateStore, Axis, Histogram};
use crate::collections::EventRecord;
use crate::config::{HistogramConfig, HistogramKind};

/// Fills histograms declared in the job configuration, one fill per object.
pub struct ConfiguredPlotter {
    collection: String,
    configs: Vec<HistogramConfig>,
    booked: Vec<Arc<Histogram>>,
}

impl ConfiguredPlotter {
    pub fn new(collection: &str, configs: Vec<HistogramConfig>) -> Self {
        Self {
            collection: collection.to_string(),
            configs,
            booked: Vec::new(),
        }
    }
}

fn histogram(config: &HistogramConfig) -> Result<Histogram> {
    let axes = config
        .axes
        .iter()
        .map(|a| Axis::new(a.bins, a.min, a.max))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("histogram {}", config.name))?;
    let title = if config.title.is_empty() {
        &config.name
    } else {
        &config.title
    };

    let h = match (config.kind, axes.as_slice()) {
        (HistogramKind::H1, [x]) => Histogram::h1(&config.name, title, *x),
        (HistogramKind::H2, [x, y]) => Histogram::h2(&config.name, title, *x, *y),
        (HistogramKind::Profile1, [x]) => Histogram::profile1(&config.name, title, *x),
        (HistogramKind::Profile2, [x, y]) => Histogram::profile2(&config.name, title, *x, *y),
        (kind, axes) => bail!(
            "histogram {}: {kind:?} cannot be booked with {} axes",
            config.name,
            axes.len()
        ),
    };
    Ok(h)
}

impl Plotter for ConfiguredPlotter {
    fn book(&mut self, store: &mut AggregateStore) -> Result<()> {
        self.booked = self
            .configs
            .iter()
            .map(|config| book_histogram(store, histogram(config)?))
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn fill(&mut self, record: &EventRecord) -> Result<()> {
        if self.booked.len() != self.configs.len() {
            bail!("configured plotter for {} filled before booking", self.collection);
        }
        let objects = record.collection(&self.collection)?;
        let mut coords = Vec::with_capacity(3);

        for (config, h) in self.configs.iter().zip(&self.booked) {
            for i in 0..objects.len() {
                if let Some(cut) = &config.cut {
                    if !cut.accepts(objects.value(&cut.column, i)?) {
                        continue;
                    }
                }
                coords.clear();
                for column in &config.columns {
                    coords.push(objects.value(column, i)?);
                }
                h.fill(&coords, record.weight)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::collections::Collection;
    use crate::config::{AxisConfig, CutConfig};
    use crate::reader::EntryCursor;
    use crate::sink::{test_metadata, MemorySink};

    fn record(weight: f64) -> EventRecord {
        let cl3d = Collection::from_columns([
            ("pt", vec![5.0, 25.0, 45.0]),
            ("eta", vec![1.6, 2.0, 2.9]),
        ])
        .expect("columns");
        let mut collections = BTreeMap::new();
        collections.insert("cl3d".to_string(), cl3d);
        EventRecord {
            cursor: EntryCursor::default(),
            weight,
            collections,
        }
    }

    fn pt_config(cut: Option<CutConfig>) -> HistogramConfig {
        HistogramConfig {
            name: "cl3d_pt".into(),
            title: String::new(),
            kind: HistogramKind::H1,
            columns: vec!["pt".into()],
            axes: vec![AxisConfig {
                bins: 10,
                min: 0.0,
                max: 100.0,
            }],
            cut,
        }
    }

    fn flushed(plotter: &mut ConfiguredPlotter, records: &[EventRecord]) -> Vec<crate::aggregate::AggregateSnapshot> {
        let sink = MemorySink::new();
        let mut store = AggregateStore::new(Box::new(sink.clone()));
        plotter.book(&mut store).expect("book");
        for record in records {
            plotter.fill(record).expect("fill");
        }
        store.flush(&test_metadata()).expect("flush");
        sink.documents().remove(0).aggregates
    }

    #[test]
    fn test_fills_every_object_with_weight() {
        let mut plotter = ConfiguredPlotter::new("cl3d", vec![pt_config(None)]);
        let snaps = flushed(&mut plotter, &[record(1.0), record(0.5)]);
        assert_eq!(snaps[0].entries, 6);
        assert_eq!(snaps[0].integral(), 4.5);
        assert_eq!(snaps[0].title, "cl3d_pt");
    }

    #[test]
    fn test_cut_filters_objects() {
        let cut = CutConfig {
            column: "eta".into(),
            min: Some(1.5),
            max: Some(2.0),
        };
        let mut plotter = ConfiguredPlotter::new("cl3d", vec![pt_config(Some(cut))]);
        let snaps = flushed(&mut plotter, &[record(1.0)]);
        assert_eq!(snaps[0].entries, 2);
    }

    #[test]
    fn test_profile_of_pt_vs_eta() {
        let config = HistogramConfig {
            name: "cl3d_ptVeta".into(),
            title: "pt vs eta".into(),
            kind: HistogramKind::Profile1,
            columns: vec!["eta".into(), "pt".into()],
            axes: vec![AxisConfig {
                bins: 2,
                min: 1.5,
                max: 3.5,
            }],
            cut: None,
        };
        let mut plotter = ConfiguredPlotter::new("cl3d", vec![config]);
        let snaps = flushed(&mut plotter, &[record(1.0)]);
        // eta 1.6 and 2.0 share the first bin.
        assert_eq!(snaps[0].bin_mean(1), Some(15.0));
        assert_eq!(snaps[0].bin_mean(2), Some(45.0));
    }

    #[test]
    fn test_unknown_column_faults_the_fill() {
        let mut config = pt_config(None);
        config.columns = vec!["energy".into()];
        let mut plotter = ConfiguredPlotter::new("cl3d", vec![config]);
        let mut store = AggregateStore::new(Box::new(MemorySink::new()));
        plotter.book(&mut store).expect("book");
        assert!(plotter.fill(&record(1.0)).is_err());
    }
}
