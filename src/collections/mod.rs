//! Materialization of per-entry records from the open tree.
//!
//! Columns are grouped into named collections by prefix: with a collection
//! `tc` using prefix `tc_`, the tree columns `tc_energy` and `tc_layer` become
//! the `energy` and `layer` columns of the `tc` collection.

pub mod calibration;

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};

use crate::config::CollectionConfig;
use crate::reader::{EntryCursor, SequentialEntryReader};
use crate::tree::Tree;

pub use calibration::CalibrationTable;

/// Objects of one kind in one entry, stored column-wise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    len: usize,
    columns: BTreeMap<String, Vec<f64>>,
    scalars: BTreeMap<String, f64>,
}

impl Collection {
    /// Builds a collection from list columns that must all hold the same number of objects.
    pub fn from_columns<'a>(columns: impl IntoIterator<Item = (&'a str, Vec<f64>)>) -> Result<Self> {
        let mut collection = Collection::default();
        let mut len = None;
        for (name, values) in columns {
            match len {
                Some(n) if n != values.len() => {
                    bail!("column {name:?} has {} objects, expected {n}", values.len())
                }
                _ => len = Some(values.len()),
            }
            collection.columns.insert(name.to_string(), values);
        }
        collection.len = len.unwrap_or(0);
        Ok(collection)
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Per-object values of a list column.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| anyhow!("no list column {name:?}"))
    }

    /// Per-entry value of a scalar column.
    pub fn scalar(&self, name: &str) -> Result<f64> {
        self.scalars
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("no scalar column {name:?}"))
    }

    /// Value of `name` for object `index`; scalar columns apply to every object.
    pub fn value(&self, name: &str, index: usize) -> Result<f64> {
        if let Some(values) = self.columns.get(name) {
            return values
                .get(index)
                .copied()
                .ok_or_else(|| anyhow!("object {index} out of range for column {name:?}"));
        }
        self.scalar(name)
    }
}

/// Everything materialized for one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub cursor: EntryCursor,
    /// Fill weight for every aggregate of this entry.
    pub weight: f64,
    pub collections: BTreeMap<String, Collection>,
}

impl EventRecord {
    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| anyhow!("collection {name:?} was not materialized"))
    }
}

/// Builds the record for the reader's current entry.
pub trait EventCollector {
    fn read(&mut self, reader: &SequentialEntryReader) -> Result<EventRecord>;
}

/// Materializes configured collections straight from tree columns.
#[derive(Debug, Clone, Default)]
pub struct TreeCollector {
    collections: Vec<CollectionConfig>,
    calibration: Option<CalibrationTable>,
    weight_column: Option<String>,
}

impl TreeCollector {
    pub fn new(collections: Vec<CollectionConfig>) -> Self {
        Self {
            collections,
            calibration: None,
            weight_column: None,
        }
    }

    pub fn with_calibration(mut self, table: CalibrationTable) -> Self {
        self.calibration = Some(table);
        self
    }

    /// Reads the fill weight from a scalar column instead of using 1.0.
    pub fn with_weight_column(mut self, column: impl Into<String>) -> Self {
        self.weight_column = Some(column.into());
        self
    }

    fn collect(&self, config: &CollectionConfig, tree: &Tree, entry: u64) -> Result<Collection> {
        let mut collection = Collection::default();
        let mut list_len: Option<(usize, String)> = None;

        for (full_name, column) in tree.columns() {
            let Some(name) = full_name.strip_prefix(config.prefix.as_str()) else {
                continue;
            };
            let values = column
                .values_at(entry)
                .ok_or_else(|| anyhow!("column {full_name} has no entry {entry}"))?;
            let scale = self
                .calibration
                .as_ref()
                .map_or(1.0, |c| c.scale(&config.name, name));

            if column.is_scalar() {
                collection.scalars.insert(name.to_string(), values[0] * scale);
                continue;
            }

            match &list_len {
                Some((len, first)) if *len != values.len() => bail!(
                    "collection {}: column {full_name} has {} objects but {first} has {len}",
                    config.name,
                    values.len()
                ),
                Some(_) => {}
                None => list_len = Some((values.len(), full_name.to_string())),
            }
            collection
                .columns
                .insert(name.to_string(), values.iter().map(|v| v * scale).collect());
        }

        if collection.columns.is_empty() && collection.scalars.is_empty() {
            bail!(
                "collection {}: no columns with prefix {:?}",
                config.name,
                config.prefix
            );
        }
        collection.len = list_len.map_or(1, |(len, _)| len);
        Ok(collection)
    }

    fn weight(&self, tree: &Tree, entry: u64) -> Result<f64> {
        let Some(name) = self.weight_column.as_deref() else {
            return Ok(1.0);
        };
        let column = tree
            .column(name)
            .ok_or_else(|| anyhow!("weight column {name:?} not in tree"))?;
        if !column.is_scalar() {
            bail!("weight column {name:?} must hold one value per entry");
        }
        let weight = column
            .values_at(entry)
            .map(|v| v[0])
            .ok_or_else(|| anyhow!("weight column {name:?} has no entry {entry}"))?;
        if !weight.is_finite() {
            bail!("weight {weight} in column {name:?} is not finite");
        }
        Ok(weight)
    }
}

impl EventCollector for TreeCollector {
    fn read(&mut self, reader: &SequentialEntryReader) -> Result<EventRecord> {
        let tree = reader
            .current_tree()
            .context("no file open while materializing an entry")?;
        let cursor = *reader.cursor();

        let mut collections = BTreeMap::new();
        for config in &self.collections {
            let collection = self
                .collect(config, tree, cursor.file_entry)
                .with_context(|| format!("materializing collection {}", config.name))?;
            collections.insert(config.name.clone(), collection);
        }

        Ok(EventRecord {
            cursor,
            weight: self.weight(tree, cursor.file_entry)?,
            collections,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::partition::{select_files, EventRange};
    use crate::manifest::{FileManifest, ManifestEntry};
    use crate::tree::{write_tree, Column};

    fn reader_for(dir: &Path, tree: Tree) -> SequentialEntryReader {
        let path = dir.join("ntuple.json");
        let entries = tree.entries();
        write_tree(&path, "Ntuple", tree).expect("write");
        let manifest = FileManifest::new(vec![ManifestEntry::new(path, entries)]);
        let range = EventRange::new(0, entries).expect("range");
        let mut reader = SequentialEntryReader::new("Ntuple", range, None);
        reader.set_source(select_files(range, &manifest));
        reader
    }

    fn tc_config() -> CollectionConfig {
        CollectionConfig {
            name: "tc".into(),
            prefix: "tc_".into(),
        }
    }

    fn tree() -> Tree {
        Tree::new(2)
            .with_column("run", Column::Scalar(vec![1.0, 1.0]))
            .with_column("weight", Column::Scalar(vec![0.5, 2.0]))
            .with_column("tc_n", Column::Scalar(vec![2.0, 1.0]))
            .with_column(
                "tc_energy",
                Column::List(vec![vec![1.0, 2.0], vec![3.0]]),
            )
            .with_column("tc_layer", Column::List(vec![vec![1.0, 7.0], vec![12.0]]))
    }

    #[test]
    fn test_collects_prefixed_columns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reader = reader_for(dir.path(), tree());
        let mut collector = TreeCollector::new(vec![tc_config()]);

        assert!(reader.advance().expect("advance"));
        let record = collector.read(&reader).expect("record");
        let tc = record.collection("tc").expect("tc");
        assert_eq!(tc.len(), 2);
        assert_eq!(tc.column("energy").expect("energy"), &[1.0, 2.0]);
        assert_eq!(tc.value("layer", 1).expect("layer"), 7.0);
        assert_eq!(tc.value("n", 1).expect("scalar broadcast"), 2.0);
        assert_eq!(record.weight, 1.0);
        assert!(record.collection("cl3d").is_err());
    }

    #[test]
    fn test_calibration_and_weight_applied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reader = reader_for(dir.path(), tree());
        let mut table = CalibrationTable {
            version: "v1".into(),
            ..CalibrationTable::default()
        };
        table
            .scales
            .entry("tc".into())
            .or_default()
            .insert("energy".into(), 2.0);
        let mut collector = TreeCollector::new(vec![tc_config()])
            .with_calibration(table)
            .with_weight_column("weight");

        assert!(reader.advance().expect("advance"));
        assert!(reader.advance().expect("advance"));
        let record = collector.read(&reader).expect("record");
        assert_eq!(record.weight, 2.0);
        assert_eq!(record.collection("tc").expect("tc").column("energy").expect("energy"), &[6.0]);
        assert_eq!(record.cursor.global_entry, 1);
    }

    #[test]
    fn test_ragged_collection_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad = Tree::new(1)
            .with_column("tc_energy", Column::List(vec![vec![1.0, 2.0]]))
            .with_column("tc_layer", Column::List(vec![vec![1.0]]));
        let mut reader = reader_for(dir.path(), bad);
        let mut collector = TreeCollector::new(vec![tc_config()]);

        assert!(reader.advance().expect("advance"));
        let err = collector.read(&reader).expect_err("ragged");
        assert!(format!("{err:#}").contains("objects"));
    }

    #[test]
    fn test_unknown_prefix_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut reader = reader_for(dir.path(), tree());
        let mut collector = TreeCollector::new(vec![CollectionConfig {
            name: "gen".into(),
            prefix: "gen_".into(),
        }]);
        assert!(reader.advance().expect("advance"));
        assert!(collector.read(&reader).is_err());
    }

    #[test]
    fn test_read_without_open_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reader = reader_for(dir.path(), tree());
        let mut collector = TreeCollector::new(vec![tc_config()]);
        assert!(collector.read(&reader).is_err());
    }
}
