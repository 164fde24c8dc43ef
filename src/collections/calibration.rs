use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Multiplicative per-column scale factors, keyed by collection then column.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CalibrationTable {
    pub version: String,
    #[serde(default)]
    pub scales: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CalibrationTable {
    /// Loads a YAML table and checks it carries `expected_version`.
    pub fn load(path: &Path, expected_version: &str) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading calibration file {}", path.display()))?;
        let table: CalibrationTable = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing calibration file {}", path.display()))?;
        table.validate(expected_version)?;
        Ok(table)
    }

    fn validate(&self, expected_version: &str) -> Result<()> {
        if self.version != expected_version {
            bail!(
                "calibration version {:?} does not match requested {:?}",
                self.version,
                expected_version
            );
        }
        for (collection, columns) in &self.scales {
            for (column, scale) in columns {
                if !scale.is_finite() {
                    bail!("calibration scale for {collection}.{column} is not finite");
                }
            }
        }
        Ok(())
    }

    /// Scale for `collection.column`; 1.0 when not listed.
    pub fn scale(&self, collection: &str, column: &str) -> f64 {
        self.scales
            .get(collection)
            .and_then(|c| c.get(column))
            .copied()
            .unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
version: v2
scales:
  tc:
    energy: 1.1
"#;

    #[test]
    fn test_load_matching_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calib.yaml");
        std::fs::write(&path, TABLE).expect("write");

        let table = CalibrationTable::load(&path, "v2").expect("load");
        assert_eq!(table.scale("tc", "energy"), 1.1);
        assert_eq!(table.scale("tc", "eta"), 1.0);
        assert_eq!(table.scale("cl3d", "energy"), 1.0);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("calib.yaml");
        std::fs::write(&path, TABLE).expect("write");

        let err = CalibrationTable::load(&path, "v3").expect_err("wrong version");
        assert!(err.to_string().contains("does not match"));
    }
}
