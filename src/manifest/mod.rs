//! Ordered list of input files and their entry counts.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::tree::{self, TreeError};

/// Errors raised while indexing the input sample.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("listing input directory {dir}")]
    ListDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("counting entries of {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: TreeError,
    },
}

/// One input file and the number of entries its tree holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub entry_count: u64,
}

impl ManifestEntry {
    pub fn new(path: impl Into<PathBuf>, entry_count: u64) -> Self {
        Self {
            path: path.into(),
            entry_count,
        }
    }
}

/// Ordered input files. The order defines the global entry numbering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    entries: Vec<ManifestEntry>,
}

impl FileManifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entries over all files.
    pub fn total_entries(&self) -> u64 {
        self.entries.iter().map(|e| e.entry_count).sum()
    }
}

/// True for file names the discovery step treats as tree files.
fn is_tree_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".json") || name.ends_with(".json.gz")
}

/// Lists tree files in `dir`, sorted by path, and counts the entries of `tree_name` in each.
///
/// Sorting by path keeps the manifest, and therefore every job's range, stable
/// across resubmissions regardless of directory iteration order.
pub fn discover(dir: &Path, tree_name: &str) -> Result<FileManifest, ManifestError> {
    let list_err = |source: std::io::Error| ManifestError::ListDir {
        dir: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        let path = entry.path();
        if path.is_file() && is_tree_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let tree = match tree::open_tree(&path, tree_name) {
            Ok(tree) => tree,
            Err(source) => return Err(ManifestError::Open { path, source }),
        };
        debug!(path = %path.display(), entries = tree.entries(), "indexed input file");
        entries.push(ManifestEntry::new(path, tree.entries()));
    }

    Ok(FileManifest::new(entries))
}
