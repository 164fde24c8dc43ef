//! Columnar tree files.
//!
//! A tree file is a JSON document (gzip-compressed when the path ends in
//! `.gz`) holding a hierarchy of directories whose leaves are trees. A tree
//! stores one array per column; each column holds either one scalar per entry
//! or one list of values per entry (one value per reconstructed object).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while opening or decoding a tree file.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("opening {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decoding {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding {path}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: no object named {segment:?} on the way to tree {tree}")]
    NotFound {
        path: PathBuf,
        tree: String,
        segment: String,
    },

    #[error("{path}: {tree} is a directory, not a tree")]
    NotATree { path: PathBuf, tree: String },

    #[error("{path}: column {column} holds {found} entries, tree declares {expected}")]
    ColumnLength {
        path: PathBuf,
        column: String,
        expected: u64,
        found: u64,
    },
}

/// One node of the container hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Directory { children: BTreeMap<String, Node> },
    Tree(Tree),
}

/// Column storage: a scalar per entry, or a list of object values per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Scalar(Vec<f64>),
    List(Vec<Vec<f64>>),
}

impl Column {
    /// Number of entries stored in the column.
    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(v) => v.len(),
            Self::List(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of this column for one entry. Scalars yield a single value.
    pub fn values_at(&self, entry: u64) -> Option<&[f64]> {
        let idx = usize::try_from(entry).ok()?;
        match self {
            Self::Scalar(v) => v.get(idx).map(std::slice::from_ref),
            Self::List(v) => v.get(idx).map(Vec::as_slice),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }
}

/// A columnar tree with a fixed number of entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    entries: u64,
    #[serde(default)]
    columns: BTreeMap<String, Column>,
}

impl Tree {
    pub fn new(entries: u64) -> Self {
        Self {
            entries,
            columns: BTreeMap::new(),
        }
    }

    /// Adds a column, replacing any existing column with the same name.
    pub fn with_column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Columns in name order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn validate(self, path: &Path) -> Result<Self, TreeError> {
        for (name, column) in &self.columns {
            let found = column.len() as u64;
            if found != self.entries {
                return Err(TreeError::ColumnLength {
                    path: path.to_path_buf(),
                    column: name.clone(),
                    expected: self.entries,
                    found,
                });
            }
        }
        Ok(self)
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

fn read_root(path: &Path) -> Result<Node, TreeError> {
    let file = File::open(path).map_err(|source| TreeError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    serde_json::from_reader(reader).map_err(|source| TreeError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Path segments of a tree name such as `ntuplizer/Ntuple`. Empty segments are ignored.
fn segments(tree_name: &str) -> impl Iterator<Item = &str> {
    tree_name.split('/').filter(|s| !s.is_empty())
}

/// Opens `path` and returns the tree stored under `tree_name`.
///
/// The tree name is walked one directory level per `/`-separated segment.
pub fn open_tree(path: &Path, tree_name: &str) -> Result<Tree, TreeError> {
    let mut node = read_root(path)?;

    for segment in segments(tree_name) {
        node = match node {
            Node::Directory { mut children } => {
                children
                    .remove(segment)
                    .ok_or_else(|| TreeError::NotFound {
                        path: path.to_path_buf(),
                        tree: tree_name.to_string(),
                        segment: segment.to_string(),
                    })?
            }
            Node::Tree(_) => {
                return Err(TreeError::NotFound {
                    path: path.to_path_buf(),
                    tree: tree_name.to_string(),
                    segment: segment.to_string(),
                })
            }
        };
    }

    match node {
        Node::Tree(tree) => tree.validate(path),
        Node::Directory { .. } => Err(TreeError::NotATree {
            path: path.to_path_buf(),
            tree: tree_name.to_string(),
        }),
    }
}

/// Writes `tree` to `path`, nested under the directories named by `tree_name`.
pub fn write_tree(path: &Path, tree_name: &str, tree: Tree) -> Result<(), TreeError> {
    let parts: Vec<&str> = segments(tree_name).collect();
    let mut node = Node::Tree(tree);
    for segment in parts.iter().rev() {
        let mut children = BTreeMap::new();
        children.insert((*segment).to_string(), node);
        node = Node::Directory { children };
    }

    let io_err = |source| TreeError::Io {
        path: path.to_path_buf(),
        source,
    };
    let encode_err = |source| TreeError::Encode {
        path: path.to_path_buf(),
        source,
    };
    let file = BufWriter::new(File::create(path).map_err(io_err)?);

    if is_gzip(path) {
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, &node).map_err(encode_err)?;
        encoder.finish().map_err(io_err)?.flush().map_err(io_err)
    } else {
        let mut file = file;
        serde_json::to_writer(&mut file, &node).map_err(encode_err)?;
        file.flush().map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Tree {
        Tree::new(3)
            .with_column("run", Column::Scalar(vec![1.0, 1.0, 2.0]))
            .with_column(
                "tc_energy",
                Column::List(vec![vec![0.5, 1.5], vec![], vec![2.0]]),
            )
    }

    #[test]
    fn test_write_and_open_nested_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ntuple.json");
        write_tree(&path, "ntuplizer/Ntuple", sample_tree()).expect("write");

        let tree = open_tree(&path, "ntuplizer/Ntuple").expect("open");
        assert_eq!(tree.entries(), 3);
        let energy = tree.column("tc_energy").expect("column");
        assert_eq!(energy.values_at(0), Some(&[0.5, 1.5][..]));
        assert_eq!(energy.values_at(1), Some(&[][..]));
        assert_eq!(energy.values_at(3), None);
        let run = tree.column("run").expect("column");
        assert!(run.is_scalar());
        assert_eq!(run.values_at(2), Some(&[2.0][..]));
    }

    #[test]
    fn test_gzip_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ntuple.json.gz");
        write_tree(&path, "Ntuple", sample_tree()).expect("write");
        let tree = open_tree(&path, "Ntuple").expect("open");
        assert_eq!(tree, sample_tree());
    }

    #[test]
    fn test_missing_segment_reports_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ntuple.json");
        write_tree(&path, "ntuplizer/Ntuple", sample_tree()).expect("write");

        let err = open_tree(&path, "ntuplizer/Other").expect_err("missing tree");
        match err {
            TreeError::NotFound { segment, .. } => assert_eq!(segment, "Other"),
            other => panic!("unexpected error: {other}"),
        }

        let err = open_tree(&path, "ntuplizer").expect_err("directory");
        assert!(matches!(err, TreeError::NotATree { .. }));
    }

    #[test]
    fn test_column_length_mismatch_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        let tree = Tree::new(4).with_column("pt", Column::Scalar(vec![1.0, 2.0]));
        write_tree(&path, "Ntuple", tree).expect("write");

        let err = open_tree(&path, "Ntuple").expect_err("short column");
        assert!(matches!(
            err,
            TreeError::ColumnLength {
                expected: 4,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_garbage_file_is_decode_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garbage.json");
        std::fs::write(&path, b"{not json").expect("write");
        assert!(matches!(
            open_tree(&path, "Ntuple"),
            Err(TreeError::Decode { .. })
        ));
        assert!(matches!(
            open_tree(&dir.path().join("absent.json"), "Ntuple"),
            Err(TreeError::Io { .. })
        ));
    }

    #[test]
    fn test_decode_cause_printed_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("b.json");
        std::fs::write(&path, b"{ truncated").expect("write");

        let err = open_tree(&path, "Ntuple").expect_err("truncated");
        let cause = std::error::Error::source(&err)
            .expect("decode cause")
            .to_string();
        let chain = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chain.matches(cause.as_str()).count(), 1, "{chain}");
        assert!(chain.starts_with("decoding "));
    }
}
