//! Sequential iteration over the entries of a job's range across files.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::partition::{EventRange, SelectedFile};
use crate::tree::{self, Tree, TreeError};

/// Errors raised while switching to the next input file.
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("opening input file #{index} {path}")]
    FileOpen {
        index: usize,
        path: PathBuf,
        #[source]
        source: TreeError,
    },

    #[error("{path}: tree holds {found} entries but the manifest recorded {expected}")]
    EntryCountMismatch {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
}

/// Position of the reader within the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryCursor {
    /// Entry index across the whole sample.
    pub global_entry: u64,
    /// Entry index within the current file.
    pub file_entry: u64,
    /// Index of the current file within the job's file list.
    pub current_file_index: usize,
    /// Successful advances so far in this job.
    pub n_total_entries: u64,
}

impl std::fmt::Display for EntryCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "global entry {} (file #{} entry {}, {} processed)",
            self.global_entry, self.current_file_index, self.file_entry, self.n_total_entries
        )
    }
}

struct OpenFile {
    index: usize,
    path: PathBuf,
    global_offset: u64,
    tree: Tree,
    next_local: u64,
    local_end: u64,
}

/// Reads entries of one job's range, one file at a time, in manifest order.
///
/// At most one file is held open; it is released before the next is opened.
pub struct SequentialEntryReader {
    tree_name: String,
    range: EventRange,
    max_entries: Option<u64>,
    files: Vec<SelectedFile>,
    next_file: usize,
    open: Option<OpenFile>,
    cursor: EntryCursor,
    files_opened: usize,
}

impl SequentialEntryReader {
    /// Creates a reader for `range`, stopping early after `max_entries` advances if set.
    pub fn new(tree_name: impl Into<String>, range: EventRange, max_entries: Option<u64>) -> Self {
        Self {
            tree_name: tree_name.into(),
            range,
            max_entries,
            files: Vec::new(),
            next_file: 0,
            open: None,
            cursor: EntryCursor {
                global_entry: range.start(),
                ..EntryCursor::default()
            },
            files_opened: 0,
        }
    }

    /// Replaces the file list and rewinds to the start of the range.
    pub fn set_source(&mut self, files: Vec<SelectedFile>) {
        self.close();
        self.files = files;
        self.next_file = 0;
        self.files_opened = 0;
        self.cursor = EntryCursor {
            global_entry: self.range.start(),
            ..EntryCursor::default()
        };
    }

    /// Moves to the next entry. Returns `Ok(false)` once the range, the file
    /// list or the entry cap is exhausted.
    pub fn advance(&mut self) -> Result<bool, ReaderError> {
        if self
            .max_entries
            .is_some_and(|cap| self.cursor.n_total_entries >= cap)
        {
            self.close();
            return Ok(false);
        }

        loop {
            if self.open.is_none() && !self.open_next()? {
                return Ok(false);
            }

            if let Some(file) = self.open.as_mut() {
                if file.next_local < file.local_end {
                    self.cursor.file_entry = file.next_local;
                    self.cursor.global_entry = file.global_offset + file.next_local;
                    self.cursor.current_file_index = file.index;
                    self.cursor.n_total_entries += 1;
                    file.next_local += 1;
                    return Ok(true);
                }
            }

            self.close();
        }
    }

    /// Opens the next file in the list. Returns `Ok(false)` when none are left.
    fn open_next(&mut self) -> Result<bool, ReaderError> {
        let Some(selected) = self.files.get(self.next_file) else {
            return Ok(false);
        };
        let index = self.next_file;
        self.next_file += 1;

        if selected.global_offset >= self.range.end() {
            return Ok(false);
        }

        let tree = tree::open_tree(&selected.path, &self.tree_name).map_err(|source| {
            ReaderError::FileOpen {
                index,
                path: selected.path.clone(),
                source,
            }
        })?;

        if tree.entries() != selected.entry_count {
            return Err(ReaderError::EntryCountMismatch {
                path: selected.path.clone(),
                expected: selected.entry_count,
                found: tree.entries(),
            });
        }

        let local_start = self.range.start().saturating_sub(selected.global_offset);
        let local_end = (self.range.end() - selected.global_offset).min(selected.entry_count);

        info!(
            path = %selected.path.display(),
            tree = %self.tree_name,
            index,
            first_local = local_start,
            end_local = local_end,
            "opening file",
        );

        self.files_opened += 1;
        self.open = Some(OpenFile {
            index,
            path: selected.path.clone(),
            global_offset: selected.global_offset,
            tree,
            next_local: local_start,
            local_end,
        });
        Ok(true)
    }

    /// Releases the currently open file, if any.
    pub fn close(&mut self) {
        if let Some(file) = self.open.take() {
            debug!(path = %file.path.display(), "closing file");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn cursor(&self) -> &EntryCursor {
        &self.cursor
    }

    /// Tree of the currently open file.
    pub fn current_tree(&self) -> Option<&Tree> {
        self.open.as_ref().map(|f| &f.tree)
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.open.as_ref().map(|f| f.path.as_path())
    }

    pub fn range(&self) -> EventRange {
        self.range
    }

    pub fn tree_name(&self) -> &str {
        &self.tree_name
    }

    /// Files the reader walks, in order.
    pub fn files(&self) -> &[SelectedFile] {
        &self.files
    }

    /// Number of files opened since the last `set_source`.
    pub fn files_opened(&self) -> usize {
        self.files_opened
    }

    /// Global index of the last entry handed out, if any.
    pub fn last_global_entry(&self) -> Option<u64> {
        (self.cursor.n_total_entries > 0).then_some(self.cursor.global_entry)
    }
}

impl Drop for SequentialEntryReader {
    fn drop(&mut self) {
        self.close();
    }
}
