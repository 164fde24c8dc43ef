use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

use super::{OutputDocument, OutputSink, RunMetadata, SinkError};
use crate::aggregate::AggregateSnapshot;

/// Writes the job output as one JSON document, gzip-compressed for `.gz` paths.
///
/// Nothing touches the destination until `finish`; the document is written to
/// a sibling temporary file and renamed into place.
pub struct JsonFileSink {
    path: PathBuf,
    document: Option<OutputDocument>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".partial");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn write_document(&self, tmp: &Path, document: &OutputDocument) -> Result<(), SinkError> {
        let file = BufWriter::new(File::create(tmp).map_err(|e| self.io_err(e))?);
        if self.path.extension().is_some_and(|ext| ext == "gz") {
            let mut encoder = GzEncoder::new(file, Compression::default());
            serde_json::to_writer(&mut encoder, document)?;
            let mut file = encoder.finish().map_err(|e| self.io_err(e))?;
            file.flush().map_err(|e| self.io_err(e))?;
        } else {
            let mut file = file;
            serde_json::to_writer_pretty(&mut file, document)?;
            file.flush().map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }
}

impl OutputSink for JsonFileSink {
    fn name(&self) -> &str {
        "json"
    }

    fn begin(&mut self, metadata: &RunMetadata) -> Result<(), SinkError> {
        self.document = Some(OutputDocument {
            metadata: metadata.clone(),
            aggregates: Vec::new(),
        });
        Ok(())
    }

    fn write_aggregate(&mut self, snapshot: &AggregateSnapshot) -> Result<(), SinkError> {
        let document = self
            .document
            .as_mut()
            .ok_or(SinkError::NotStarted("json"))?;
        document.aggregates.push(snapshot.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        let document = self.document.take().ok_or(SinkError::NotStarted("json"))?;
        let tmp = self.tmp_path();

        let written = self
            .write_document(&tmp, &document)
            .and_then(|()| std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e)));
        if let Err(e) = written {
            if let Err(rm) = std::fs::remove_file(&tmp) {
                debug!(path = %tmp.display(), error = %rm, "temporary output not removed");
            }
            return Err(e);
        }

        info!(
            path = %self.path.display(),
            aggregates = document.aggregates.len(),
            "output written",
        );
        Ok(())
    }
}

/// Reads back a document written by [`JsonFileSink`].
pub fn read_document(path: &Path) -> anyhow::Result<OutputDocument> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    serde_json::from_reader(BufReader::new(reader))
        .with_context(|| format!("decoding {}", path.display()))
}
