// DME Collector - Telemetry collection
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Durable tab-delimited log of collection records
//!
//! ```text
//! Timestamp<TAB>mtuExecTXPADelayCurrentValue-0<TAB>mtuExecTXPBDelayCurrentValue-0<TAB>...
//! 2025-03-14 09:26:53.58<TAB>0<TAB>49200<TAB>...
//! ```

use crate::error::PersistError;
use dme::{CollectionRecord, MetricSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only log file
#[derive(Debug, Clone)]
pub struct DurableLog {
    path: PathBuf,
    header: Vec<String>,
}

impl DurableLog {
    /// Log at `path` with the header of `schema`
    ///
    /// Nothing is touched on disk until the first append.
    pub fn new(path: impl Into<PathBuf>, schema: &MetricSet) -> Self {
        Self {
            path: path.into(),
            header: CollectionRecord::header(schema),
        }
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the file is empty
    ///
    /// The rendered bytes go out in a single write followed by a data sync.
    pub fn append(&self, record: &CollectionRecord) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let is_empty = file.metadata().map_err(|e| self.io_error(e))?.len() == 0;

        let bytes = self.render(record, is_empty)?;
        file.write_all(&bytes).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn render(&self, record: &CollectionRecord, with_header: bool) -> Result<Vec<u8>, PersistError> {
        let row = record.row();
        if row.len() != self.header.len() {
            return Err(PersistError::Encode(format!(
                "row has {} fields, header has {}",
                row.len(),
                self.header.len()
            )));
        }

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(Vec::new());
        if with_header {
            writer
                .write_record(&self.header)
                .map_err(|e| PersistError::Encode(e.to_string()))?;
        }
        writer
            .write_record(&row)
            .map_err(|e| PersistError::Encode(e.to_string()))?;
        writer
            .into_inner()
            .map_err(|e| PersistError::Encode(e.to_string()))
    }

    fn io_error(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
