//! Result files produced by the post-processing scripts.
//!
//! A script writes a small CSV: one header row followed by a data row whose
//! first field is the computed value. Flushing truncates the file so a failed
//! script can never leave a stale value behind for the next read.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::{AppResult, DeviceError};
use crate::hardware::capabilities::Sensors;

/// Reads and truncates result CSV files on the local filesystem.
#[derive(Clone, Debug)]
pub struct CsvSensors {
    project_dir: PathBuf,
}

impl CsvSensors {
    /// Sensors for an installation rooted at `project_dir`.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }
}

impl Sensors for CsvSensors {
    fn flush_csv(&mut self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        trace!(path = %path.display(), "flushed result file");
        Ok(())
    }

    fn read_csv_result(&self, path: &Path) -> AppResult<f64> {
        let read_error = |reason: String| DeviceError::ResultRead {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let record = reader
            .records()
            .next()
            .ok_or_else(|| read_error("no data row".to_string()))??;
        let field = record
            .get(0)
            .ok_or_else(|| read_error("data row is empty".to_string()))?;
        let value = field
            .parse::<f64>()
            .map_err(|_| read_error(format!("'{field}' is not a number")))?;

        debug!(path = %path.display(), value, "read result");
        Ok(value)
    }

    fn project_directory(&self) -> &Path {
        &self.project_dir
    }
}
