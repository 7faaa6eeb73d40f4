//! Data Logger
//!
//! One JSON record per line, one file per connection epoch.

use chrono::Utc;
use mems_protocol::SensorSnapshot;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Log file errors
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to create log file {path}: {reason}")]
    Create { path: PathBuf, reason: String },
    #[error("Failed to write log record: {0}")]
    Write(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        LogError::Write(err.to_string())
    }
}

/// An open log file
pub struct DataLogger {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl DataLogger {
    /// Create `<directory>/<prefix><timestamp>.jsonl`
    pub fn open(directory: &Path, prefix: &str) -> Result<Self, LogError> {
        let name = format!("{}{}.jsonl", prefix, Utc::now().format("%Y%m%d-%H%M%S%.3f"));
        let path = directory.join(name);

        let create_err = |e: std::io::Error| LogError::Create {
            path: path.clone(),
            reason: e.to_string(),
        };
        fs::create_dir_all(directory).map_err(create_err)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(create_err)?;

        info!("Opened log file {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    /// Append one snapshot and flush it to disk
    pub fn append(&mut self, snapshot: &SensorSnapshot) -> Result<(), LogError> {
        serde_json::to_writer(&mut self.writer, snapshot)
            .map_err(|e| LogError::Serialization(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Flush and close, returning the number of records written
    pub fn close(mut self) -> Result<u64, LogError> {
        self.writer.flush()?;
        debug!(
            "Closed log file {} after {} records",
            self.path.display(),
            self.records
        );
        Ok(self.records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }
}
