//! CSV run log: one row per executed run, append-only.
//!
//! The file starts with a UTF-8 byte order mark so spreadsheet tools open the
//! Arabic identity columns correctly. Every append is a single write followed
//! by `sync_data`, so an abrupt termination loses at most the row in flight.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::RunRecord;

/// Column order of the run log. Stable across versions.
pub const HEADER: [&str; 17] = [
    "timestamp",
    "download_mbps",
    "upload_mbps",
    "ping_ms",
    "server",
    "ip",
    "device",
    "school_code",
    "sector",
    "school_name",
    "provider",
    "line_number",
    "service_type",
    "schedule_label",
    "submit_status",
    "used_mapping",
    "used_hidden",
];

const BOM: &str = "\u{feff}";

#[derive(Debug, thiserror::Error)]
pub enum RunLogError {
    #[error("run log I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only destination for run records.
pub trait ResultSink: Send + Sync {
    fn append(&self, record: &RunRecord) -> Result<(), RunLogError>;
}

/// CSV file sink.
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// Open or create the run log, writing the header when the file is new
    /// or empty. Safe to call on every start.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RunLogError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| RunLogError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        let len = file.metadata().map_err(io_err)?.len();
        if len == 0 {
            let header = format!("{BOM}{}\r\n", HEADER.join(","));
            file.write_all(header.as_bytes()).map_err(io_err)?;
            file.sync_data().map_err(io_err)?;
            info!(path = %path.display(), "Created run log");
        } else {
            debug!(path = %path.display(), size_bytes = len, "Opened existing run log");
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for RunLog {
    fn append(&self, record: &RunRecord) -> Result<(), RunLogError> {
        let io_err = |source| RunLogError::Io {
            path: self.path.clone(),
            source,
        };

        let line = csv_line(&record.columns());
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)?;

        debug!(label = %record.schedule_label, outcome = %record.outcome, "Run recorded");
        Ok(())
    }
}

/// Join fields into one CRLF-terminated CSV row.
pub fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

/// Quote a field when it contains a delimiter, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
