//! Append-only database error log.
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Location of the log relative to the application root.
pub const ERROR_LOG_RELATIVE_PATH: &str = "logs/db_errors.log";

/// Writes timestamped error lines to `<root>/logs/db_errors.log` and mirrors
/// them to `tracing`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    /// Log placed under the application root `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        ErrorLog {
            path: root.as_ref().join(ERROR_LOG_RELATIVE_PATH),
        }
    }

    /// Log written to exactly `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        ErrorLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `message`. Best effort: a failed write is reported through
    /// `tracing` and otherwise ignored.
    pub fn record(&self, message: &str) {
        error!(target: "crdash::db", "{}", message);
        if let Err(e) = self.append(message) {
            warn!("Could not write database error log {}: {}", self.path.display(), e);
        }
    }

    fn append(&self, message: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message)
    }
}
