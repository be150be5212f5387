//! Plain-text log file with single-generation rotation.
//!
//! Before each write the file size is checked. If the pending line would
//! take a non-empty file to or past `max_bytes`, the current file is renamed
//! to the backup path (replacing any previous backup) and a fresh file is
//! opened, so the triggering line is the first line of the new file.
//!
//! The file sink's own I/O errors are reported through `tracing` and then
//! dropped. A broken log destination never takes the agent down.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hsm_core::error::AgentError;

use crate::diagnostics::{render_fields, DiagnosticsSink, Severity};

/// Rotation threshold used by the daemon.
pub const DEFAULT_MAX_BYTES: u64 = 5_000_000;

/// Format one record as a single plain-text line, newline included.
pub fn format_plain(severity: Severity, fields: &[(&str, String)], message: &str) -> String {
    let time = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let fields = render_fields(fields);
    if fields.is_empty() {
        format!("[{time}][{}] {message}\n", severity.label())
    } else {
        format!("[{time}][{}] {message} {fields}\n", severity.label())
    }
}

/// Append-only file that rotates into one backup.
pub struct RotatingFile {
    path: PathBuf,
    backup_path: PathBuf,
    max_bytes: u64,
    // Serializes check-rotate-write so two records cannot both rotate.
    lock: Mutex<()>,
}

impl RotatingFile {
    pub fn new(path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            backup_path: backup_path.into(),
            max_bytes,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Append `line`, rotating first if it would reach the threshold.
    pub fn append(&self, line: &[u8]) -> Result<(), AgentError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        let mut file = open_append(&self.path)?;

        let size = file
            .metadata()
            .map_err(|e| AgentError::read("logger: Failed to stat log file", e))?
            .len();

        if size > 0 && size.saturating_add(line.len() as u64) >= self.max_bytes {
            drop(file);
            let _ = fs::remove_file(&self.backup_path);
            fs::rename(&self.path, &self.backup_path)
                .map_err(|e| AgentError::write("logger: Failed to rotate log file", e))?;
            file = open_append(&self.path)?;
        }

        file.write_all(line)
            .map_err(|e| AgentError::write("logger: Failed to write to log file", e))
    }
}

fn open_append(path: &Path) -> Result<File, AgentError> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| AgentError::write("logger: Failed to open log file", e))
}

/// Diagnostics sink writing plain-text lines to a [`RotatingFile`].
pub struct FileSink {
    file: RotatingFile,
}

impl FileSink {
    pub fn new(file: RotatingFile) -> Self {
        Self { file }
    }

    /// Write one record, surfacing the I/O error instead of swallowing it.
    pub fn send(&self, severity: Severity, fields: &[(&str, String)], message: &str) -> Result<(), AgentError> {
        let line = format_plain(severity, fields, message);
        self.file.append(line.as_bytes())
    }
}

impl DiagnosticsSink for FileSink {
    fn record(&self, severity: Severity, fields: &[(&str, String)], message: &str) {
        if let Err(e) = self.send(severity, fields, message) {
            tracing::error!(error = %e, path = %self.file.path().display(), "logger: File send error");
        }
    }
}
