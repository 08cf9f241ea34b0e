//! Append-only update log, one JSON file per entry.

use crate::clock::Clock;
use crate::{TollgateError, TollgateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Collision suffixes tried before giving up.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Operation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// An apply attempt.
    Update,
    /// A restore from backup.
    Restore,
    /// A backup snapshot.
    Backup,
}

/// How the operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Completed without errors.
    Success,
    /// Completed with errors, or failed.
    Error,
    /// Refused before touching anything.
    Blocked,
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLogEntry {
    /// Operation.
    #[serde(rename = "type")]
    pub kind: LogKind,

    /// Outcome.
    pub status: LogStatus,

    /// Version installed before the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,

    /// Version installed after the operation, or the one refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,

    /// When the entry was written.
    pub timestamp: DateTime<Utc>,

    /// Files touched, relative to the tree root.
    #[serde(default)]
    pub files: Vec<String>,

    /// Error messages collected along the way.
    #[serde(default)]
    pub errors: Vec<String>,

    /// Where the update came from (directory, archive, snapshot).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl UpdateLogEntry {
    /// Start an entry stamped with the current time.
    pub fn new(kind: LogKind, status: LogStatus, clock: &dyn Clock) -> Self {
        Self {
            kind,
            status,
            previous_version: None,
            new_version: None,
            timestamp: clock.now_utc(),
            files: Vec::new(),
            errors: Vec::new(),
            source: None,
        }
    }

    /// Set both versions.
    pub fn versions(mut self, previous: impl ToString, new: impl ToString) -> Self {
        self.previous_version = Some(previous.to_string());
        self.new_version = Some(new.to_string());
        self
    }

    /// Set the source path.
    pub fn source(mut self, source: &Path) -> Self {
        self.source = Some(source.display().to_string());
        self
    }
}

/// Directory of log entries.
pub struct UpdateLog {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl UpdateLog {
    /// Open (and lazily create) a log in `dir`.
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    /// Log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Clock used to stamp entries.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Write `entry` to a new file. Existing entries are never overwritten.
    pub fn append(&self, entry: &UpdateLogEntry) -> TollgateResult<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| TollgateError::LogIo(format!("Failed to create log dir: {}", e)))?;

        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| TollgateError::LogIo(format!("Failed to serialize entry: {}", e)))?;

        let millis = entry.timestamp.timestamp_millis();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("update-{}.json", millis)
            } else {
                format!("update-{}-{}.json", millis, attempt)
            };
            let path = self.dir.join(name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(TollgateError::LogIo(format!(
                        "Failed to create {}: {}",
                        path.display(),
                        e
                    )))
                }
            };

            file.write_all(&json)
                .and_then(|_| file.sync_all())
                .map_err(|e| TollgateError::LogIo(format!("Failed to write entry: {}", e)))?;

            tracing::debug!(path = %path.display(), kind = ?entry.kind, status = ?entry.status, "Update log entry written");
            return Ok(path);
        }

        Err(TollgateError::LogIo(format!(
            "No free log file name for timestamp {}",
            millis
        )))
    }

    /// Append, logging instead of failing. Used where a log failure must
    /// not mask the outcome being logged.
    pub fn record(&self, entry: &UpdateLogEntry) {
        if let Err(e) = self.append(entry) {
            tracing::warn!(error = %e, "Failed to write update log entry");
        }
    }

    /// All readable entries, newest first. Corrupt files are skipped.
    pub fn read_all(&self) -> TollgateResult<Vec<UpdateLogEntry>> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TollgateError::LogIo(format!("Failed to read log dir: {}", e))),
        };

        let mut entries = Vec::new();
        for item in dir {
            let item =
                item.map_err(|e| TollgateError::LogIo(format!("Failed to read entry: {}", e)))?;
            let path = item.path();
            let name = item.file_name().to_string_lossy().into_owned();
            if !name.starts_with("update-") || !name.ends_with(".json") {
                continue;
            }

            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<UpdateLogEntry>(&bytes).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(entry) => entries.push((name_order(&name), entry)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt update log entry")
                }
            }
        }

        // Same-millisecond entries fall back to the collision counter in the name.
        entries.sort_by(|(ka, a), (kb, b)| b.timestamp.cmp(&a.timestamp).then(kb.cmp(ka)));
        Ok(entries.into_iter().map(|(_, entry)| entry).collect())
    }
}

/// `(millis, counter)` from `update-<millis>[-<counter>].json`. Names that do
/// not follow the pattern sort first.
fn name_order(name: &str) -> (i64, u32) {
    let stem = name
        .strip_prefix("update-")
        .and_then(|s| s.strip_suffix(".json"))
        .unwrap_or_default();
    let (millis, counter) = match stem.split_once('-') {
        Some((millis, counter)) => (millis, counter.parse().unwrap_or(0)),
        None => (stem, 0),
    };
    (millis.parse().unwrap_or(i64::MIN), counter)
}
