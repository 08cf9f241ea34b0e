//! Backup, apply and restore of the installed file tree.
//!
//! The engine owns the "never move backwards" rule: `apply_update` refuses a
//! candidate that is not strictly newer than the installed version, whatever
//! the caller checked beforehand. The version is read from the update files
//! themselves; a caller's claim alone is not enough.

use crate::clock::Clock;
use crate::fsutil::{self, FileError};
use crate::update::installed::{payload_version, stamp_version_file, DEFAULT_VERSION_FILE};
use crate::update::log::{LogKind, LogStatus, UpdateLog, UpdateLogEntry};
use crate::version::Version;
use crate::{TollgateError, TollgateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SNAPSHOT_PREFIX: &str = "backup-";

/// A copy of the install tree taken before an apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    /// Snapshot directory.
    pub path: PathBuf,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Files captured, relative to the install root.
    pub files: Vec<PathBuf>,
    /// Installed version at the time, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl BackupSnapshot {
    /// Directory name, e.g. `backup-2025-01-15T12-00-00-000Z`.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn metadata_path(&self) -> PathBuf {
        metadata_path_for(&self.path)
    }
}

fn metadata_path_for(snapshot_dir: &Path) -> PathBuf {
    let mut name = snapshot_dir.file_name().unwrap_or_default().to_os_string();
    name.push(".json");
    snapshot_dir.with_file_name(name)
}

/// Result of an apply attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    /// Every file was applied.
    pub success: bool,
    /// Refused because the candidate was not newer. Nothing was touched.
    pub blocked: bool,
    /// Files written, relative to the target root.
    pub files_updated: Vec<PathBuf>,
    /// Per-file failures.
    pub errors: Vec<String>,
    /// Version installed before.
    pub previous_version: Version,
    /// Version offered.
    pub new_version: Version,
}

impl ApplyReport {
    /// Promote a partial or blocked apply into an error.
    pub fn into_result(self) -> TollgateResult<Self> {
        if self.blocked {
            let reason = self
                .errors
                .into_iter()
                .next()
                .unwrap_or_else(|| "not newer than installed".to_string());
            return Err(TollgateError::DowngradeBlocked {
                current: self.previous_version.to_string(),
                candidate: self.new_version.to_string(),
                reason,
            });
        }
        if !self.errors.is_empty() {
            return Err(TollgateError::ApplyPartialFailure {
                failed: self.errors.len(),
            });
        }
        Ok(self)
    }
}

/// Result of a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    /// Every file was restored.
    pub success: bool,
    /// Files written back, relative to the target root.
    pub files_restored: Vec<PathBuf>,
    /// Removal and copy failures.
    pub errors: Vec<String>,
}

/// Snapshot store plus the apply and restore operations.
pub struct BackupEngine {
    backups_dir: PathBuf,
    log: Arc<UpdateLog>,
    clock: Arc<dyn Clock>,
    version_file: String,
}

impl BackupEngine {
    /// Create an engine keeping snapshots under `backups_dir`.
    pub fn new(backups_dir: impl Into<PathBuf>, log: Arc<UpdateLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backups_dir: backups_dir.into(),
            log,
            clock,
            version_file: DEFAULT_VERSION_FILE.to_string(),
        }
    }

    /// Name of the version file inside install and update trees.
    pub fn with_version_file(mut self, name: impl Into<String>) -> Self {
        self.version_file = name.into();
        self
    }

    /// Snapshot directory root.
    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    /// Copy `install_dir` into a new snapshot. The live tree is only read.
    pub fn create_backup(
        &self,
        install_dir: &Path,
        version: Option<&Version>,
    ) -> TollgateResult<BackupSnapshot> {
        let mut entry = UpdateLogEntry::new(LogKind::Backup, LogStatus::Success, self.clock.as_ref())
            .source(install_dir);
        entry.previous_version = version.map(Version::to_string);

        let result = self.snapshot(install_dir, version);
        match &result {
            Ok(snapshot) => {
                entry.files = snapshot.files.iter().map(|f| display_rel(f)).collect();
                tracing::info!(snapshot = %snapshot.name(), files = snapshot.files.len(), "Backup created");
            }
            Err(e) => {
                entry.status = LogStatus::Error;
                entry.errors.push(e.to_string());
                tracing::warn!(error = %e, "Backup failed");
            }
        }
        self.log.record(&entry);
        result
    }

    fn snapshot(&self, install_dir: &Path, version: Option<&Version>) -> TollgateResult<BackupSnapshot> {
        if !install_dir.is_dir() {
            return Err(TollgateError::BackupIo(format!(
                "install directory {} does not exist",
                install_dir.display()
            )));
        }

        fs::create_dir_all(&self.backups_dir)
            .map_err(|e| TollgateError::BackupIo(format!("Failed to create backups dir: {}", e)))?;

        let created_at = self.clock.now_utc();
        let path = self.free_snapshot_path(&self.clock.stamp());
        fs::create_dir_all(&path)
            .map_err(|e| TollgateError::BackupIo(format!("Failed to create snapshot dir: {}", e)))?;

        let (files, errors) = fsutil::copy_tree(install_dir, &path);
        if !errors.is_empty() {
            // A partial snapshot must never be restored from.
            fsutil::remove_tree_best_effort(&path);
            return Err(TollgateError::BackupIo(format!(
                "{} file(s) could not be backed up: {}",
                errors.len(),
                join_errors(&errors)
            )));
        }

        let snapshot = BackupSnapshot {
            path,
            created_at,
            files,
            version: version.map(Version::to_string),
        };

        let meta = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| TollgateError::BackupIo(format!("Failed to serialize snapshot: {}", e)))?;
        fs::write(snapshot.metadata_path(), meta)
            .map_err(|e| TollgateError::BackupIo(format!("Failed to write snapshot metadata: {}", e)))?;

        Ok(snapshot)
    }

    fn free_snapshot_path(&self, stamp: &str) -> PathBuf {
        let base = self.backups_dir.join(format!("{}{}", SNAPSHOT_PREFIX, stamp));
        if !base.exists() {
            return base;
        }
        (1..)
            .map(|n| self.backups_dir.join(format!("{}{}-{}", SNAPSHOT_PREFIX, stamp, n)))
            .find(|p| !p.exists())
            .unwrap_or(base)
    }

    /// Why applying `source` as `candidate` over `current` would be refused.
    ///
    /// `None` when the apply may go ahead. A missing source is not a refusal;
    /// [`apply_update`](Self::apply_update) reports it as an I/O error.
    pub fn refusal(&self, source: &Path, current: &Version, candidate: &Version) -> Option<String> {
        if !candidate.is_newer_than(current) {
            return Some(format!("{} is not newer than installed {}", candidate, current));
        }
        if !source.is_dir() {
            return None;
        }
        match payload_version(source, &self.version_file) {
            None => Some(format!("update files in {} carry no version", source.display())),
            Some(found) if found != *candidate => Some(format!(
                "update files are version {}, offered as {}",
                found, candidate
            )),
            Some(_) => None,
        }
    }

    /// Copy `source` over `target` if it holds a version newer than `current`.
    ///
    /// The update files must identify themselves as `candidate`. A refused
    /// candidate yields `blocked = true` and the target is not touched.
    /// Otherwise each file is copied atomically; failures are collected and
    /// the remaining files still go through. The target's version file is
    /// stamped last, so a clean apply always advances the installed version.
    pub fn apply_update(
        &self,
        source: &Path,
        target: &Path,
        current: &Version,
        candidate: &Version,
    ) -> TollgateResult<ApplyReport> {
        let mut entry = UpdateLogEntry::new(LogKind::Update, LogStatus::Success, self.clock.as_ref())
            .versions(current, candidate)
            .source(source);

        if let Some(reason) = self.refusal(source, current, candidate) {
            tracing::warn!(%current, %candidate, %reason, "Refusing update");
            entry.status = LogStatus::Blocked;
            entry.errors.push(reason);
            self.log.record(&entry);

            return Ok(ApplyReport {
                success: false,
                blocked: true,
                files_updated: Vec::new(),
                errors: entry.errors,
                previous_version: *current,
                new_version: *candidate,
            });
        }

        if !source.is_dir() {
            let err = TollgateError::BackupIo(format!(
                "update source {} does not exist",
                source.display()
            ));
            entry.status = LogStatus::Error;
            entry.errors.push(err.to_string());
            self.log.record(&entry);
            return Err(err);
        }

        let (files, errors) = fsutil::copy_tree(source, target);
        let mut errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
        if errors.is_empty() {
            if let Err(e) = stamp_version_file(&target.join(&self.version_file), candidate) {
                errors.push(e.to_string());
            }
        }

        entry.files = files.iter().map(|f| display_rel(f)).collect();
        entry.errors = errors.clone();
        if !errors.is_empty() {
            entry.status = LogStatus::Error;
            tracing::warn!(failed = errors.len(), applied = files.len(), "Update applied with errors");
        } else {
            tracing::info!(%current, %candidate, files = files.len(), "Update applied");
        }
        self.log.record(&entry);

        Ok(ApplyReport {
            success: errors.is_empty(),
            blocked: false,
            files_updated: files,
            errors,
            previous_version: *current,
            new_version: *candidate,
        })
    }

    /// Replace `target` with the contents of `snapshot`.
    ///
    /// Files that are missing or held open are skipped during removal.
    pub fn restore_backup(&self, snapshot: &BackupSnapshot, target: &Path) -> TollgateResult<RestoreReport> {
        let mut entry = UpdateLogEntry::new(LogKind::Restore, LogStatus::Success, self.clock.as_ref())
            .source(&snapshot.path);
        entry.new_version = snapshot.version.clone();

        if !snapshot.path.is_dir() {
            let err = TollgateError::BackupIo(format!(
                "snapshot {} does not exist",
                snapshot.path.display()
            ));
            entry.status = LogStatus::Error;
            entry.errors.push(err.to_string());
            self.log.record(&entry);
            return Err(err);
        }

        let mut errors: Vec<String> = fsutil::remove_tree_best_effort(target)
            .iter()
            .map(ToString::to_string)
            .collect();

        let (files, copy_errors) = fsutil::copy_tree(&snapshot.path, target);
        errors.extend(copy_errors.iter().map(ToString::to_string));

        entry.files = files.iter().map(|f| display_rel(f)).collect();
        entry.errors = errors.clone();
        if errors.is_empty() {
            tracing::info!(snapshot = %snapshot.name(), files = files.len(), "Backup restored");
        } else {
            entry.status = LogStatus::Error;
            tracing::warn!(snapshot = %snapshot.name(), failed = errors.len(), "Backup restored with errors");
        }
        self.log.record(&entry);

        Ok(RestoreReport {
            success: errors.is_empty(),
            files_restored: files,
            errors,
        })
    }

    /// All snapshots, newest first.
    pub fn list_backups(&self) -> TollgateResult<Vec<BackupSnapshot>> {
        let dir = match fs::read_dir(&self.backups_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TollgateError::BackupIo(format!(
                    "Failed to read backups dir: {}",
                    e
                )))
            }
        };

        let mut snapshots = Vec::new();
        for item in dir.filter_map(|i| i.ok()) {
            let path = item.path();
            let name = item.file_name().to_string_lossy().into_owned();
            if !name.starts_with(SNAPSHOT_PREFIX) || !path.is_dir() {
                continue;
            }
            snapshots.push(self.describe(path));
        }

        // Stamps sort chronologically as strings.
        snapshots.sort_by(|a, b| b.name().cmp(&a.name()));
        Ok(snapshots)
    }

    fn describe(&self, path: PathBuf) -> BackupSnapshot {
        let from_meta = fs::read(metadata_path_for(&path))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<BackupSnapshot>(&bytes).ok());

        match from_meta {
            Some(mut snapshot) => {
                snapshot.path = path;
                snapshot
            }
            None => {
                let created_at = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| self.clock.now_utc());
                BackupSnapshot {
                    files: fsutil::list_files(&path).unwrap_or_default(),
                    path,
                    created_at,
                    version: None,
                }
            }
        }
    }

    /// Delete all but the newest `keep` snapshots. Returns the removed paths.
    pub fn prune_backups(&self, keep: usize) -> TollgateResult<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for snapshot in self.list_backups()?.into_iter().skip(keep) {
            let errors = fsutil::remove_tree_best_effort(&snapshot.path);
            if !errors.is_empty() {
                return Err(TollgateError::BackupIo(format!(
                    "Failed to prune {}: {}",
                    snapshot.name(),
                    join_errors(&errors)
                )));
            }
            let _ = fs::remove_file(snapshot.metadata_path());
            tracing::debug!(snapshot = %snapshot.name(), "Backup pruned");
            removed.push(snapshot.path);
        }
        Ok(removed)
    }
}

fn display_rel(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn join_errors(errors: &[FileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
