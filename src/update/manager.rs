//! Update manager - the orchestration API for the update pipeline.
//!
//! The `UpdateManager` ties the pieces together:
//! - Manifest checks over HTTP or from removable media
//! - Background downloads
//! - Backup, apply and automatic rollback
//!
//! Mutating operations (apply, restore, prune) are single-flight. A second
//! caller fails fast with `UpdateInProgress` instead of queueing.

use crate::clock::{Clock, SystemClock};
use crate::config::TollgateConfig;
use crate::update::archive::extract_archive;
use crate::update::backup::{ApplyReport, BackupEngine, BackupSnapshot, RestoreReport};
use crate::update::decision::{decide, UpdateDecision};
use crate::update::fetch::{DownloadHandle, DownloadRequest, Fetcher};
use crate::update::installed::installed_version;
use crate::update::log::{UpdateLog, UpdateLogEntry};
use crate::update::manifest::{HttpManifestSource, UpdateSource};
use crate::update::media::{self, MediaSource, MediaUpdate};
use crate::version::Version;
use crate::{TollgateError, TollgateResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Snapshots kept by [`UpdateManager::prune_backups`] when callers have no
/// preference.
pub const DEFAULT_KEEP_BACKUPS: usize = 5;

/// Main entry point for checking and applying updates.
///
/// Create one per application and share it behind an `Arc`.
pub struct UpdateManager {
    config: TollgateConfig,
    engine: Arc<BackupEngine>,
    log: Arc<UpdateLog>,
    fetcher: Fetcher,
    manifest: Option<HttpManifestSource>,
    guard: Mutex<()>,
}

impl UpdateManager {
    /// Create a manager with the system clock.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, no state directory
    /// can be resolved, or the HTTP client cannot be built.
    pub fn new(config: TollgateConfig) -> TollgateResult<Self> {
        config.validate()?;
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager with a custom clock (for testing).
    #[cfg(any(test, feature = "test-seams"))]
    pub fn new_with_clock(config: TollgateConfig, clock: Arc<dyn Clock>) -> TollgateResult<Self> {
        config.validate()?;
        Self::with_clock(config, clock)
    }

    pub(crate) fn with_clock(config: TollgateConfig, clock: Arc<dyn Clock>) -> TollgateResult<Self> {
        let log = Arc::new(UpdateLog::new(config.logs_dir()?, clock.clone()));
        let engine = Arc::new(
            BackupEngine::new(config.backups_dir()?, log.clone(), clock)
                .with_version_file(config.version_file.clone()),
        );
        let fetcher = Fetcher::new(&config)?;
        let manifest = match config.manifest_url {
            Some(_) => Some(HttpManifestSource::new(&config)?),
            None => None,
        };

        Ok(Self {
            config,
            engine,
            log,
            fetcher,
            manifest,
            guard: Mutex::new(()),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &TollgateConfig {
        &self.config
    }

    /// Version currently on disk.
    pub fn installed_version(&self) -> Version {
        installed_version(&self.config)
    }

    /// Whether a mutating operation is running right now.
    pub fn is_busy(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Fetch the HTTP manifest and decide against the installed version.
    pub async fn check_for_update(&self) -> TollgateResult<UpdateDecision> {
        let source = self
            .manifest
            .as_ref()
            .ok_or_else(|| TollgateError::ConfigError("manifest_url is not set".to_string()))?;

        let manifest = source.fetch().await?;
        let decision = decide(&self.installed_version(), &manifest);
        tracing::info!(
            current = %decision.current_version,
            offered = %decision.version,
            kind = ?decision.kind,
            "Update check complete"
        );
        Ok(decision)
    }

    /// Decide against whatever `source` publishes. `Ok(None)` when the
    /// source has nothing on offer.
    pub async fn check_source(&self, source: &UpdateSource) -> TollgateResult<Option<UpdateDecision>> {
        tracing::debug!(source = %source.describe(), "Checking update source");
        let Some(manifest) = source.fetch_manifest().await? else {
            return Ok(None);
        };
        Ok(Some(decide(&self.installed_version(), &manifest)))
    }

    /// Look for an update on the medium mounted at `root`.
    pub async fn check_media(
        &self,
        root: impl Into<PathBuf>,
    ) -> TollgateResult<Option<(UpdateDecision, MediaUpdate)>> {
        let Some(update) = MediaSource::new(root).fetch().await? else {
            return Ok(None);
        };
        let decision = decide(&self.installed_version(), &update.manifest);
        Ok(Some((decision, update)))
    }

    /// Mount points that may hold an update medium.
    pub fn detect_removable_drives(&self) -> Vec<PathBuf> {
        media::detect_removable_drives()
    }

    /// Start downloading the archive `decision` points at.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_download(&self, decision: &UpdateDecision) -> TollgateResult<DownloadHandle> {
        let request = DownloadRequest::from_decision(decision)?;
        tracing::info!(url = %request.url, version = %decision.version, "Starting update download");
        Ok(self.fetcher.start(request))
    }

    /// Apply the files in `dir` as version `candidate`.
    ///
    /// Takes a backup first. When some files fail and rollback is enabled,
    /// the backup is restored before the error is returned.
    pub async fn apply_from_directory(
        &self,
        dir: impl Into<PathBuf>,
        candidate: &Version,
    ) -> TollgateResult<ApplyReport> {
        let _busy = self.acquire()?;
        self.apply_locked(dir.into(), *candidate).await
    }

    /// Extract `archive` into the staging directory and apply it as `candidate`.
    pub async fn apply_from_archive(
        &self,
        archive: impl Into<PathBuf>,
        candidate: &Version,
    ) -> TollgateResult<ApplyReport> {
        let _busy = self.acquire()?;

        let archive = archive.into();
        let staging = self.config.staging_dir()?;
        let source = run_blocking(move || extract_archive(&archive, &staging)).await?;

        self.apply_locked(source, *candidate).await
    }

    /// Put `snapshot` back in place of the install tree.
    pub async fn restore(&self, snapshot: &BackupSnapshot) -> TollgateResult<RestoreReport> {
        let _busy = self.acquire()?;

        let engine = self.engine.clone();
        let snapshot = snapshot.clone();
        let target = self.config.install_dir.clone();
        run_blocking(move || engine.restore_backup(&snapshot, &target)).await
    }

    /// Snapshots, newest first.
    pub fn list_backups(&self) -> TollgateResult<Vec<BackupSnapshot>> {
        self.engine.list_backups()
    }

    /// Delete all but the newest `keep` snapshots.
    pub async fn prune_backups(&self, keep: usize) -> TollgateResult<Vec<PathBuf>> {
        let _busy = self.acquire()?;

        let engine = self.engine.clone();
        run_blocking(move || engine.prune_backups(keep)).await
    }

    /// Update log entries, newest first.
    pub fn logs(&self) -> TollgateResult<Vec<UpdateLogEntry>> {
        self.log.read_all()
    }

    fn acquire(&self) -> TollgateResult<MutexGuard<'_, ()>> {
        self.guard.try_lock().map_err(|_| {
            tracing::warn!("Update operation rejected: another one is running");
            TollgateError::UpdateInProgress
        })
    }

    async fn apply_locked(&self, source: PathBuf, candidate: Version) -> TollgateResult<ApplyReport> {
        let current = self.installed_version();
        let engine = self.engine.clone();
        let target = self.config.install_dir.clone();
        let rollback = self.config.rollback_on_failure;

        let report = run_blocking(move || {
            apply_with_rollback(&engine, &source, &target, &current, &candidate, rollback)
        })
        .await?;

        tracing::info!(
            from = %report.previous_version,
            to = %report.new_version,
            files = report.files_updated.len(),
            "Update applied"
        );
        Ok(report)
    }
}

fn apply_with_rollback(
    engine: &BackupEngine,
    source: &Path,
    target: &Path,
    current: &Version,
    candidate: &Version,
    rollback: bool,
) -> TollgateResult<ApplyReport> {
    // Refuse before snapshotting so a downgrade leaves no trace but the log entry.
    if engine.refusal(source, current, candidate).is_some() {
        return engine
            .apply_update(source, target, current, candidate)?
            .into_result();
    }

    let snapshot = engine.create_backup(target, Some(current))?;
    let report = engine.apply_update(source, target, current, candidate)?;
    if report.errors.is_empty() {
        return Ok(report);
    }

    if rollback {
        tracing::warn!(
            failed = report.errors.len(),
            backup = %snapshot.name(),
            "Apply failed, rolling back"
        );
        let restored = engine.restore_backup(&snapshot, target)?;
        if !restored.success {
            tracing::error!(errors = restored.errors.len(), "Rollback incomplete");
        }
    }
    report.into_result()
}

async fn run_blocking<T, F>(f: F) -> TollgateResult<T>
where
    F: FnOnce() -> TollgateResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TollgateError::BackupIo(format!("file task failed: {}", e)))?
}
