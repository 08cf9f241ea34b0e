//! Tollgate error types.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type TollgateResult<T> = Result<T, TollgateError>;

/// Errors that can occur while gating licenses or applying updates.
#[derive(Debug, Error)]
pub enum TollgateError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A required input was empty or malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A version string did not match `MAJOR.MINOR.PATCH`.
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Reading or writing the license file failed.
    #[error("License I/O error: {0}")]
    LicenseIo(String),

    /// The license file exists but could not be decrypted or parsed.
    #[error("License file failed integrity check")]
    LicenseCorrupt,

    /// No hardware identifier could be obtained.
    #[error("Hardware id error: {0}")]
    HardwareId(String),

    /// Transport failure talking to a remote server.
    #[error("Network error: {0}")]
    Network(String),

    /// The update manifest is missing required fields or has wrong types.
    #[error("Invalid update manifest: {0}")]
    ManifestInvalid(String),

    /// The archive download failed.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// The archive download exceeded its hard timeout.
    #[error("Download timed out after {seconds}s")]
    DownloadTimeout {
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// The archive download was cancelled by the caller.
    #[error("Download cancelled")]
    DownloadCancelled,

    /// The server redirected more times than allowed.
    #[error("Too many redirects (limit {limit})")]
    TooManyRedirects {
        /// Maximum number of hops allowed.
        limit: usize,
    },

    /// The server answered with a redirect but no usable `Location` header.
    #[error("Redirect without Location header")]
    RedirectWithoutLocation,

    /// SHA-256 of a downloaded file does not match the manifest.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum announced by the manifest.
        expected: String,
        /// Checksum computed over the file.
        actual: String,
    },

    /// Byte count of a downloaded file does not match what was announced.
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Announced size.
        expected: u64,
        /// Received size.
        actual: u64,
    },

    /// Applying would not move the installation forward, or the update
    /// files do not carry the version they were offered as.
    #[error("Update refused ({current} -> {candidate}): {reason}")]
    DowngradeBlocked {
        /// Installed version.
        current: String,
        /// Version that was offered.
        candidate: String,
        /// Why the update was refused.
        reason: String,
    },

    /// Some files could not be applied.
    #[error("Update applied with {failed} file error(s)")]
    ApplyPartialFailure {
        /// Number of files that failed.
        failed: usize,
    },

    /// Another mutating update operation is already running.
    #[error("An update operation is already in progress")]
    UpdateInProgress,

    /// ZIP packaging or extraction failed.
    #[error("Archive error: {0}")]
    Archive(String),

    /// Backup, apply or restore file operation failed.
    #[error("Backup I/O error: {0}")]
    BackupIo(String),

    /// Update log I/O error.
    #[error("Update log I/O error: {0}")]
    LogIo(String),
}

impl TollgateError {
    /// Stable reason code for presentation layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidVersion(_) => "INVALID_VERSION",
            Self::LicenseIo(_) | Self::HardwareId(_) => "CHECK_ERROR",
            Self::LicenseCorrupt => "LICENSE_INVALID",
            Self::Network(_) => "NETWORK_ERROR",
            Self::ManifestInvalid(_) => "MANIFEST_INVALID",
            Self::DownloadTimeout { .. } => "DOWNLOAD_TIMEOUT",
            Self::DownloadCancelled => "DOWNLOAD_CANCELLED",
            Self::DownloadFailed(_)
            | Self::TooManyRedirects { .. }
            | Self::RedirectWithoutLocation
            | Self::SizeMismatch { .. } => "DOWNLOAD_FAILED",
            Self::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            Self::DowngradeBlocked { .. } => "DOWNGRADE_BLOCKED",
            Self::ApplyPartialFailure { .. } => "APPLY_PARTIAL_FAILURE",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::Archive(_) => "ARCHIVE_ERROR",
            Self::BackupIo(_) => "BACKUP_ERROR",
            Self::LogIo(_) => "LOG_ERROR",
        }
    }

    /// Whether retrying later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::DownloadTimeout { .. }
                | Self::DownloadFailed(_)
                | Self::UpdateInProgress
        )
    }
}
