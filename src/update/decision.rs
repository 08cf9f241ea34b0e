//! Update decision: compare the installed version with a manifest.

use crate::protocol::models::UpdateManifest;
use crate::version::Version;
use serde::Serialize;

/// How urgent an update is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateKind {
    /// Nothing newer is offered.
    UpToDate,
    /// A newer version is offered; installing it is the user's choice.
    Optional,
    /// The installed version is below the supported minimum.
    Mandatory,
}

/// Outcome of an update check. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDecision {
    /// A newer version exists.
    pub available: bool,
    /// Normal use should be blocked until updated.
    pub required: bool,
    /// Version offered.
    pub version: Version,
    /// Minimum supported version (0.0.0 when the manifest has none).
    pub min_version: Version,
    /// Installed version.
    pub current_version: Version,
    /// Short explanation.
    pub reason: String,
    /// Archive location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Archive size in bytes, 0 when unknown.
    pub size: u64,
    /// Hex SHA-256 of the archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Change list.
    pub changelog: Vec<String>,
    /// Whether a restart is needed after applying.
    pub requires_restart: bool,
    /// Release description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Urgency.
    pub kind: UpdateKind,
}

/// Decide whether `manifest` is an update for `current`.
pub fn decide(current: &Version, manifest: &UpdateManifest) -> UpdateDecision {
    let min_version = manifest.min_version.unwrap_or(Version::ZERO);

    let (kind, reason) = if min_version > *current {
        (
            UpdateKind::Mandatory,
            "current version below minimum".to_string(),
        )
    } else if manifest.version > *current {
        (
            UpdateKind::Optional,
            format!("version {} available", manifest.version),
        )
    } else {
        (UpdateKind::UpToDate, "up to date".to_string())
    };

    UpdateDecision {
        available: kind != UpdateKind::UpToDate,
        required: kind == UpdateKind::Mandatory,
        version: manifest.version,
        min_version,
        current_version: *current,
        reason,
        download_url: manifest.download_url.clone(),
        size: manifest.size.unwrap_or(0),
        checksum: manifest.checksum.clone(),
        changelog: manifest.changelog.clone(),
        requires_restart: manifest.requires_restart,
        description: manifest.description.clone(),
        kind,
    }
}
