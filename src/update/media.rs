//! Updates delivered on a removable drive.
//!
//! A medium carries `update-info.json` next to an `update/` directory holding
//! the replacement files.

use crate::protocol::models::{parse_manifest, UpdateManifest};
use crate::TollgateResult;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Manifest file name on the medium.
pub const MEDIA_INFO_FILE: &str = "update-info.json";

/// Directory holding replacement files on the medium.
pub const MEDIA_UPDATE_DIR: &str = "update";

/// An update found on a medium.
#[derive(Debug, Clone)]
pub struct MediaUpdate {
    /// Parsed `update-info.json`.
    pub manifest: UpdateManifest,
    /// The `update/` directory to apply from.
    pub update_dir: PathBuf,
}

/// Manifest source rooted at a drive or directory.
#[derive(Debug, Clone)]
pub struct MediaSource {
    root: PathBuf,
}

impl MediaSource {
    /// Source reading from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Medium root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look for an update on the medium.
    ///
    /// `Ok(None)` when either the info file or the update directory is
    /// missing. A present but malformed info file is `ManifestInvalid`.
    pub async fn fetch(&self) -> TollgateResult<Option<MediaUpdate>> {
        let info_path = self.root.join(MEDIA_INFO_FILE);
        let update_dir = self.root.join(MEDIA_UPDATE_DIR);

        let body = match tokio::fs::read(&info_path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                tracing::warn!(path = %info_path.display(), error = %e, "Cannot read update info");
                return Ok(None);
            }
        };

        if !tokio::fs::metadata(&update_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            tracing::debug!(root = %self.root.display(), "Update info present without update directory");
            return Ok(None);
        }

        let manifest = parse_manifest(&body)?;
        tracing::info!(root = %self.root.display(), version = %manifest.version, "Found update on removable media");
        Ok(Some(MediaUpdate {
            manifest,
            update_dir,
        }))
    }
}

/// Mount points that may hold an update medium.
pub fn detect_removable_drives() -> Vec<PathBuf> {
    candidate_roots()
        .into_iter()
        .filter(|p| std::fs::read_dir(p).is_ok())
        .collect()
}

#[cfg(windows)]
fn candidate_roots() -> Vec<PathBuf> {
    ('D'..='Z').map(|letter| PathBuf::from(format!("{}:\\", letter))).collect()
}

#[cfg(target_os = "macos")]
fn candidate_roots() -> Vec<PathBuf> {
    subdirectories(Path::new("/Volumes"))
}

#[cfg(all(unix, not(target_os = "macos")))]
fn candidate_roots() -> Vec<PathBuf> {
    let user = std::env::var("USER").unwrap_or_default();
    let mut roots = Vec::new();
    if !user.is_empty() {
        roots.extend(subdirectories(&Path::new("/media").join(&user)));
        roots.extend(subdirectories(&Path::new("/run/media").join(&user)));
    }
    roots
}

#[cfg(not(any(unix, windows)))]
fn candidate_roots() -> Vec<PathBuf> {
    Vec::new()
}

#[cfg(unix)]
fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    dirs.sort();
    dirs
}
