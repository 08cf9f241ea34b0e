//! Version markers: what is installed, and what an update tree carries.

use crate::config::TollgateConfig;
use crate::update::archive::MANIFEST_FILE;
use crate::update::media::{MEDIA_INFO_FILE, MEDIA_UPDATE_DIR};
use crate::version::Version;
use crate::{TollgateError, TollgateResult};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Version file looked for when none is configured.
pub const DEFAULT_VERSION_FILE: &str = "package.json";

/// Read the installed version.
///
/// Looks for a `"version"` string in the configured version file under the
/// install root. Falls back to the version compiled into the binary when the
/// file is missing or unreadable.
pub fn installed_version(config: &TollgateConfig) -> Version {
    match read_version_file(&config.version_file_path()) {
        Some(version) => version,
        None => {
            tracing::debug!(
                path = %config.version_file_path().display(),
                "No readable version file, using compiled-in version"
            );
            Version::parse_lenient(&config.app_version)
        }
    }
}

/// Parse the `"version"` field of a JSON file.
pub fn read_version_file(path: &Path) -> Option<Version> {
    let bytes = fs::read(path).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let raw = value.get("version")?.as_str()?;
    Some(Version::parse_lenient(raw))
}

/// Version an update tree identifies itself as.
///
/// Looks in `source` for the version file, `update-info.json` and
/// `update.json`, in that order. When `source` is the `update/` directory of
/// a medium, the medium root is searched the same way afterwards.
pub fn payload_version(source: &Path, version_file: &str) -> Option<Version> {
    let mut dirs = vec![source.to_path_buf()];
    if source.file_name().is_some_and(|n| n == MEDIA_UPDATE_DIR) {
        if let Some(root) = source.parent() {
            dirs.push(root.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| {
            [version_file, MEDIA_INFO_FILE, MANIFEST_FILE]
                .into_iter()
                .map(move |name| dir.join(name))
        })
        .find_map(|path| read_version_file(&path))
}

/// Set the `"version"` field of the JSON file at `path`, keeping its other
/// fields. Written to a temporary sibling and renamed into place.
pub fn stamp_version_file(path: &Path, version: &Version) -> TollgateResult<()> {
    if read_version_file(path) == Some(*version) {
        return Ok(());
    }

    let mut value = fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Default::default()));
    value["version"] = Value::String(version.to_string());

    let bytes = serde_json::to_vec_pretty(&value)
        .map_err(|e| TollgateError::BackupIo(format!("Failed to serialize version file: {}", e)))?;

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tollgate-tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, bytes)
        .and_then(|_| fs::rename(&temp, path))
        .map_err(|e| {
            let _ = fs::remove_file(&temp);
            TollgateError::BackupIo(format!("Failed to write {}: {}", path.display(), e))
        })?;

    tracing::debug!(path = %path.display(), %version, "Version file stamped");
    Ok(())
}
