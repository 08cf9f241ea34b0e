//! Release packaging and extraction.
//!
//! A release is `update-X.Y.Z.zip` plus an `update.json` manifest pointing
//! at it.

use crate::clock::Clock;
use crate::crypto::digest::sha256_hex;
use crate::fsutil;
use crate::protocol::models::UpdateManifest;
use crate::version::Version;
use crate::{TollgateError, TollgateResult};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Manifest file name written next to the archive.
pub const MANIFEST_FILE: &str = "update.json";

/// What to publish.
#[derive(Debug, Clone)]
pub struct ReleaseOptions {
    /// Release version, strict `X.Y.Z`.
    pub version: String,
    /// URL prefix the archive will be served under.
    pub base_url: String,
    /// Oldest version allowed to keep running, strict `X.Y.Z`.
    pub min_version: Option<String>,
    /// Change list.
    pub changelog: Vec<String>,
    /// Description.
    pub description: Option<String>,
    /// Whether a restart is needed after applying.
    pub requires_restart: bool,
}

impl ReleaseOptions {
    /// Options for `version` served under `base_url`.
    pub fn new(version: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            base_url: base_url.into(),
            min_version: None,
            changelog: Vec::new(),
            description: None,
            requires_restart: true,
        }
    }
}

/// Files produced by [`package_release`].
#[derive(Debug, Clone)]
pub struct PackagedRelease {
    /// The ZIP archive.
    pub archive: PathBuf,
    /// The written `update.json`.
    pub manifest_path: PathBuf,
    /// Manifest contents.
    pub manifest: UpdateManifest,
}

/// Zip `dist_dir` into `out_dir/update-X.Y.Z.zip` and write `update.json`.
pub fn package_release(
    dist_dir: &Path,
    out_dir: &Path,
    options: &ReleaseOptions,
    clock: &dyn Clock,
) -> TollgateResult<PackagedRelease> {
    let version = Version::parse_strict(&options.version)?;
    let min_version = options
        .min_version
        .as_deref()
        .map(Version::parse_strict)
        .transpose()?;

    if !dist_dir.is_dir() {
        return Err(TollgateError::Archive(format!(
            "build output {} does not exist",
            dist_dir.display()
        )));
    }
    fs::create_dir_all(out_dir)
        .map_err(|e| TollgateError::Archive(format!("Failed to create output dir: {}", e)))?;

    let file_name = format!("update-{}.zip", version);
    let archive = out_dir.join(&file_name);
    let size = write_zip(dist_dir, &archive)?;
    let checksum = file_sha256(&archive)?;

    let mut manifest = UpdateManifest::new(version);
    manifest.min_version = min_version;
    manifest.download_url = Some(format!(
        "{}/{}",
        options.base_url.trim_end_matches('/'),
        file_name
    ));
    manifest.size = Some(size);
    manifest.release_date = Some(clock.now_utc().to_rfc3339());
    manifest.changelog = options.changelog.clone();
    manifest.requires_restart = options.requires_restart;
    manifest.description = options
        .description
        .clone()
        .or_else(|| Some(format!("Update {}", version)));
    manifest.checksum = Some(checksum);

    let manifest_path = out_dir.join(MANIFEST_FILE);
    let temp = out_dir.join(format!("{}.tmp", MANIFEST_FILE));
    fs::write(&temp, manifest.to_json_pretty()?)
        .and_then(|_| fs::rename(&temp, &manifest_path))
        .map_err(|e| TollgateError::Archive(format!("Failed to write manifest: {}", e)))?;

    tracing::info!(archive = %archive.display(), size, %version, "Release packaged");
    Ok(PackagedRelease {
        archive,
        manifest_path,
        manifest,
    })
}

fn write_zip(dist_dir: &Path, archive: &Path) -> TollgateResult<u64> {
    let zip_err = |e: zip::result::ZipError| TollgateError::Archive(e.to_string());
    let io_err = |e: io::Error| TollgateError::Archive(e.to_string());

    let files = fsutil::list_files(dist_dir).map_err(io_err)?;
    let file = File::create(archive).map_err(io_err)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for rel in &files {
        let name = rel.to_string_lossy().replace('\\', "/");
        writer.start_file(name, options).map_err(zip_err)?;
        let mut src = File::open(dist_dir.join(rel)).map_err(io_err)?;
        io::copy(&mut src, &mut writer).map_err(io_err)?;
    }

    writer.finish().map_err(zip_err)?;
    let size = fs::metadata(archive).map_err(io_err)?.len();
    Ok(size)
}

fn file_sha256(path: &Path) -> TollgateResult<String> {
    let mut file = File::open(path).map_err(|e| TollgateError::Archive(e.to_string()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| TollgateError::Archive(e.to_string()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Unpack `archive` into a fresh `staging_dir`.
///
/// Returns the directory to apply from: `staging_dir/update` when the
/// archive wraps its files in an `update/` folder, `staging_dir` otherwise.
pub fn extract_archive(archive: &Path, staging_dir: &Path) -> TollgateResult<PathBuf> {
    let leftovers = fsutil::remove_tree_best_effort(staging_dir);
    if let Some(first) = leftovers.first() {
        return Err(TollgateError::Archive(format!(
            "Failed to clear staging dir: {}",
            first
        )));
    }
    fs::create_dir_all(staging_dir)
        .map_err(|e| TollgateError::Archive(format!("Failed to create staging dir: {}", e)))?;

    let file = File::open(archive)
        .map_err(|e| TollgateError::Archive(format!("Failed to open {}: {}", archive.display(), e)))?;
    let mut zip = ZipArchive::new(file).map_err(|e| TollgateError::Archive(e.to_string()))?;
    zip.extract(staging_dir)
        .map_err(|e| TollgateError::Archive(e.to_string()))?;

    let nested = staging_dir.join("update");
    let source = if nested.is_dir() {
        nested
    } else {
        staging_dir.to_path_buf()
    };

    tracing::debug!(archive = %archive.display(), source = %source.display(), "Archive extracted");
    Ok(source)
}

/// Checksum helper for callers verifying a published manifest by hand.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    sha256_hex(bytes)
}
