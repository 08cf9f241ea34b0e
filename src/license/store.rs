//! Sealed license file with atomic writes.
//!
//! Stores the license under `<data_root>/license.dat`. Uses temp file +
//! rename so a crash mid-write never leaves a half-written license.

use crate::clock::Clock;
use crate::config::TollgateConfig;
use crate::crypto::derive::LicenseToken;
use crate::crypto::secret::BuildSecret;
use crate::license::record::LicenseRecord;
use crate::{TollgateError, TollgateResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File-backed license store.
pub struct LicenseStore {
    path: PathBuf,
    secret: BuildSecret,
    clock: Arc<dyn Clock>,
}

impl LicenseStore {
    /// Create a store at the configured license path.
    pub fn new(config: &TollgateConfig, clock: Arc<dyn Clock>) -> TollgateResult<Self> {
        Ok(Self::with_path(
            config.license_path()?,
            config.secret.clone(),
            clock,
        ))
    }

    /// Create a store at an explicit path.
    pub fn with_path(path: impl Into<PathBuf>, secret: BuildSecret, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            secret,
            clock,
        }
    }

    /// Location of the license file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seal and persist a license record.
    pub fn save(
        &self,
        token: LicenseToken,
        hardware_id: &str,
        license_key: &str,
    ) -> TollgateResult<LicenseRecord> {
        let record = LicenseRecord::new(token, hardware_id, license_key, self.clock.as_ref());
        let envelope = record.seal(&self.secret)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                TollgateError::LicenseIo(format!("Failed to create license dir: {}", e))
            })?;
        }

        let temp_path = self.path.with_extension("dat.tmp");

        fs::write(&temp_path, envelope.as_bytes())
            .map_err(|e| TollgateError::LicenseIo(format!("Failed to write temp file: {}", e)))?;

        restrict_permissions(&temp_path)?;

        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            TollgateError::LicenseIo(format!("Failed to rename license file: {}", e))
        })?;

        tracing::debug!(path = %self.path.display(), "License saved");
        Ok(record)
    }

    /// Load the stored record.
    ///
    /// `Ok(None)` when nothing is stored; `LicenseCorrupt` when the file
    /// exists but does not open.
    pub fn load(&self) -> TollgateResult<Option<LicenseRecord>> {
        let envelope = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            // Non-UTF-8 bytes cannot be our base64 envelope.
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(TollgateError::LicenseCorrupt)
            }
            Err(e) => {
                return Err(TollgateError::LicenseIo(format!(
                    "Failed to read license file: {}",
                    e
                )))
            }
        };

        LicenseRecord::open(&envelope, &self.secret).map(Some)
    }

    /// Remove the stored license. Removing a missing license is not an error.
    pub fn clear(&self) -> TollgateResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TollgateError::LicenseIo(format!(
                "Failed to delete license: {}",
                e
            ))),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> TollgateResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| TollgateError::LicenseIo(format!("Failed to set permissions: {}", e)))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> TollgateResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::crypto::derive::derive_token;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> LicenseStore {
        let clock = Arc::new(MockClock::from_rfc3339("2025-01-15T12:00:00Z").unwrap());
        LicenseStore::with_path(
            dir.path().join("nested").join("license.dat"),
            BuildSecret::development(),
            clock,
        )
    }

    fn token() -> LicenseToken {
        derive_token("hw-abc", "KEY-123", &BuildSecret::development()).unwrap()
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.save(token(), "hw-abc", "KEY-123").unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token, token());
        assert_eq!(loaded.hardware_id, "hw-abc");
        assert_eq!(loaded.license_key, "KEY-123");
        assert!(!store.path().with_extension("dat.tmp").exists());
    }

    #[test]
    fn test_store_load_missing() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load().unwrap().is_none());
    }

    #[test]
    fn test_store_file_is_not_plaintext() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(token(), "hw-abc", "KEY-123").unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("KEY-123"));
        assert!(!raw.contains("hw-abc"));
    }

    #[test]
    fn test_store_tampered_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(token(), "hw-abc", "KEY-123").unwrap();

        fs::write(store.path(), "definitely not a sealed license").unwrap();
        assert!(matches!(store.load(), Err(TollgateError::LicenseCorrupt)));

        fs::write(store.path(), [0xFFu8, 0xFE, 0x00]).unwrap();
        assert!(matches!(store.load(), Err(TollgateError::LicenseCorrupt)));
    }

    #[test]
    fn test_store_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(token(), "hw-abc", "KEY-123").unwrap();

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_store_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(token(), "hw-abc", "KEY-123").unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
