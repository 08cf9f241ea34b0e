//! Tollgate configuration.

use crate::crypto::secret::BuildSecret;
use crate::update::installed::DEFAULT_VERSION_FILE;
use crate::{TollgateError, TollgateResult};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the license gate and the update pipeline.
///
/// Holds everything product-specific: where the application is installed,
/// where per-user state lives, and which servers to talk to.
#[derive(Debug, Clone)]
pub struct TollgateConfig {
    /// Application name (e.g., "sakura-pos")
    pub app_name: String,

    /// Version compiled into the running binary. Used when the install tree
    /// carries no version file.
    pub app_version: String,

    /// Namespace for per-user state. Defaults to `app_name`.
    pub namespace: String,

    /// Root of the installed application tree that updates replace.
    pub install_dir: PathBuf,

    /// Override for the state root. Defaults to `dirs::data_dir()/<namespace>`.
    pub data_dir: Option<PathBuf>,

    /// File inside `install_dir` whose `"version"` field names the installed
    /// version.
    pub version_file: String,

    /// HTTP endpoint serving the update manifest.
    pub manifest_url: Option<String>,

    /// Base URL of the remote license gate. When unset only the local check runs.
    pub license_server_url: Option<String>,

    /// Secret mixed into license tokens.
    pub secret: BuildSecret,

    /// User-Agent product identifier (e.g., "sakura-pos-updater")
    pub user_agent_product: String,

    /// Timeout for fetching the manifest.
    pub manifest_timeout: Duration,

    /// Timeout for the remote license check.
    pub license_timeout: Duration,

    /// Hard limit on a whole archive download.
    pub download_timeout: Duration,

    /// Maximum redirects followed by the fetcher.
    pub max_redirects: usize,

    /// Interval between background update checks.
    pub check_interval: Duration,

    /// Restore the pre-update backup automatically when an apply fails.
    pub rollback_on_failure: bool,
}

impl TollgateConfig {
    /// Create a configuration with defaults.
    ///
    /// The secret comes from [`BuildSecret::for_build`], so a release build
    /// compiled without a production secret fails here.
    pub fn new(
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        install_dir: impl Into<PathBuf>,
    ) -> TollgateResult<Self> {
        let app_name = app_name.into();
        Ok(Self {
            namespace: app_name.clone(),
            user_agent_product: app_name.clone(),
            app_name,
            app_version: app_version.into(),
            install_dir: install_dir.into(),
            data_dir: None,
            version_file: DEFAULT_VERSION_FILE.to_string(),
            manifest_url: None,
            license_server_url: None,
            secret: BuildSecret::for_build()?,
            manifest_timeout: Duration::from_secs(10),
            license_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(300),
            max_redirects: 5,
            check_interval: Duration::from_secs(30 * 60),
            rollback_on_failure: true,
        })
    }

    /// Set the state namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Put all per-user state under `dir` instead of the platform data dir.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the manifest endpoint.
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = Some(url.into());
        self
    }

    /// Enable the remote license gate.
    pub fn with_license_server(mut self, url: impl Into<String>) -> Self {
        self.license_server_url = Some(url.into());
        self
    }

    /// Replace the build secret.
    pub fn with_secret(mut self, secret: BuildSecret) -> Self {
        self.secret = secret;
        self
    }

    /// Root directory for license, backups, logs and downloads.
    pub fn data_root(&self) -> TollgateResult<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let base = dirs::data_dir().ok_or_else(|| {
            TollgateError::ConfigError("Could not find data directory".to_string())
        })?;
        Ok(base.join(&self.namespace))
    }

    /// Path of the sealed license file.
    pub fn license_path(&self) -> TollgateResult<PathBuf> {
        Ok(self.data_root()?.join("license.dat"))
    }

    /// Directory holding backup snapshots.
    pub fn backups_dir(&self) -> TollgateResult<PathBuf> {
        Ok(self.data_root()?.join("backups"))
    }

    /// Directory holding update log entries.
    pub fn logs_dir(&self) -> TollgateResult<PathBuf> {
        Ok(self.data_root()?.join("update-logs"))
    }

    /// Directory receiving downloaded archives.
    pub fn downloads_dir(&self) -> TollgateResult<PathBuf> {
        Ok(self.data_root()?.join("updates"))
    }

    /// Directory archives are extracted into before apply.
    pub fn staging_dir(&self) -> TollgateResult<PathBuf> {
        Ok(self.data_root()?.join("staging"))
    }

    /// Path of the version file inside the install tree.
    pub fn version_file_path(&self) -> PathBuf {
        self.install_dir.join(&self.version_file)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> TollgateResult<()> {
        if self.app_name.trim().is_empty() {
            return Err(TollgateError::ConfigError(
                "app_name cannot be empty".to_string(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(TollgateError::ConfigError(
                "namespace cannot be empty".to_string(),
            ));
        }
        if self.version_file.trim().is_empty() {
            return Err(TollgateError::ConfigError(
                "version_file cannot be empty".to_string(),
            ));
        }
        if self.max_redirects == 0 {
            return Err(TollgateError::ConfigError(
                "max_redirects must be at least 1".to_string(),
            ));
        }

        for (name, url) in [
            ("manifest_url", &self.manifest_url),
            ("license_server_url", &self.license_server_url),
        ] {
            if let Some(url) = url {
                reqwest::Url::parse(url).map_err(|e| {
                    TollgateError::ConfigError(format!("{} is not a valid URL: {}", name, e))
                })?;
            }
        }

        // Backups inside the tree they protect would be overwritten by a restore.
        let root = self.data_root()?;
        if root.starts_with(&self.install_dir) {
            return Err(TollgateError::ConfigError(format!(
                "data directory {} must not be inside install_dir {}",
                root.display(),
                self.install_dir.display()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TollgateConfig {
        TollgateConfig::new("sakura-pos", "1.2.0", "/opt/sakura")
            .unwrap()
            .with_data_dir("/var/lib/sakura-state")
    }

    #[test]
    fn defaults() {
        let config = TollgateConfig::new("sakura-pos", "1.2.0", "/opt/sakura").unwrap();
        assert_eq!(config.namespace, "sakura-pos");
        assert_eq!(config.version_file, "package.json");
        assert_eq!(config.download_timeout, Duration::from_secs(300));
        assert_eq!(config.manifest_timeout, Duration::from_secs(10));
        assert_eq!(config.max_redirects, 5);
        assert_eq!(config.check_interval, Duration::from_secs(1800));
        assert!(config.rollback_on_failure);
        assert!(config.license_server_url.is_none());
    }

    #[test]
    fn derived_paths_live_under_data_root() {
        let config = config();
        let root = PathBuf::from("/var/lib/sakura-state");
        assert_eq!(config.license_path().unwrap(), root.join("license.dat"));
        assert_eq!(config.backups_dir().unwrap(), root.join("backups"));
        assert_eq!(config.logs_dir().unwrap(), root.join("update-logs"));
        assert_eq!(config.downloads_dir().unwrap(), root.join("updates"));
        assert_eq!(config.staging_dir().unwrap(), root.join("staging"));
        assert_eq!(
            config.version_file_path(),
            PathBuf::from("/opt/sakura/package.json")
        );
    }

    #[test]
    fn validate_ok() {
        let config = config()
            .with_manifest_url("https://updates.example.com/update.json")
            .with_license_server("https://license.example.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_empty_namespace() {
        let config = config().with_namespace("  ");
        assert!(matches!(
            config.validate(),
            Err(TollgateError::ConfigError(_))
        ));
    }

    #[test]
    fn validate_bad_url() {
        let config = config().with_manifest_url("not a url");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("manifest_url"));
    }

    #[test]
    fn validate_rejects_state_inside_install_dir() {
        let config = config().with_data_dir("/opt/sakura/state");
        assert!(matches!(
            config.validate(),
            Err(TollgateError::ConfigError(_))
        ));
    }
}
