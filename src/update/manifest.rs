//! Manifest sources.
//!
//! Two channels publish the same manifest shape: an HTTP endpoint and a
//! removable drive. Callers pick one per check through [`UpdateSource`].

use crate::client::http::HttpClient;
use crate::config::TollgateConfig;
use crate::protocol::models::{parse_manifest, UpdateManifest};
use crate::update::media::MediaSource;
use crate::{TollgateError, TollgateResult};
use std::time::Duration;

/// Manifest served over HTTP.
pub struct HttpManifestSource {
    http: HttpClient,
    url: String,
    timeout: Duration,
}

impl HttpManifestSource {
    /// Source for the configured manifest URL.
    pub fn new(config: &TollgateConfig) -> TollgateResult<Self> {
        let url = config
            .manifest_url
            .clone()
            .ok_or_else(|| TollgateError::ConfigError("manifest_url is not set".to_string()))?;

        Ok(Self {
            http: HttpClient::new(config)?,
            url,
            timeout: config.manifest_timeout,
        })
    }

    /// Manifest URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Download and validate the manifest.
    ///
    /// Transport failures and non-2xx statuses are `Network`; a body that is
    /// not a valid manifest is `ManifestInvalid`.
    pub async fn fetch(&self) -> TollgateResult<UpdateManifest> {
        tracing::debug!(url = %self.url, "Fetching update manifest");
        let response = self.http.get(&self.url, self.timeout).await?;

        if !response.is_success() {
            return Err(TollgateError::Network(format!(
                "manifest request returned HTTP {}",
                response.status
            )));
        }

        let manifest = parse_manifest(&response.body)?;
        tracing::info!(version = %manifest.version, "Update manifest fetched");
        Ok(manifest)
    }
}

/// Where a manifest comes from.
pub enum UpdateSource {
    /// HTTP endpoint.
    Http(HttpManifestSource),
    /// Removable drive.
    Media(MediaSource),
}

impl UpdateSource {
    /// Fetch the manifest.
    ///
    /// `Ok(None)` only for a medium that carries no update; an HTTP source
    /// either yields a manifest or fails.
    pub async fn fetch_manifest(&self) -> TollgateResult<Option<UpdateManifest>> {
        match self {
            Self::Http(source) => source.fetch().await.map(Some),
            Self::Media(source) => Ok(source.fetch().await?.map(|update| update.manifest)),
        }
    }

    /// Human-readable location.
    pub fn describe(&self) -> String {
        match self {
            Self::Http(source) => source.url().to_string(),
            Self::Media(source) => source.root().display().to_string(),
        }
    }
}
