//! Archive download with manual redirects, a hard timeout, progress and
//! cancellation.
//!
//! Bytes stream into `<name>.part`. The final name only ever holds a
//! complete, size-checked (and checksum-checked, when known) file.

use crate::client::http::HttpClient;
use crate::config::TollgateConfig;
use crate::crypto::digest::verify_sha256_file;
use crate::update::decision::UpdateDecision;
use crate::{TollgateError, TollgateResult};
use futures::StreamExt;
use reqwest::header::{LOCATION, USER_AGENT};
use reqwest::{StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Archive URL.
    pub url: String,
    /// File name inside the downloads directory.
    pub file_name: String,
    /// Size announced by the manifest.
    pub expected_size: Option<u64>,
    /// Hex SHA-256 announced by the manifest.
    pub checksum: Option<String>,
}

impl DownloadRequest {
    /// Request for `url`, naming the file after the last path segment.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let file_name = file_name_from_url(&url).unwrap_or_else(|| "update.zip".to_string());
        Self {
            url,
            file_name,
            expected_size: None,
            checksum: None,
        }
    }

    /// Request for the archive an update decision points at.
    pub fn from_decision(decision: &UpdateDecision) -> TollgateResult<Self> {
        let url = decision.download_url.clone().ok_or_else(|| {
            TollgateError::InvalidInput("update has no download URL".to_string())
        })?;

        let mut request = Self::new(url);
        if file_name_from_url(&request.url).is_none() {
            request.file_name = format!("update-{}.zip", decision.version);
        }
        request.expected_size = Some(decision.size).filter(|s| *s > 0);
        request.checksum = decision.checksum.clone();
        Ok(request)
    }
}

fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.last()?.to_string();
    let safe = !name.is_empty() && !name.contains("..") && !name.contains('\\');
    safe.then_some(name)
}

/// How a download ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The archive is at `path`.
    Completed {
        /// Final file.
        path: PathBuf,
        /// Bytes written.
        size: u64,
    },
    /// The server has no such file. The user can fetch it by hand.
    ManualDownload {
        /// URL to open in a browser.
        url: String,
    },
}

enum Transfer {
    Done(u64),
    NotFound,
}

/// Streams update archives to disk.
#[derive(Clone)]
pub struct Fetcher {
    http: HttpClient,
    dest_dir: PathBuf,
    timeout: Duration,
    max_redirects: usize,
}

impl Fetcher {
    /// Fetcher writing to the configured downloads directory.
    pub fn new(config: &TollgateConfig) -> TollgateResult<Self> {
        Ok(Self::with_settings(
            HttpClient::without_redirects(config)?,
            config.downloads_dir()?,
            config.download_timeout,
            config.max_redirects,
        ))
    }

    /// Fetcher with explicit settings. `http` must not follow redirects.
    pub fn with_settings(
        http: HttpClient,
        dest_dir: impl Into<PathBuf>,
        timeout: Duration,
        max_redirects: usize,
    ) -> Self {
        Self {
            http,
            dest_dir: dest_dir.into(),
            timeout,
            max_redirects,
        }
    }

    /// Directory archives land in.
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Download `request`, publishing percent complete on `progress`.
    ///
    /// Progress is only published when the total size is known. On timeout,
    /// cancellation or any error the partial file is removed.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
        progress: &watch::Sender<Option<u8>>,
    ) -> TollgateResult<DownloadOutcome> {
        tokio::fs::create_dir_all(&self.dest_dir).await.map_err(|e| {
            TollgateError::DownloadFailed(format!("Failed to create downloads dir: {}", e))
        })?;

        let final_path = self.dest_dir.join(&request.file_name);
        let part_path = self.dest_dir.join(format!("{}.part", request.file_name));

        tracing::info!(url = %request.url, "Downloading update");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TollgateError::DownloadCancelled),
            outcome = tokio::time::timeout(self.timeout, self.transfer(request, &part_path, progress)) => {
                outcome.unwrap_or(Err(TollgateError::DownloadTimeout {
                    seconds: self.timeout.as_secs(),
                }))
            }
        };

        let result = match result {
            Ok(Transfer::Done(size)) => self.finish(request, &part_path, &final_path, size).await,
            Ok(Transfer::NotFound) => {
                tracing::warn!(url = %request.url, "Update archive not found, manual download required");
                Ok(DownloadOutcome::ManualDownload {
                    url: request.url.clone(),
                })
            }
            Err(e) => Err(e),
        };

        if result.is_err() {
            remove_quietly(&part_path).await;
        }
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Download failed");
        }
        result
    }

    async fn transfer(
        &self,
        request: &DownloadRequest,
        part_path: &Path,
        progress: &watch::Sender<Option<u8>>,
    ) -> TollgateResult<Transfer> {
        let mut url = Url::parse(&request.url)
            .map_err(|e| TollgateError::InvalidInput(format!("Invalid download URL: {}", e)))?;
        let mut hops = 0usize;

        let response = loop {
            let response = self
                .http
                .inner()
                .get(url.clone())
                .header(USER_AGENT, self.http.user_agent())
                .send()
                .await
                .map_err(|e| TollgateError::DownloadFailed(format!("Request failed: {}", e)))?;

            if !response.status().is_redirection() {
                break response;
            }

            if hops >= self.max_redirects {
                return Err(TollgateError::TooManyRedirects {
                    limit: self.max_redirects,
                });
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .ok_or(TollgateError::RedirectWithoutLocation)?;
            url = url
                .join(location)
                .map_err(|_| TollgateError::RedirectWithoutLocation)?;
            hops += 1;
            tracing::debug!(to = %url, hop = hops, "Following redirect");
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Transfer::NotFound);
        }
        if !status.is_success() {
            return Err(TollgateError::DownloadFailed(format!("HTTP {}", status)));
        }

        let content_length = response.content_length();
        let total = content_length.or(request.expected_size).filter(|t| *t > 0);

        let mut file = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| TollgateError::DownloadFailed(format!("Failed to create file: {}", e)))?;

        let mut downloaded: u64 = 0;
        let mut last_percent: Option<u8> = None;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| TollgateError::DownloadFailed(format!("Transfer interrupted: {}", e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TollgateError::DownloadFailed(format!("Failed to write: {}", e)))?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total {
                let percent = (downloaded.saturating_mul(100) / total).min(100) as u8;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    progress.send_replace(Some(percent));
                }
            }
        }

        file.flush()
            .await
            .and(file.sync_all().await)
            .map_err(|e| TollgateError::DownloadFailed(format!("Failed to flush: {}", e)))?;

        for expected in [content_length, request.expected_size].into_iter().flatten() {
            if expected != downloaded {
                return Err(TollgateError::SizeMismatch {
                    expected,
                    actual: downloaded,
                });
            }
        }

        Ok(Transfer::Done(downloaded))
    }

    async fn finish(
        &self,
        request: &DownloadRequest,
        part_path: &Path,
        final_path: &Path,
        size: u64,
    ) -> TollgateResult<DownloadOutcome> {
        if let Some(expected) = &request.checksum {
            verify_sha256_file(part_path, expected).await?;
        }

        tokio::fs::rename(part_path, final_path)
            .await
            .map_err(|e| TollgateError::DownloadFailed(format!("Failed to finalize download: {}", e)))?;

        tracing::info!(path = %final_path.display(), size, "Download complete");
        Ok(DownloadOutcome::Completed {
            path: final_path.to_path_buf(),
            size,
        })
    }

    /// Spawn the download on the current tokio runtime.
    pub fn start(&self, request: DownloadRequest) -> DownloadHandle {
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let fetcher = self.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move { fetcher.download(&request, &token, &tx).await });

        DownloadHandle {
            progress: rx,
            cancel,
            task,
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial download");
        }
    }
}

/// A download running in the background.
pub struct DownloadHandle {
    progress: watch::Receiver<Option<u8>>,
    cancel: CancellationToken,
    task: JoinHandle<TollgateResult<DownloadOutcome>>,
}

impl DownloadHandle {
    /// Percent complete; stays `None` while the total size is unknown.
    pub fn progress(&self) -> watch::Receiver<Option<u8>> {
        self.progress.clone()
    }

    /// Ask the download to stop. The partial file is removed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this download.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the download to finish.
    pub async fn wait(self) -> TollgateResult<DownloadOutcome> {
        self.task
            .await
            .map_err(|e| TollgateError::DownloadFailed(format!("Download task failed: {}", e)))?
    }
}
