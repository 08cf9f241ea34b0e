//! Remote license gate keyed on a hashed MAC address.
//!
//! Fails closed: if the server cannot confirm the license, the verdict is
//! invalid.

use crate::client::http::HttpClient;
use crate::config::TollgateConfig;
use crate::crypto::digest::sha256_hex;
use crate::crypto::secret::BuildSecret;
use crate::license::verifier::{LicenseFailure, LicenseVerdict};
use crate::protocol::models::{parse_license_check_response, LicenseCheckRequest};
use crate::{TollgateError, TollgateResult};
use std::time::Duration;

/// Client for `POST <server>/license/check`.
pub struct RemoteLicenseClient {
    http: HttpClient,
    endpoint: String,
    secret: BuildSecret,
    timeout: Duration,
}

impl RemoteLicenseClient {
    /// Create a client for the configured license server.
    ///
    /// Fails with `ConfigError` when no server is configured.
    pub fn new(config: &TollgateConfig) -> TollgateResult<Self> {
        let server = config.license_server_url.as_deref().ok_or_else(|| {
            TollgateError::ConfigError("license_server_url is not set".to_string())
        })?;

        Ok(Self {
            http: HttpClient::new(config)?,
            endpoint: format!("{}/license/check", server.trim_end_matches('/')),
            secret: config.secret.clone(),
            timeout: config.license_timeout,
        })
    }

    /// Full URL of the check endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ask the server whether this machine is licensed for `app` at `version`.
    pub async fn check(&self, app: &str, version: &str) -> LicenseVerdict {
        let mac = machine_address();
        self.check_with_address(&mac, app, version).await
    }

    /// Same as [`check`](Self::check) with an explicit hardware address.
    pub async fn check_with_address(&self, mac: &str, app: &str, version: &str) -> LicenseVerdict {
        let request = LicenseCheckRequest {
            mac: hash_mac(mac, &self.secret),
            app: app.to_string(),
            version: version.to_string(),
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            mac_hash = %&request.mac[..16],
            "Checking license with server"
        );

        let response = match self.http.post_json(&self.endpoint, &request, self.timeout).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "License server unreachable");
                return LicenseVerdict::invalid(
                    LicenseFailure::NetworkError,
                    "could not reach the license server",
                );
            }
        };

        if !response.is_success() {
            tracing::warn!(status = response.status, "License server returned an error");
            return LicenseVerdict::invalid(
                LicenseFailure::CheckError,
                format!("license server returned HTTP {}", response.status),
            );
        }

        let body = match parse_license_check_response(&response.body) {
            Ok(body) => body,
            Err(e) => return LicenseVerdict::invalid(LicenseFailure::CheckError, e.to_string()),
        };

        let mut verdict = if body.is_valid() {
            LicenseVerdict::valid()
        } else {
            // Server reasons outside our taxonomy still deny access.
            let message = match (body.reason.as_deref(), body.message.as_deref()) {
                (Some(r), Some(m)) => format!("{}: {}", r, m),
                (Some(r), None) => r.to_string(),
                (None, Some(m)) => m.to_string(),
                (None, None) => "license rejected".to_string(),
            };
            LicenseVerdict::invalid(LicenseFailure::LicenseInvalid, message)
        };
        verdict.expires = body.expires;
        verdict.days_remaining = body.days_remaining;

        tracing::info!(valid = verdict.valid, "License server responded");
        verdict
    }
}

/// `sha256(mac + secret)`, hex encoded.
pub fn hash_mac(mac: &str, secret: &BuildSecret) -> String {
    sha256_hex(format!("{}{}", mac, secret.expose()).as_bytes())
}

/// First non-loopback, non-zero MAC address, or the hostname when none is
/// readable.
pub fn machine_address() -> String {
    first_mac_address().unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string())
    })
}

fn first_mac_address() -> Option<String> {
    match mac_address::get_mac_address() {
        Ok(Some(mac)) => format_mac(mac.bytes()),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(error = %e, "MAC address lookup failed");
            None
        }
    }
}

/// Lowercase, colon separated. The all-zero address counts as absent.
fn format_mac(bytes: [u8; 6]) -> Option<String> {
    if bytes == [0; 6] {
        return None;
    }
    let parts: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    Some(parts.join(":"))
}
