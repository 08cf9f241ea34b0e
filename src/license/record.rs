//! Stored license record.
//!
//! The record holds the token together with the inputs it was derived from,
//! so verification can recompute the token instead of trusting it.

use crate::clock::Clock;
use crate::crypto::derive::LicenseToken;
use crate::crypto::sealed;
use crate::crypto::secret::BuildSecret;
use crate::{TollgateError, TollgateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current on-disk record layout.
pub const FORMAT_VERSION: u32 = 1;

/// License activation persisted on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    /// Token derived at activation time.
    pub token: LicenseToken,

    /// Hardware id the license was bound to.
    pub hardware_id: String,

    /// License key as entered by the user.
    pub license_key: String,

    /// When the license was activated.
    pub created_at: DateTime<Utc>,

    /// Layout version of this record.
    #[serde(default = "default_format_version")]
    pub format_version: u32,
}

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

impl LicenseRecord {
    /// Create a new record stamped with the current time.
    pub fn new(
        token: LicenseToken,
        hardware_id: impl Into<String>,
        license_key: impl Into<String>,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            token,
            hardware_id: hardware_id.into(),
            license_key: license_key.into(),
            created_at: clock.now_utc(),
            format_version: FORMAT_VERSION,
        }
    }

    /// Serialize and seal the record.
    pub fn seal(&self, secret: &BuildSecret) -> TollgateResult<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| TollgateError::LicenseIo(format!("Failed to serialize license: {}", e)))?;
        sealed::seal(&secret.store_key(), &json)
    }

    /// Open and parse a sealed record.
    ///
    /// Decryption and parse failures both surface as `LicenseCorrupt`.
    pub fn open(envelope: &str, secret: &BuildSecret) -> TollgateResult<Self> {
        let json = sealed::open(&secret.store_key(), envelope)?;
        serde_json::from_slice(&json).map_err(|_| TollgateError::LicenseCorrupt)
    }
}
