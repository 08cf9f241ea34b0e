//! Local license verification.
//!
//! Every check resolves to a definite verdict. Faults never escape as errors;
//! they become `Invalid(CHECK_ERROR)` so the caller can always decide.

use crate::clock::Clock;
use crate::config::TollgateConfig;
use crate::crypto::derive::derive_token;
use crate::crypto::secret::BuildSecret;
use crate::license::hardware::{HardwareId, HardwareIdSource, SystemHardwareId};
use crate::license::store::LicenseStore;
use crate::{TollgateError, TollgateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Why a license check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseFailure {
    /// No license is stored.
    LicenseNotFound,
    /// The stored license was activated on another machine.
    MachineIdMismatch,
    /// The stored token does not match, or the file failed its integrity check.
    LicenseInvalid,
    /// The remote gate could not be reached.
    NetworkError,
    /// Anything else went wrong while checking.
    CheckError,
}

impl LicenseFailure {
    /// Stable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LicenseNotFound => "LICENSE_NOT_FOUND",
            Self::MachineIdMismatch => "MACHINE_ID_MISMATCH",
            Self::LicenseInvalid => "LICENSE_INVALID",
            Self::NetworkError => "NETWORK_ERROR",
            Self::CheckError => "CHECK_ERROR",
        }
    }
}

impl fmt::Display for LicenseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// License state held by the application between checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LicenseStatus {
    /// No check has completed yet.
    #[default]
    Unchecked,
    /// The last check passed.
    Valid,
    /// The last check failed.
    Invalid(LicenseFailure),
}

impl LicenseStatus {
    /// Whether access should be granted.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Outcome of a license check, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseVerdict {
    /// Whether access is granted.
    pub valid: bool,

    /// Failure reason when not valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<LicenseFailure>,

    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Expiry reported by the remote gate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    /// Days until expiry reported by the remote gate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
}

impl LicenseVerdict {
    /// A passing verdict.
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
            message: None,
            expires: None,
            days_remaining: None,
        }
    }

    /// A failing verdict.
    pub fn invalid(reason: LicenseFailure, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            message: Some(message.into()),
            expires: None,
            days_remaining: None,
        }
    }

    /// Collapse to the state-machine status.
    pub fn status(&self) -> LicenseStatus {
        match (self.valid, self.reason) {
            (true, _) => LicenseStatus::Valid,
            (false, Some(reason)) => LicenseStatus::Invalid(reason),
            (false, None) => LicenseStatus::Invalid(LicenseFailure::CheckError),
        }
    }
}

/// What the application may show about the active license.
///
/// Never includes the license key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfo {
    /// Hardware id the license is bound to.
    pub hardware_id: String,
    /// Activation time.
    pub created_at: DateTime<Utc>,
    /// Whether the binding matches this machine.
    pub bound_to_this_machine: bool,
}

/// Hardware-bound local license verifier.
pub struct LicenseVerifier {
    store: LicenseStore,
    hardware: Arc<dyn HardwareIdSource>,
    secret: BuildSecret,
}

impl LicenseVerifier {
    /// Create a verifier for the configured store and this machine.
    pub fn new(config: &TollgateConfig, clock: Arc<dyn Clock>) -> TollgateResult<Self> {
        Ok(Self::with_parts(
            LicenseStore::new(config, clock)?,
            Arc::new(SystemHardwareId),
            config.secret.clone(),
        ))
    }

    /// Create a verifier from explicit parts.
    pub fn with_parts(
        store: LicenseStore,
        hardware: Arc<dyn HardwareIdSource>,
        secret: BuildSecret,
    ) -> Self {
        Self {
            store,
            hardware,
            secret,
        }
    }

    /// Identifier of the current machine.
    pub fn hardware_id(&self) -> TollgateResult<HardwareId> {
        self.hardware.hardware_id()
    }

    /// Check the stored license against this machine.
    pub fn verify(&self) -> LicenseVerdict {
        let verdict = match self.try_verify() {
            Ok(verdict) => verdict,
            Err(TollgateError::LicenseCorrupt) => {
                LicenseVerdict::invalid(LicenseFailure::LicenseInvalid, "integrity check failed")
            }
            Err(e) => LicenseVerdict::invalid(LicenseFailure::CheckError, e.to_string()),
        };

        match verdict.reason {
            None => tracing::info!("License valid"),
            Some(reason) => tracing::warn!(reason = %reason, "License check failed"),
        }
        verdict
    }

    fn try_verify(&self) -> TollgateResult<LicenseVerdict> {
        let current = self.hardware.hardware_id()?;

        let record = match self.store.load()? {
            Some(record) => record,
            None => {
                return Ok(LicenseVerdict::invalid(
                    LicenseFailure::LicenseNotFound,
                    "no license activated",
                ))
            }
        };

        if record.hardware_id != current.as_str() {
            return Ok(LicenseVerdict::invalid(
                LicenseFailure::MachineIdMismatch,
                "license was activated on another machine",
            ));
        }

        let expected = derive_token(current.as_str(), &record.license_key, &self.secret)?;
        if expected != record.token {
            return Ok(LicenseVerdict::invalid(
                LicenseFailure::LicenseInvalid,
                "license token does not match",
            ));
        }

        Ok(LicenseVerdict::valid())
    }

    /// Bind `license_key` to this machine and verify the result.
    pub fn activate(&self, license_key: &str) -> TollgateResult<LicenseVerdict> {
        let license_key = license_key.trim();
        if license_key.is_empty() {
            return Err(TollgateError::InvalidInput(
                "license key cannot be empty".to_string(),
            ));
        }

        let hardware_id = self.hardware.hardware_id()?;
        let token = derive_token(hardware_id.as_str(), license_key, &self.secret)?;
        self.store.save(token, hardware_id.as_str(), license_key)?;

        tracing::info!("License activated");
        Ok(self.verify())
    }

    /// Remove the stored license.
    pub fn deactivate(&self) -> TollgateResult<()> {
        self.store.clear()?;
        tracing::info!("License deactivated");
        Ok(())
    }

    /// Describe the stored license, if any.
    pub fn info(&self) -> TollgateResult<Option<LicenseInfo>> {
        let Some(record) = self.store.load()? else {
            return Ok(None);
        };
        let current = self.hardware.hardware_id()?;

        Ok(Some(LicenseInfo {
            bound_to_this_machine: record.hardware_id == current.as_str(),
            hardware_id: record.hardware_id,
            created_at: record.created_at,
        }))
    }
}
