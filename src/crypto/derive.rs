//! License token derivation.
//!
//! `token = hex(sha256("{hardware_id}:{license_key}:{secret}"))`. The token
//! is deterministic so verification recomputes and compares it instead of
//! trusting anything stored beside it.

use crate::crypto::digest::{constant_time_eq, sha256_hex};
use crate::crypto::secret::BuildSecret;
use crate::{TollgateError, TollgateResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, hardware-bound license token.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LicenseToken(String);

impl LicenseToken {
    /// Wrap a stored token string.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for LicenseToken {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl Eq for LicenseToken {}

impl fmt::Debug for LicenseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "LicenseToken({}…)", prefix)
    }
}

/// Derive the token binding `license_key` to `hardware_id`.
///
/// # Errors
/// `InvalidInput` when either the hardware id or the license key is empty.
pub fn derive_token(
    hardware_id: &str,
    license_key: &str,
    secret: &BuildSecret,
) -> TollgateResult<LicenseToken> {
    if hardware_id.is_empty() {
        return Err(TollgateError::InvalidInput(
            "hardware id cannot be empty".to_string(),
        ));
    }
    if license_key.is_empty() {
        return Err(TollgateError::InvalidInput(
            "license key cannot be empty".to_string(),
        ));
    }

    let combined = format!("{}:{}:{}", hardware_id, license_key, secret.expose());
    Ok(LicenseToken(sha256_hex(combined.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> BuildSecret {
        BuildSecret::development()
    }

    #[test]
    fn debug_shows_only_a_prefix() {
        let token = derive_token("hw-1", "KEY-1", &secret()).unwrap();
        let shown = format!("{:?}", token);
        assert!(shown.starts_with(&format!("LicenseToken({}", &token.as_str()[..8])));
        assert!(!shown.contains(token.as_str()));

        // Stored values are not guaranteed to be hex.
        let odd = LicenseToken::from_stored("ééééééééé");
        assert_eq!(format!("{:?}", odd), "LicenseToken(éééééééé…)");
        assert_eq!(format!("{:?}", LicenseToken::from_stored("")), "LicenseToken(…)");
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_token("hw-1", "KEY-1", &secret()).unwrap();
        let b = derive_token("hw-1", "KEY-1", &secret()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn every_input_changes_the_token() {
        let base = derive_token("hw-1", "KEY-1", &secret()).unwrap();
        let other_hw = derive_token("hw-2", "KEY-1", &secret()).unwrap();
        let other_key = derive_token("hw-1", "KEY-2", &secret()).unwrap();
        let other_secret =
            derive_token("hw-1", "KEY-1", &BuildSecret::custom("prod").unwrap()).unwrap();

        assert_ne!(base, other_hw);
        assert_ne!(base, other_key);
        assert_ne!(base, other_secret);
    }

    #[test]
    fn matches_documented_formula() {
        let token = derive_token("hw", "key", &secret()).unwrap();
        let expected = sha256_hex(format!("hw:key:{}", secret().expose()).as_bytes());
        assert_eq!(token.as_str(), expected);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(matches!(
            derive_token("", "KEY", &secret()),
            Err(TollgateError::InvalidInput(_))
        ));
        assert!(matches!(
            derive_token("hw", "", &secret()),
            Err(TollgateError::InvalidInput(_))
        ));
    }

    #[test]
    fn debug_does_not_leak_full_token() {
        let token = derive_token("hw", "key", &secret()).unwrap();
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains(token.as_str()));
    }
}
