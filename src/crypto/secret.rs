//! Build-time license secret.
//!
//! The secret is compiled into the binary. Anyone holding the binary or the
//! source can recover it, so it only deters casual inspection of the license
//! file and casual key sharing; it is not a cryptographic boundary.

use crate::{TollgateError, TollgateResult};
use sha2::{Digest, Sha256};
use std::fmt;

/// Well-known secret used by debug builds and tests.
pub const DEVELOPMENT_SECRET: &str = "DEV_SECRET_KEY_TOLLGATE_POS_2025";

/// Secret mixed into license tokens and used to derive the store key.
#[derive(Clone, PartialEq, Eq)]
pub struct BuildSecret {
    value: String,
    production: bool,
}

impl BuildSecret {
    /// The development secret. Never depends on production material.
    pub fn development() -> Self {
        Self {
            value: DEVELOPMENT_SECRET.to_string(),
            production: false,
        }
    }

    /// The production secret, taken from `TOLLGATE_LICENSE_SECRET` at
    /// compile time.
    pub fn production() -> TollgateResult<Self> {
        match option_env!("TOLLGATE_LICENSE_SECRET") {
            Some(value) if !value.is_empty() => Ok(Self {
                value: value.to_string(),
                production: true,
            }),
            _ => Err(TollgateError::ConfigError(
                "TOLLGATE_LICENSE_SECRET was not set when this release was built".to_string(),
            )),
        }
    }

    /// Development secret for debug builds, production secret otherwise.
    pub fn for_build() -> TollgateResult<Self> {
        if cfg!(debug_assertions) {
            Ok(Self::development())
        } else {
            Self::production()
        }
    }

    /// An explicit secret, for embedding applications with their own
    /// build pipeline.
    pub fn custom(value: impl Into<String>) -> TollgateResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(TollgateError::ConfigError(
                "license secret cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            value,
            production: true,
        })
    }

    /// Raw secret value.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Whether this is anything other than the development secret.
    pub fn is_production(&self) -> bool {
        self.production
    }

    /// 256-bit key for the license store, SHA-256 of the secret.
    pub fn store_key(&self) -> [u8; 32] {
        Sha256::digest(self.value.as_bytes()).into()
    }
}

impl fmt::Debug for BuildSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildSecret")
            .field("production", &self.production)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_secret_is_well_known() {
        let secret = BuildSecret::development();
        assert_eq!(secret.expose(), DEVELOPMENT_SECRET);
        assert!(!secret.is_production());
    }

    #[test]
    fn debug_builds_use_development_secret() {
        if cfg!(debug_assertions) {
            assert_eq!(BuildSecret::for_build().unwrap(), BuildSecret::development());
        }
    }

    #[test]
    fn custom_secret_rejects_empty() {
        assert!(BuildSecret::custom("").is_err());
        assert!(BuildSecret::custom("s3cret").unwrap().is_production());
    }

    #[test]
    fn store_key_is_deterministic_per_secret() {
        let a = BuildSecret::custom("one").unwrap();
        let b = BuildSecret::custom("two").unwrap();
        assert_eq!(a.store_key(), a.store_key());
        assert_ne!(a.store_key(), b.store_key());
    }

    #[test]
    fn debug_output_redacts_value() {
        let rendered = format!("{:?}", BuildSecret::development());
        assert!(!rendered.contains(DEVELOPMENT_SECRET));
    }
}
