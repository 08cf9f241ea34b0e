//! Semantic version triple and comparison.
//!
//! Versions gate whether code on disk gets overwritten, so comparison is
//! always numeric on `(major, minor, patch)`; `"10.0.0"` sorts after
//! `"9.9.9"`.

use crate::{TollgateError, TollgateResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A `MAJOR.MINOR.PATCH` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl Version {
    /// `0.0.0`, the implicit minimum version.
    pub const ZERO: Version = Version::new(0, 0, 0);

    /// Build a version from its components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse exactly `\d+\.\d+\.\d+`.
    pub fn parse_strict(input: &str) -> TollgateResult<Self> {
        let parts: Vec<&str> = input.trim().split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| !is_numeric(p)) {
            return Err(TollgateError::InvalidVersion(input.to_string()));
        }

        let component = |s: &str| {
            s.parse::<u64>()
                .map_err(|_| TollgateError::InvalidVersion(input.to_string()))
        };

        Ok(Self::new(
            component(parts[0])?,
            component(parts[1])?,
            component(parts[2])?,
        ))
    }

    /// Best-effort parse that never fails.
    ///
    /// A leading `v` and any `-prerelease`/`+build` suffix are dropped.
    /// Missing or non-numeric components become 0. Input that is not strict
    /// semver is logged at warn level.
    pub fn parse_lenient(input: &str) -> Self {
        if let Ok(v) = Self::parse_strict(input) {
            return v;
        }

        tracing::warn!(version = input, "Malformed version, using best-effort parse");

        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed
            .split(|c: char| c == '-' || c == '+')
            .next()
            .unwrap_or_default();

        let mut parts = core
            .split('.')
            .map(|s| leading_number(s).unwrap_or(0));

        Self::new(
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        )
    }

    /// Whether `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn leading_number(s: &str) -> Option<u64> {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_strict(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse_lenient(&raw))
    }
}

/// Compare two version strings numerically.
///
/// Never fails; malformed input is parsed best-effort.
pub fn compare(a: &str, b: &str) -> Ordering {
    Version::parse_lenient(a).cmp(&Version::parse_lenient(b))
}

/// Compare two version strings, returning `-1`, `0` or `1`.
pub fn compare_versions(a: &str, b: &str) -> i8 {
    match compare(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_not_lexicographic() {
        assert_eq!(compare_versions("10.0.0", "9.9.9"), 1);
        assert_eq!(compare_versions("9.9.9", "10.0.0"), -1);
        assert_eq!(compare_versions("1.10.0", "1.9.0"), 1);
    }

    #[test]
    fn short_circuits_on_first_difference() {
        assert_eq!(compare_versions("2.0.0", "1.99.99"), 1);
        assert_eq!(compare_versions("1.2.0", "1.1.99"), 1);
        assert_eq!(compare_versions("1.1.2", "1.1.10"), -1);
    }

    #[test]
    fn reflexive_antisymmetric_transitive() {
        let samples = ["0.0.0", "0.0.1", "0.1.0", "1.0.0", "1.2.3", "2.0.0", "10.0.0"];
        for a in samples {
            assert_eq!(compare_versions(a, a), 0);
            for b in samples {
                assert_eq!(compare_versions(a, b), -compare_versions(b, a));
                for c in samples {
                    if compare_versions(a, b) < 0 && compare_versions(b, c) < 0 {
                        assert_eq!(compare_versions(a, c), -1, "{a} < {b} < {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn missing_components_default_to_zero() {
        assert_eq!(Version::parse_lenient("2"), Version::new(2, 0, 0));
        assert_eq!(Version::parse_lenient("2.1"), Version::new(2, 1, 0));
        assert_eq!(compare_versions("2.1", "2.1.0"), 0);
    }

    #[test]
    fn lenient_parse_tolerates_garbage() {
        assert_eq!(Version::parse_lenient("v3.4.5"), Version::new(3, 4, 5));
        assert_eq!(Version::parse_lenient("1.2.3-beta.1"), Version::new(1, 2, 3));
        assert_eq!(Version::parse_lenient("abc"), Version::ZERO);
        assert_eq!(Version::parse_lenient(""), Version::ZERO);
        assert_eq!(Version::parse_lenient("1.x.7"), Version::new(1, 0, 7));
    }

    #[test]
    fn strict_parse_rejects_non_semver() {
        assert!(Version::parse_strict("1.2").is_err());
        assert!(Version::parse_strict("1.2.3.4").is_err());
        assert!(Version::parse_strict("v1.2.3").is_err());
        assert!(Version::parse_strict("1.2.x").is_err());
        assert_eq!(Version::parse_strict("1.2.3").unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn serde_uses_dotted_string() {
        let v = Version::new(2, 1, 0);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"2.1.0\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
