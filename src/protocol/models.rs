//! Wire formats: the update manifest and the remote license check.
//!
//! Both come from outside the process and are validated field by field
//! before anything else sees them.

use crate::version::Version;
use crate::{TollgateError, TollgateResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Release description published next to an update archive.
///
/// Served as `update.json` over HTTP and as `update-info.json` on
/// removable media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    /// Version offered.
    pub version: Version,

    /// Oldest installed version allowed to keep running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<Version>,

    /// Where to download the archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// Archive size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Publication timestamp, free-form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,

    /// Human-readable change list.
    pub changelog: Vec<String>,

    /// Whether the application must restart after applying.
    pub requires_restart: bool,

    /// Short description of the release.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Hex SHA-256 of the archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Files shipped in the release, informational.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl UpdateManifest {
    /// Minimal manifest for `version` with every optional field unset.
    pub fn new(version: Version) -> Self {
        Self {
            version,
            min_version: None,
            download_url: None,
            size: None,
            release_date: None,
            changelog: Vec::new(),
            requires_restart: true,
            description: None,
            checksum: None,
            files: Vec::new(),
        }
    }

    /// Validate an already-decoded JSON value.
    pub fn from_value(value: &Value) -> TollgateResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| invalid("manifest is not a JSON object"))?;

        let version = match obj.get("version") {
            Some(Value::String(s)) if !s.trim().is_empty() => Version::parse_lenient(s),
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(invalid("missing version"))
            }
            Some(_) => return Err(invalid("version must be a string")),
        };

        let min_version = opt_string(obj, "minVersion")?.map(|s| Version::parse_lenient(&s));
        let download_url = opt_string(obj, "downloadUrl")?;
        let size = opt_u64(obj, "size")?;
        let release_date = match opt_string(obj, "releaseDate")? {
            Some(d) => Some(d),
            None => opt_string(obj, "date")?,
        };
        let changelog = opt_string_list(obj, "changelog")?;
        let requires_restart = opt_bool(obj, "requiresRestart")?.unwrap_or(true);
        let description = opt_string(obj, "description")?;
        let checksum = opt_string(obj, "checksum")?
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty());
        if let Some(c) = &checksum {
            if c.len() != 64 || !c.chars().all(|ch| ch.is_ascii_hexdigit()) {
                return Err(invalid("checksum must be 64 hex characters"));
            }
        }
        let files = opt_string_list(obj, "files")?;

        Ok(Self {
            version,
            min_version,
            download_url,
            size,
            release_date,
            changelog,
            requires_restart,
            description,
            checksum,
            files,
        })
    }

    /// Serialize for publishing.
    pub fn to_json_pretty(&self) -> TollgateResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TollgateError::Archive(format!("Failed to serialize manifest: {}", e)))
    }
}

/// Parse and validate a manifest body.
pub fn parse_manifest(body: &[u8]) -> TollgateResult<UpdateManifest> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| TollgateError::ManifestInvalid(format!("Failed to parse JSON: {}", e)))?;
    UpdateManifest::from_value(&value)
}

fn invalid(msg: &str) -> TollgateError {
    TollgateError::ManifestInvalid(msg.to_string())
}

fn wrong_type(field: &str, expected: &str) -> TollgateError {
    TollgateError::ManifestInvalid(format!("{} must be {}", field, expected))
}

// JSON `null` counts as absent for every optional field.

fn opt_string(obj: &Map<String, Value>, field: &str) -> TollgateResult<Option<String>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(wrong_type(field, "a string")),
    }
}

fn opt_u64(obj: &Map<String, Value>, field: &str) -> TollgateResult<Option<u64>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| wrong_type(field, "a non-negative integer")),
    }
}

fn opt_bool(obj: &Map<String, Value>, field: &str) -> TollgateResult<Option<bool>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(wrong_type(field, "a boolean")),
    }
}

fn opt_string_list(obj: &Map<String, Value>, field: &str) -> TollgateResult<Vec<String>> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| wrong_type(field, "an array of strings"))
            })
            .collect(),
        Some(_) => Err(wrong_type(field, "an array of strings")),
    }
}

/// Body POSTed to the remote license gate.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseCheckRequest {
    /// Salted hash of the machine's MAC address.
    pub mac: String,
    /// Application name.
    pub app: String,
    /// Running version.
    pub version: String,
}

/// Raw remote license gate response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseCheckResponse {
    /// Only a literal `true` grants access.
    #[serde(default)]
    pub valid: Value,
    /// Server-side reason code.
    #[serde(default)]
    pub reason: Option<String>,
    /// Message for the operator.
    #[serde(default)]
    pub message: Option<String>,
    /// Expiry timestamp, free-form.
    #[serde(default)]
    pub expires: Option<String>,
    /// Days until expiry.
    #[serde(default)]
    pub days_remaining: Option<i64>,
}

impl LicenseCheckResponse {
    /// Whether the server granted access.
    pub fn is_valid(&self) -> bool {
        self.valid == Value::Bool(true)
    }
}

/// Parse a remote license gate response body.
pub fn parse_license_check_response(body: &[u8]) -> TollgateResult<LicenseCheckResponse> {
    serde_json::from_slice(body)
        .map_err(|e| TollgateError::InvalidInput(format!("Failed to parse license response: {}", e)))
}
