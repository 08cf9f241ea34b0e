//! Hardware identifier used to bind a license to one machine.
//!
//! The platform machine id is read once per process and hashed; the raw
//! value never leaves this module.

use crate::crypto::digest::sha256_hex;
use crate::TollgateResult;
use once_cell::sync::OnceCell;
use std::fmt;

/// How much the identifier can be trusted to be unique and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrength {
    /// Derived from the OS machine id.
    Platform,
    /// Derived from OS, architecture and home directory. Collides easily.
    Fallback,
}

/// A hashed hardware identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct HardwareId {
    value: String,
    strength: IdStrength,
}

impl HardwareId {
    /// Wrap an already-hashed identifier.
    pub fn new(value: impl Into<String>, strength: IdStrength) -> Self {
        Self {
            value: value.into(),
            strength,
        }
    }

    /// Hashed identifier.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Source quality.
    pub fn strength(&self) -> IdStrength {
        self.strength
    }
}

impl fmt::Debug for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareId")
            .field("value", &&self.value[..12.min(self.value.len())])
            .field("strength", &self.strength)
            .finish()
    }
}

/// Anything that can name the current machine.
pub trait HardwareIdSource: Send + Sync {
    /// Identifier of the current machine.
    fn hardware_id(&self) -> TollgateResult<HardwareId>;
}

/// Reads the OS machine id, cached for the life of the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHardwareId;

static SYSTEM_ID: OnceCell<HardwareId> = OnceCell::new();

impl HardwareIdSource for SystemHardwareId {
    fn hardware_id(&self) -> TollgateResult<HardwareId> {
        Ok(SYSTEM_ID.get_or_init(detect).clone())
    }
}

/// Fixed identifier, for tests and for hosts that supply their own.
#[derive(Debug, Clone)]
pub struct StaticHardwareId(HardwareId);

impl StaticHardwareId {
    /// Use `value` verbatim as a platform-strength id.
    pub fn new(value: impl Into<String>) -> Self {
        Self(HardwareId::new(value, IdStrength::Platform))
    }
}

impl HardwareIdSource for StaticHardwareId {
    fn hardware_id(&self) -> TollgateResult<HardwareId> {
        Ok(self.0.clone())
    }
}

fn detect() -> HardwareId {
    if let Some(raw) = platform_machine_id() {
        tracing::debug!("Using platform machine id");
        return HardwareId::new(sha256_hex(raw.as_bytes()), IdStrength::Platform);
    }

    tracing::warn!("Platform machine id unavailable, using weaker fallback identifier");
    HardwareId::new(fallback_id(), IdStrength::Fallback)
}

fn fallback_id() -> String {
    let home = dirs::home_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seed = format!("{}-{}-{}", std::env::consts::OS, std::env::consts::ARCH, home);
    sha256_hex(seed.as_bytes())[..32].to_string()
}

#[cfg(target_os = "linux")]
fn platform_machine_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

#[cfg(target_os = "macos")]
fn platform_machine_id() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|l| l.contains("IOPlatformUUID"))
        .and_then(|l| l.split('"').nth(3))
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

#[cfg(target_os = "windows")]
fn platform_machine_id() -> Option<String> {
    let output = std::process::Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|l| l.contains("MachineGuid"))
        .and_then(|l| l.split_whitespace().last())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn platform_machine_id() -> Option<String> {
    None
}
