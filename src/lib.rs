//! # Tollgate
//!
//! **Offline license gate and self-update pipeline for desktop installs.**
//!
//! Tollgate keeps a point-of-sale style application licensed to one machine
//! and moves it forward from one version to the next, without ever leaving
//! the install tree half-updated.
//!
//! ## Features
//!
//! - **Hardware-bound activation**: tokens derive from the machine id, the
//!   license key and a build secret, and are sealed with AES-256-GCM on disk
//! - **Optional remote gate**: a hashed MAC address is checked against a
//!   license server; the server failing to confirm means no access
//! - **Two update channels**: an HTTP manifest or a removable drive
//! - **Guarded downloads**: manual redirects, a hard timeout, progress,
//!   cancellation, size and SHA-256 checks
//! - **Backup, apply, restore**: every apply is preceded by a snapshot;
//!   downgrades are refused; failures roll back
//! - **Update log**: one JSON file per operation
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate::{AppContext, LoggingGate, TollgateConfig};
//!
//! # async fn run() -> Result<(), tollgate::TollgateError> {
//! let config = TollgateConfig::new("sakura-pos", "2.0.0", "/opt/sakura-pos")?
//!     .with_manifest_url("https://updates.example.com/update.json");
//!
//! let context = Arc::new(AppContext::new(config, Arc::new(LoggingGate))?);
//!
//! if !context.check_license().await.valid {
//!     context.activate_license("SAKURA-XXXX-XXXX").await?;
//! }
//!
//! let decision = context.check_for_update().await?;
//! if decision.available {
//!     let handle = context.updates().start_download(&decision)?;
//!     let outcome = handle.wait().await?;
//!     println!("{:?}", outcome);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Threat Model
//!
//! Tollgate protects against:
//! - **License copying**: a license file moved to another machine fails the
//!   hardware check
//! - **File tampering**: a modified license file fails authenticated decryption
//! - **Corrupt downloads**: size and checksum are verified before an archive
//!   gets its final name
//!
//! Tollgate does **not** prevent binary patching. The build secret ships
//! inside the binary.
//!
//! See [`TollgateConfig`] for configuration.

#![warn(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;
pub mod version;

// Crypto layer
pub mod crypto;

// Protocol layer
pub mod protocol;

// Client layer
pub mod client;

// License layer
pub mod license;

// Update pipeline
pub mod fsutil;
pub mod update;

// Application state
pub mod context;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::TollgateConfig;
pub use context::{AppContext, BlockReason, InteractionGate, LoggingGate, UpdatePayload};
pub use crypto::secret::BuildSecret;
pub use errors::{TollgateError, TollgateResult};
pub use license::verifier::{LicenseFailure, LicenseStatus, LicenseVerdict, LicenseVerifier};
pub use protocol::models::UpdateManifest;
pub use update::backup::{ApplyReport, BackupSnapshot, RestoreReport};
pub use update::decision::{UpdateDecision, UpdateKind};
pub use update::fetch::{DownloadHandle, DownloadOutcome};
pub use update::manager::UpdateManager;
pub use version::Version;

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
