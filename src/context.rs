//! Application context: license state, update checks and the interaction gate.
//!
//! The presentation layer owns one `AppContext` and talks to it instead of
//! reading global flags. Whenever access has to be withheld, the context asks
//! the [`InteractionGate`] to block, and it lifts the block once nothing
//! stands in the way.

use crate::clock::{Clock, SystemClock};
use crate::config::TollgateConfig;
use crate::license::remote::RemoteLicenseClient;
use crate::license::verifier::{LicenseFailure, LicenseStatus, LicenseVerdict, LicenseVerifier};
use crate::update::backup::ApplyReport;
use crate::update::decision::UpdateDecision;
use crate::update::manager::UpdateManager;
use crate::version::Version;
use crate::TollgateResult;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Why normal use is being withheld.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The license check failed.
    License {
        /// Failure reason.
        reason: LicenseFailure,
        /// Detail for the user.
        message: String,
    },
    /// The installed version is below the supported minimum.
    MandatoryUpdate {
        /// Installed version.
        current: Version,
        /// Minimum supported version.
        required: Version,
        /// Version on offer.
        offered: Version,
    },
}

/// Whatever stops the user from interacting with the application.
///
/// Implementations usually disable input and show a modal; they must be
/// cheap and must not call back into the context.
pub trait InteractionGate: Send + Sync {
    /// Withhold normal use.
    fn block(&self, reason: BlockReason);

    /// Restore normal use.
    fn unblock(&self);
}

/// Gate that only logs. Useful for headless hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingGate;

impl InteractionGate for LoggingGate {
    fn block(&self, reason: BlockReason) {
        tracing::warn!(?reason, "Interaction blocked");
    }

    fn unblock(&self) {
        tracing::info!("Interaction unblocked");
    }
}

/// Where an update to apply lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdatePayload {
    /// An extracted tree, e.g. `update/` on a removable drive.
    Directory(PathBuf),
    /// A downloaded `update-X.Y.Z.zip`.
    Archive(PathBuf),
}

#[derive(Debug, Default)]
struct GateState {
    license: LicenseStatus,
    required: Option<Version>,
}

impl GateState {
    fn clear(&self) -> bool {
        !matches!(self.license, LicenseStatus::Invalid(_)) && self.required.is_none()
    }
}

/// Long-lived state shared with the presentation layer.
pub struct AppContext {
    config: TollgateConfig,
    verifier: LicenseVerifier,
    remote: Option<RemoteLicenseClient>,
    updates: Arc<UpdateManager>,
    gate: Arc<dyn InteractionGate>,
    state: Mutex<GateState>,
}

impl AppContext {
    /// Build a context for `config` with the system clock.
    ///
    /// The remote license gate is only wired up when `license_server_url`
    /// is set.
    pub fn new(config: TollgateConfig, gate: Arc<dyn InteractionGate>) -> TollgateResult<Self> {
        config.validate()?;
        Self::with_clock(config, gate, Arc::new(SystemClock))
    }

    /// Build a context with a custom clock (for testing).
    #[cfg(any(test, feature = "test-seams"))]
    pub fn new_with_clock(
        config: TollgateConfig,
        gate: Arc<dyn InteractionGate>,
        clock: Arc<dyn Clock>,
    ) -> TollgateResult<Self> {
        config.validate()?;
        Self::with_clock(config, gate, clock)
    }

    fn with_clock(
        config: TollgateConfig,
        gate: Arc<dyn InteractionGate>,
        clock: Arc<dyn Clock>,
    ) -> TollgateResult<Self> {
        let verifier = LicenseVerifier::new(&config, clock.clone())?;
        let remote = match config.license_server_url {
            Some(_) => Some(RemoteLicenseClient::new(&config)?),
            None => None,
        };
        let updates = Arc::new(UpdateManager::with_clock(config.clone(), clock)?);
        Ok(Self::with_parts(config, verifier, remote, updates, gate))
    }

    /// Assemble a context from explicit parts.
    pub fn with_parts(
        config: TollgateConfig,
        verifier: LicenseVerifier,
        remote: Option<RemoteLicenseClient>,
        updates: Arc<UpdateManager>,
        gate: Arc<dyn InteractionGate>,
    ) -> Self {
        Self {
            config,
            verifier,
            remote,
            updates,
            gate,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &TollgateConfig {
        &self.config
    }

    /// Local license verifier.
    pub fn verifier(&self) -> &LicenseVerifier {
        &self.verifier
    }

    /// Update manager.
    pub fn updates(&self) -> &Arc<UpdateManager> {
        &self.updates
    }

    /// Result of the last license check.
    pub fn license_status(&self) -> LicenseStatus {
        self.lock().license
    }

    /// Whether interaction is currently allowed.
    pub fn is_unblocked(&self) -> bool {
        self.lock().clear()
    }

    /// Run the license checks and update the gate.
    ///
    /// The local check always runs. When a license server is configured it
    /// must agree as well.
    pub async fn check_license(&self) -> LicenseVerdict {
        let local = self.verifier.verify();
        let verdict = match (&self.remote, local.valid) {
            (Some(remote), true) => {
                remote
                    .check(&self.config.app_name, &self.config.app_version)
                    .await
            }
            _ => local,
        };
        self.record_license(&verdict);
        verdict
    }

    /// Activate `license_key` on this machine, then re-check.
    pub async fn activate_license(&self, license_key: &str) -> TollgateResult<LicenseVerdict> {
        self.verifier.activate(license_key)?;
        Ok(self.check_license().await)
    }

    /// Check the configured manifest. A mandatory update blocks the gate.
    pub async fn check_for_update(&self) -> TollgateResult<UpdateDecision> {
        let decision = self.updates.check_for_update().await?;
        self.record_decision(&decision);
        Ok(decision)
    }

    /// Record a decision obtained elsewhere, e.g. from removable media.
    pub fn record_decision(&self, decision: &UpdateDecision) {
        if decision.required {
            self.lock().required = Some(decision.min_version);
            self.gate.block(BlockReason::MandatoryUpdate {
                current: decision.current_version,
                required: decision.min_version,
                offered: decision.version,
            });
        } else {
            let was_required = self.lock().required.take().is_some();
            if was_required {
                self.release_if_clear();
            }
        }
    }

    /// Apply `payload` as `candidate` and lift a mandatory-update block once
    /// the installed version satisfies it.
    pub async fn apply_update(
        &self,
        payload: UpdatePayload,
        candidate: &Version,
    ) -> TollgateResult<ApplyReport> {
        let report = match payload {
            UpdatePayload::Directory(dir) => self.updates.apply_from_directory(dir, candidate).await?,
            UpdatePayload::Archive(zip) => self.updates.apply_from_archive(zip, candidate).await?,
        };

        let installed = self.updates.installed_version();
        let satisfied = {
            let mut state = self.lock();
            match state.required {
                Some(required) if installed >= required => {
                    state.required = None;
                    true
                }
                _ => false,
            }
        };
        if satisfied {
            self.release_if_clear();
        }
        Ok(report)
    }

    /// Re-run [`check_for_update`](Self::check_for_update) every `interval`.
    ///
    /// The task ends when the handle is aborted or the context is dropped.
    /// The first check happens one interval after spawning.
    pub fn spawn_periodic_update_check(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let context = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(context) = context.upgrade() else {
                    tracing::debug!("Context dropped, stopping periodic update check");
                    break;
                };
                if let Err(e) = context.check_for_update().await {
                    tracing::warn!(error = %e, "Periodic update check failed");
                }
            }
        })
    }

    fn record_license(&self, verdict: &LicenseVerdict) {
        let status = verdict.status();
        self.lock().license = status;

        match status {
            LicenseStatus::Invalid(reason) => self.gate.block(BlockReason::License {
                reason,
                message: verdict.message.clone().unwrap_or_default(),
            }),
            _ => self.release_if_clear(),
        }
    }

    fn release_if_clear(&self) {
        if self.lock().clear() {
            self.gate.unblock();
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::license::hardware::StaticHardwareId;
    use crate::license::store::LicenseStore;
    use std::fs;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingGate {
        events: Mutex<Vec<Option<BlockReason>>>,
    }

    impl RecordingGate {
        fn events(&self) -> Vec<Option<BlockReason>> {
            self.events.lock().unwrap().clone()
        }
    }

    impl InteractionGate for RecordingGate {
        fn block(&self, reason: BlockReason) {
            self.events.lock().unwrap().push(Some(reason));
        }

        fn unblock(&self) {
            self.events.lock().unwrap().push(None);
        }
    }

    struct Fixture {
        dir: TempDir,
        gate: Arc<RecordingGate>,
        context: Arc<AppContext>,
    }

    fn fixture(configure: impl FnOnce(TollgateConfig) -> TollgateConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("app");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("package.json"), r#"{"version":"1.9.0"}"#).unwrap();

        let config = configure(
            TollgateConfig::new("sakura-pos", "1.9.0", &install)
                .unwrap()
                .with_data_dir(dir.path().join("state")),
        );
        let clock: Arc<dyn Clock> = Arc::new(MockClock::from_rfc3339("2025-01-15T12:00:00Z").unwrap());

        let store = LicenseStore::new(&config, clock.clone()).unwrap();
        let verifier = LicenseVerifier::with_parts(
            store,
            Arc::new(StaticHardwareId::new("machine-a")),
            config.secret.clone(),
        );
        let remote = config
            .license_server_url
            .as_ref()
            .map(|_| RemoteLicenseClient::new(&config).unwrap());
        let updates = Arc::new(UpdateManager::new_with_clock(config.clone(), clock).unwrap());
        let gate = Arc::new(RecordingGate::default());

        let context = Arc::new(AppContext::with_parts(
            config,
            verifier,
            remote,
            updates,
            gate.clone(),
        ));
        Fixture { dir, gate, context }
    }

    #[tokio::test]
    async fn missing_license_blocks() {
        let f = fixture(|c| c);
        let verdict = f.context.check_license().await;

        assert!(!verdict.valid);
        assert_eq!(
            f.context.license_status(),
            LicenseStatus::Invalid(LicenseFailure::LicenseNotFound)
        );
        assert!(matches!(
            f.gate.events().last(),
            Some(Some(BlockReason::License {
                reason: LicenseFailure::LicenseNotFound,
                ..
            }))
        ));
        assert!(!f.context.is_unblocked());
    }

    #[tokio::test]
    async fn activation_unblocks() {
        let f = fixture(|c| c);
        f.context.check_license().await;

        let verdict = f.context.activate_license("  SAKURA-1234  ").await.unwrap();
        assert!(verdict.valid);
        assert_eq!(f.context.license_status(), LicenseStatus::Valid);
        assert_eq!(f.gate.events().last(), Some(&None));
        assert!(f.context.is_unblocked());
    }

    #[tokio::test]
    async fn remote_rejection_overrides_local_pass() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/license/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "valid": false,
                "reason": "EXPIRED",
                "message": "license expired"
            })))
            .mount(&server)
            .await;

        let uri = server.uri();
        let f = fixture(|c| c.with_license_server(uri));
        f.context.verifier().activate("SAKURA-1234").unwrap();

        let verdict = f.context.check_license().await;
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, Some(LicenseFailure::LicenseInvalid));
        assert!(!f.context.is_unblocked());
    }

    #[tokio::test]
    async fn mandatory_update_blocks_until_applied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/update.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "version": "2.1.0",
                "minVersion": "2.0.0"
            })))
            .mount(&server)
            .await;

        let url = format!("{}/update.json", server.uri());
        let f = fixture(|c| c.with_manifest_url(url));
        f.context.activate_license("SAKURA-1234").await.unwrap();

        let decision = f.context.check_for_update().await.unwrap();
        assert!(decision.required);
        assert!(!f.context.is_unblocked());
        assert!(matches!(
            f.gate.events().last(),
            Some(Some(BlockReason::MandatoryUpdate { .. }))
        ));

        let incoming = f.dir.path().join("incoming");
        fs::create_dir_all(&incoming).unwrap();
        fs::write(incoming.join("package.json"), r#"{"version":"2.1.0"}"#).unwrap();

        f.context
            .apply_update(UpdatePayload::Directory(incoming), &Version::new(2, 1, 0))
            .await
            .unwrap();

        assert!(f.context.is_unblocked());
        assert_eq!(f.gate.events().last(), Some(&None));
    }

    #[tokio::test]
    async fn mandatory_update_keeps_license_block() {
        let f = fixture(|c| c);
        f.context.check_license().await;

        let manifest = {
            let mut m = crate::protocol::models::UpdateManifest::new(Version::new(2, 1, 0));
            m.min_version = Some(Version::new(2, 0, 0));
            m
        };
        let decision = crate::update::decision::decide(&Version::new(1, 9, 0), &manifest);
        f.context.record_decision(&decision);

        let optional = crate::update::decision::decide(
            &Version::new(2, 1, 0),
            &crate::protocol::models::UpdateManifest::new(Version::new(2, 1, 0)),
        );
        f.context.record_decision(&optional);

        // License is still missing, so no unblock may be issued.
        assert!(!f.gate.events().contains(&None));
        assert!(!f.context.is_unblocked());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_check_stops_when_context_dropped() {
        let f = fixture(|c| c);
        let handle = f.context.spawn_periodic_update_check(Duration::from_secs(60));

        drop(f.context);
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert!(handle.is_finished());
    }
}
