//! Install manager.
//!
//! Orchestrates one attempt at a time through
//! `Idle → Fetching → Verifying → Staged → Promoting → Installed`, ending in
//! `RolledBack` on any failure. A fresh installation stops at
//! `AwaitingLicense` until the user accepts or declines the license.
//!
//! Failure at any stage removes downloads and the staging directory and
//! leaves the state file untouched.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::command::CommandRunner;
use crate::config::PluginConfig;
use crate::error::PluginError;
use crate::fetch::{resolve_descriptor, ArtifactFetcher};
use crate::host::HostEnvironment;
use crate::probe::{InstallationStatus, VersionProbe};
use crate::staging::StagingArea;
use crate::state::{StateRecorder, StateStore};
use crate::strategy::{self, InstallStrategy};
use crate::transport::HttpTransport;
use crate::verify::{ArtifactVerifier, GpgVerifier, SignatureVerifier};

/// Where the current or most recent attempt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    #[default]
    Idle,
    /// Downloading index, artifact and signature
    Fetching,
    /// Checking size, checksum and signature
    Verifying,
    /// Extracted into the staging directory
    Staged,
    /// Staged, waiting for the user to accept the license
    AwaitingLicense,
    /// Handing the staged plugin to the install strategy
    Promoting,
    Installed,
    /// Failed and cleaned up
    RolledBack,
}

/// Why an installation is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallIntent {
    /// Install or update; refused if the plugin is already up to date
    Routine,
    /// User confirmed reinstalling over a healthy installation
    Reinstall,
}

/// Successful result of [`InstallManager::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { version: String },
    /// Downloaded and staged; the license at `license_path` needs accepting
    AwaitingLicense {
        version: String,
        license_path: PathBuf,
    },
}

/// Exclusive right to run an attempt; released on drop.
pub struct AttemptSession {
    _guard: OwnedMutexGuard<()>,
}

/// Plugin staged by a fresh install, waiting for license acceptance.
#[derive(Debug, Clone)]
struct PendingLicense {
    version: String,
}

/// Drives fetch, verification, staging and installation of the plugin.
pub struct InstallManager {
    host: Arc<dyn HostEnvironment>,
    recorder: Arc<dyn StateRecorder>,
    probe: VersionProbe,
    fetcher: ArtifactFetcher,
    verifier: ArtifactVerifier,
    staging: StagingArea,
    strategy: Arc<dyn InstallStrategy>,
    runner: Arc<dyn CommandRunner>,
    /// Held for the whole of an attempt
    session: Arc<Mutex<()>>,
    phase: Arc<RwLock<AttemptPhase>>,
    pending: StdMutex<Option<PendingLicense>>,
}

impl InstallManager {
    /// Create a manager verifying signatures with gpg.
    pub fn new(
        config: &PluginConfig,
        host: Arc<dyn HostEnvironment>,
        transport: Arc<dyn HttpTransport>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, PluginError> {
        let signature = Arc::new(GpgVerifier::new(runner.clone(), &config.signature));
        Self::with_signature_verifier(config, host, transport, runner, signature)
    }

    /// Create a manager with a custom signature verifier.
    pub fn with_signature_verifier(
        config: &PluginConfig,
        host: Arc<dyn HostEnvironment>,
        transport: Arc<dyn HttpTransport>,
        runner: Arc<dyn CommandRunner>,
        signature: Arc<dyn SignatureVerifier>,
    ) -> Result<Self, PluginError> {
        let state = Arc::new(StateStore::new(&config.state_path));
        let staging = StagingArea::new(config.plugin_root()?);

        Ok(Self {
            probe: VersionProbe::new(host.clone(), state.clone()),
            fetcher: ArtifactFetcher::new(transport, config),
            verifier: ArtifactVerifier::new(signature),
            strategy: strategy::for_config(config, runner.clone()),
            host,
            recorder: state,
            staging,
            runner,
            session: Arc::new(Mutex::new(())),
            phase: Arc::new(RwLock::new(AttemptPhase::Idle)),
            pending: StdMutex::new(None),
        })
    }

    /// Record results through `recorder` instead of the state file.
    pub fn with_state_recorder(mut self, recorder: Arc<dyn StateRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Current attempt phase.
    pub async fn phase(&self) -> AttemptPhase {
        *self.phase.read().await
    }

    /// Current installation status.
    pub fn status(&self) -> InstallationStatus {
        self.probe.current_status()
    }

    pub fn host(&self) -> &dyn HostEnvironment {
        self.host.as_ref()
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn strategy(&self) -> &dyn InstallStrategy {
        self.strategy.as_ref()
    }

    /// Whether a staged plugin is waiting for license acceptance.
    pub fn license_pending(&self) -> bool {
        self.pending_slot().is_some()
    }

    /// Installed license text location, if the strategy knows one.
    pub fn installed_license_path(&self) -> Option<PathBuf> {
        self.strategy
            .installed_license_path(&self.staging, self.host.as_ref())
    }

    /// Claim the attempt slot, failing fast if another attempt holds it.
    pub fn begin(&self) -> Result<AttemptSession, PluginError> {
        let guard = self.session.clone().try_lock_owned().map_err(|_| {
            warn!("Plugin install or removal already in progress");
            PluginError::ConcurrentAttempt
        })?;
        Ok(AttemptSession { _guard: guard })
    }

    async fn set_phase(&self, phase: AttemptPhase) {
        debug!(?phase, "Attempt phase");
        *self.phase.write().await = phase;
    }

    fn pending_slot(&self) -> std::sync::MutexGuard<'_, Option<PendingLicense>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_privilege(&self) -> Result<(), PluginError> {
        if self.host.is_privileged() {
            Ok(())
        } else {
            error!("Printer application must run as root to install or remove the plugin");
            Err(PluginError::PrivilegeRequired)
        }
    }

    /// Download, verify and install the plugin for the running host version.
    ///
    /// A plugin that is not installed yet stops after staging with
    /// [`InstallOutcome::AwaitingLicense`]; continue with
    /// [`InstallManager::accept_license`].
    pub async fn install(&self, intent: InstallIntent) -> Result<InstallOutcome, PluginError> {
        self.require_privilege()?;
        let _session = self.begin()?;

        let status = self.probe.current_status();
        if status == InstallationStatus::Installed && intent == InstallIntent::Routine {
            return Err(PluginError::ConfirmationRequired);
        }
        self.pending_slot().take();

        let version = self.host.host_version()?;
        info!(%version, %status, ?intent, "Installing plugin");

        if let Err(e) = self.acquire(&version).await {
            error!("Unable to download plugin: {}", e);
            self.roll_back().await;
            return Err(e);
        }

        if status == InstallationStatus::NotInstalled {
            info!(%version, "Plugin downloaded, waiting for license acceptance");
            *self.pending_slot() = Some(PendingLicense {
                version: version.clone(),
            });
            self.set_phase(AttemptPhase::AwaitingLicense).await;
            return Ok(InstallOutcome::AwaitingLicense {
                version,
                license_path: self.staging.license_path(),
            });
        }

        self.promote(&version).await?;
        Ok(InstallOutcome::Installed { version })
    }

    /// Install the plugin staged by a previous [`InstallManager::install`].
    pub async fn accept_license(&self) -> Result<InstallOutcome, PluginError> {
        self.require_privilege()?;
        let _session = self.begin()?;

        let pending = self.pending_slot().take().ok_or(PluginError::NothingStaged)?;
        if !self.staging.exists() {
            self.set_phase(AttemptPhase::Idle).await;
            return Err(PluginError::NothingStaged);
        }

        info!(version = %pending.version, "License accepted");
        self.promote(&pending.version).await?;
        Ok(InstallOutcome::Installed {
            version: pending.version,
        })
    }

    /// Drop the plugin staged for license acceptance.
    pub async fn decline_license(&self) -> Result<(), PluginError> {
        let _session = self.begin()?;

        self.pending_slot().take();
        info!("License declined, discarding downloaded plugin");
        let result = self.staging.discard();
        if let Err(e) = &result {
            error!("Unable to remove staged plugin: {}", e);
        }
        self.set_phase(AttemptPhase::Idle).await;
        result
    }

    /// Uninstall the plugin and record it as not installed.
    pub async fn remove(&self) -> Result<(), PluginError> {
        self.require_privilege()?;
        if !self.strategy.supports_removal() {
            return Err(PluginError::RemovalUnsupported(self.strategy.mode().as_str()));
        }
        let _session = self.begin()?;

        info!("Removing plugin");
        if let Err(e) = self.strategy.remove(&self.staging).await {
            error!("Plugin removal failed: {}", e);
            return Err(e);
        }

        if let Err(e) = self.recorder.record_removed() {
            error!("Unable to register plugin removal: {}", e);
            self.restore_previous().await;
            return Err(e);
        }
        self.commit().await;
        self.set_phase(AttemptPhase::Idle).await;
        info!("Plugin removed");
        Ok(())
    }

    /// Fetching through staging. Downloads are dropped on return.
    async fn acquire(&self, version: &str) -> Result<(), PluginError> {
        self.set_phase(AttemptPhase::Fetching).await;
        let index_file = self.fetcher.fetch_index().await?;
        let index = self.fetcher.read_index(&index_file)?;
        let descriptor = resolve_descriptor(&index, version)?;
        drop(index_file);

        let artifact = self.fetcher.fetch_artifact(&descriptor).await?;

        self.set_phase(AttemptPhase::Verifying).await;
        self.verifier.verify_all(&artifact, &descriptor).await?;

        self.staging
            .extract(self.runner.as_ref(), artifact.path())
            .await?;
        self.set_phase(AttemptPhase::Staged).await;
        info!(
            path = %self.staging.path().display(),
            "Downloaded, verified, and uncompressed the plugin"
        );
        Ok(())
    }

    /// Hand the staged plugin to the strategy, then record the new state.
    async fn promote(&self, version: &str) -> Result<(), PluginError> {
        self.set_phase(AttemptPhase::Promoting).await;

        if let Err(e) = self.strategy.install(&self.staging).await {
            error!("Plugin installation failed: {}", e);
            self.roll_back().await;
            return Err(e);
        }

        if let Err(e) = self.recorder.record_installed(version) {
            error!("Unable to register plugin installation status: {}", e);
            self.restore_previous().await;
            self.roll_back().await;
            return Err(e);
        }
        self.commit().await;

        if let Err(e) = self.staging.discard() {
            warn!("Unable to remove staging directory: {}", e);
        }
        self.set_phase(AttemptPhase::Installed).await;
        info!(%version, "Plugin installed");
        Ok(())
    }

    /// Undo the strategy's last install or remove after the state could
    /// not be recorded.
    async fn restore_previous(&self) {
        if let Err(e) = self.strategy.abort(&self.staging).await {
            error!("Unable to restore previous plugin version: {}", e);
        }
    }

    async fn commit(&self) {
        if let Err(e) = self.strategy.commit(&self.staging).await {
            warn!("Unable to remove old plugin version: {}", e);
        }
    }

    async fn roll_back(&self) {
        if let Err(e) = self.staging.discard() {
            error!("Unable to remove staging directory: {}", e);
        }
        self.set_phase(AttemptPhase::RolledBack).await;
    }
}
