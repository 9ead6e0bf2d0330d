//! Host-facing entry points: the startup update and the web page actions.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::command::SystemCommandRunner;
use crate::config::PluginConfig;
use crate::error::PluginError;
use crate::host::SystemHost;
use crate::manager::{InstallIntent, InstallManager, InstallOutcome};
use crate::presenter::{self, messages, ActionOutcome, ActionReport, StatusView, UiState};
use crate::probe::InstallationStatus;
use crate::transport::ReqwestTransport;

/// Action submitted from the plugin page.
///
/// Serialises to the form value the page submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserAction {
    #[serde(rename = "install-plugin")]
    Install,
    #[serde(rename = "install-plugin-yes")]
    InstallConfirm,
    #[serde(rename = "remove-plugin")]
    Remove,
    #[serde(rename = "remove-plugin-yes")]
    RemoveConfirm,
    /// Cancel whichever confirmation is showing
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(rename = "install-cancel")]
    InstallCancel,
    #[serde(rename = "remove-cancel")]
    RemoveCancel,
    #[serde(rename = "license-accepted")]
    LicenseAccept,
    #[serde(rename = "license-declined")]
    LicenseDecline,
}

impl UserAction {
    /// Form value submitted by the page.
    pub fn as_form_value(&self) -> &'static str {
        match self {
            Self::Install => "install-plugin",
            Self::InstallConfirm => "install-plugin-yes",
            Self::Remove => "remove-plugin",
            Self::RemoveConfirm => "remove-plugin-yes",
            Self::Cancel => "cancel",
            Self::InstallCancel => "install-cancel",
            Self::RemoveCancel => "remove-cancel",
            Self::LicenseAccept => "license-accepted",
            Self::LicenseDecline => "license-declined",
        }
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_form_value())
    }
}

/// Error for an unrecognised action string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for UserAction {
    type Err = UnknownAction;

    /// Accepts form values and the short names (`install`,
    /// `install-confirm`, `license-accept`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "install" | "install-plugin" => Ok(Self::Install),
            "install-confirm" | "install-plugin-yes" => Ok(Self::InstallConfirm),
            "remove" | "remove-plugin" => Ok(Self::Remove),
            "remove-confirm" | "remove-plugin-yes" => Ok(Self::RemoveConfirm),
            "cancel" => Ok(Self::Cancel),
            "install-cancel" => Ok(Self::InstallCancel),
            "remove-cancel" => Ok(Self::RemoveCancel),
            "license-accept" | "license-accepted" => Ok(Self::LicenseAccept),
            "license-decline" | "license-declined" => Ok(Self::LicenseDecline),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// Plugin management as seen by the printer application host.
pub struct PluginService {
    manager: Arc<InstallManager>,
    /// Confirmation page most recently shown
    prompt: Mutex<UiState>,
    last_action: Mutex<Option<ActionReport>>,
}

impl PluginService {
    pub fn new(manager: Arc<InstallManager>) -> Self {
        Self {
            manager,
            prompt: Mutex::new(UiState::Status),
            last_action: Mutex::new(None),
        }
    }

    /// Service wired to the real system: `hplip.conf`, reqwest and
    /// spawned processes.
    pub fn from_config(config: &PluginConfig) -> Result<Self, PluginError> {
        let host = Arc::new(SystemHost::new(&config.host_config_path));
        let transport = Arc::new(ReqwestTransport::new(&config.network)?);
        let runner = Arc::new(SystemCommandRunner::new());
        let manager = InstallManager::new(config, host, transport, runner)?;
        Ok(Self::new(Arc::new(manager)))
    }

    pub fn manager(&self) -> &Arc<InstallManager> {
        &self.manager
    }

    pub fn status(&self) -> InstallationStatus {
        self.manager.status()
    }

    /// Navigation link label for the host's menu.
    pub fn link_label(&self) -> &'static str {
        presenter::link_label(self.manager.host().is_privileged())
    }

    pub fn last_action(&self) -> Option<ActionReport> {
        self.last_action
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Startup check: update an outdated plugin if running privileged.
    ///
    /// Returns the report if an update was attempted.
    pub async fn ensure_up_to_date(&self) -> Option<ActionReport> {
        match self.manager.status() {
            InstallationStatus::NotInstalled => {
                debug!("Proprietary plugin is not installed");
                None
            }
            InstallationStatus::Installed => {
                debug!("Proprietary plugin is installed and up-to-date");
                None
            }
            InstallationStatus::Outdated => {
                if !self.manager.host().is_privileged() {
                    warn!("Proprietary plugin is out-of-date; not running as root, not updating");
                    return None;
                }

                info!("Updating an already installed proprietary plugin");
                let report = match self.manager.install(InstallIntent::Routine).await {
                    Ok(_) => ActionReport::new(None, ActionOutcome::Completed, messages::INSTALLED),
                    Err(e) => {
                        error!("Plugin update failed: {}", e);
                        ActionReport::failed(None, messages::INSTALL_FAILED, &e)
                    }
                };
                self.remember(report.clone());
                Some(report)
            }
        }
    }

    /// Plugin page without a submitted action.
    pub async fn status_view(&self) -> StatusView {
        let ui = if self.manager.license_pending() {
            UiState::LicensePrompt
        } else {
            UiState::Status
        };
        self.build_view(ui, None).await
    }

    /// Handle a raw form value; unknown values produce an "Unknown action."
    /// banner.
    pub async fn handle_form_action(&self, value: &str) -> StatusView {
        match value.parse::<UserAction>() {
            Ok(action) => self.handle_user_action(action).await,
            Err(e) => {
                warn!("{}", e);
                let report = ActionReport::new(None, ActionOutcome::Failed, messages::UNKNOWN_ACTION);
                self.remember(report.clone());
                self.build_view(UiState::Status, Some(report)).await
            }
        }
    }

    /// Run `action` and describe the resulting page.
    pub async fn handle_user_action(&self, action: UserAction) -> StatusView {
        debug!(%action, "Plugin page action");
        let (ui, report) = self.dispatch(action).await;
        self.set_prompt(ui);
        self.remember(report.clone());
        self.build_view(ui, Some(report)).await
    }

    async fn dispatch(&self, action: UserAction) -> (UiState, ActionReport) {
        let act = Some(action);
        match action {
            UserAction::Install => {
                let status = self.manager.status();
                if status == InstallationStatus::Installed {
                    return (
                        UiState::ConfirmReinstall,
                        ActionReport::new(act, ActionOutcome::Prompted, messages::INSTALLING),
                    );
                }
                let failure = if status == InstallationStatus::NotInstalled {
                    messages::DOWNLOAD_FAILED
                } else {
                    messages::INSTALL_FAILED
                };
                self.run_install(act, InstallIntent::Routine, failure).await
            }
            UserAction::InstallConfirm => {
                self.run_install(act, InstallIntent::Reinstall, messages::INSTALL_FAILED)
                    .await
            }
            UserAction::LicenseAccept => match self.manager.accept_license().await {
                Ok(_) => (
                    UiState::Status,
                    ActionReport::new(act, ActionOutcome::Completed, messages::INSTALLED),
                ),
                Err(e) => (
                    UiState::Status,
                    ActionReport::failed(act, messages::INSTALL_FAILED, &e),
                ),
            },
            UserAction::LicenseDecline => match self.manager.decline_license().await {
                Ok(()) => (
                    UiState::Status,
                    ActionReport::new(act, ActionOutcome::Cancelled, messages::LICENSE_DECLINED),
                ),
                Err(e) => (
                    UiState::Status,
                    ActionReport::failed(act, messages::LICENSE_DECLINED, &e),
                ),
            },
            UserAction::Remove => {
                if !self.manager.strategy().supports_removal() {
                    let err =
                        PluginError::RemovalUnsupported(self.manager.strategy().mode().as_str());
                    return (
                        UiState::Status,
                        ActionReport::failed(act, messages::REMOVAL_FAILED, &err),
                    );
                }
                (
                    UiState::ConfirmRemove,
                    ActionReport::new(act, ActionOutcome::Prompted, messages::REMOVING),
                )
            }
            UserAction::RemoveConfirm => match self.manager.remove().await {
                Ok(()) => (
                    UiState::Status,
                    ActionReport::new(act, ActionOutcome::Completed, messages::REMOVED),
                ),
                Err(e) => (
                    UiState::Status,
                    ActionReport::failed(act, messages::REMOVAL_FAILED, &e),
                ),
            },
            UserAction::InstallCancel => (
                UiState::Status,
                ActionReport::new(act, ActionOutcome::Cancelled, messages::NOT_REINSTALLED),
            ),
            UserAction::RemoveCancel => (
                UiState::Status,
                ActionReport::new(act, ActionOutcome::Cancelled, messages::NOT_REMOVED),
            ),
            UserAction::Cancel => {
                let message = if self.prompt() == UiState::ConfirmRemove {
                    messages::NOT_REMOVED
                } else {
                    messages::NOT_REINSTALLED
                };
                (
                    UiState::Status,
                    ActionReport::new(act, ActionOutcome::Cancelled, message),
                )
            }
        }
    }

    async fn run_install(
        &self,
        action: Option<UserAction>,
        intent: InstallIntent,
        failure: &str,
    ) -> (UiState, ActionReport) {
        match self.manager.install(intent).await {
            Ok(InstallOutcome::AwaitingLicense { .. }) => (
                UiState::LicensePrompt,
                ActionReport::new(action, ActionOutcome::Prompted, messages::DOWNLOADED),
            ),
            Ok(InstallOutcome::Installed { .. }) => (
                UiState::Status,
                ActionReport::new(action, ActionOutcome::Completed, messages::INSTALLED),
            ),
            Err(PluginError::ConfirmationRequired) => (
                UiState::ConfirmReinstall,
                ActionReport::new(action, ActionOutcome::Prompted, messages::INSTALLING),
            ),
            Err(e) => (UiState::Status, ActionReport::failed(action, failure, &e)),
        }
    }

    async fn build_view(&self, ui: UiState, report: Option<ActionReport>) -> StatusView {
        let status = self.manager.status();
        let privileged = self.manager.host().is_privileged();
        let removal_supported = self.manager.strategy().supports_removal();

        let mut view = StatusView::new(status, ui, privileged, removal_supported);
        view.banner = report.as_ref().map(|r| r.message.clone());
        view.last_action = report.or_else(|| self.last_action());
        view.phase = self.manager.phase().await;
        view.license_text = self.license_text(ui, status).await;
        view
    }

    /// Staged license while prompting, else the installed plugin's license.
    async fn license_text(&self, ui: UiState, status: InstallationStatus) -> Option<String> {
        let path = if ui == UiState::LicensePrompt {
            self.manager.staging().license_path()
        } else if status != InstallationStatus::NotInstalled {
            self.manager.installed_license_path()?
        } else {
            return None;
        };

        debug!(path = %path.display(), "Loading license text");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) => {
                error!(path = %path.display(), "Unable to open plugin license file: {}", e);
                (ui == UiState::LicensePrompt).then(|| messages::LICENSE_UNREADABLE.to_string())
            }
        }
    }

    fn prompt(&self) -> UiState {
        *self
            .prompt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_prompt(&self, ui: UiState) {
        *self
            .prompt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = ui;
    }

    fn remember(&self, report: ActionReport) {
        *self
            .last_action
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report);
    }
}
