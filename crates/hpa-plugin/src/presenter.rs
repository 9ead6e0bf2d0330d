//! Presentation model for the plugin status page.
//!
//! Everything here is plain data for the host to render; no HTML.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PluginError};
use crate::manager::AttemptPhase;
use crate::probe::InstallationStatus;
use crate::service::UserAction;

/// Banner texts shown after an action.
pub mod messages {
    pub const INSTALLING: &str = "Installing plugin";
    pub const DOWNLOADED: &str = "Plugin downloaded.";
    pub const DOWNLOAD_FAILED: &str = "Plugin download failed.";
    pub const INSTALL_FAILED: &str = "Plugin installation failed.";
    pub const INSTALLED: &str = "Plugin installed.";
    pub const REMOVING: &str = "Removing plugin.";
    pub const REMOVAL_FAILED: &str = "Plugin removal failed.";
    pub const REMOVED: &str = "Plugin removed.";
    pub const LICENSE_DECLINED: &str = "License declined, plugin not installed.";
    pub const NOT_REINSTALLED: &str = "Plugin not re-installed.";
    pub const NOT_REMOVED: &str = "Plugin not removed.";
    pub const UNKNOWN_ACTION: &str = "Unknown action.";
    pub const LICENSE_UNREADABLE: &str = "Unable to load license file.";
}

/// Shown to unprivileged users instead of install buttons.
pub const UNPRIVILEGED_HINT: &str =
    "To install or update the proprietary plugin please use the \"hp-plugin\" utility of HPLIP.";

/// Which page the host should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiState {
    /// Status with install/remove buttons
    #[default]
    Status,
    /// License text with accept/decline
    LicensePrompt,
    /// "Are you sure?" before reinstalling a healthy plugin
    ConfirmReinstall,
    /// "Are you sure?" before removing
    ConfirmRemove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Completed,
    /// Waiting for the user to confirm or accept
    Prompted,
    Cancelled,
    Failed,
}

/// Result of the last user action or startup update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    /// `None` for the automatic startup update
    pub action: Option<UserAction>,
    pub outcome: ActionOutcome,
    /// Error kind if the action failed
    pub kind: Option<ErrorKind>,
    /// Banner text
    pub message: String,
    /// Error detail
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl ActionReport {
    pub fn new(action: Option<UserAction>, outcome: ActionOutcome, message: &str) -> Self {
        Self {
            action,
            outcome,
            kind: None,
            message: message.to_string(),
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn failed(action: Option<UserAction>, message: &str, err: &PluginError) -> Self {
        Self {
            action,
            outcome: ActionOutcome::Failed,
            kind: Some(err.kind()),
            message: message.to_string(),
            detail: Some(err.to_string()),
            at: Utc::now(),
        }
    }
}

/// Everything the plugin page shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub status: InstallationStatus,
    pub headline: String,
    pub ui: UiState,
    pub banner: Option<String>,
    /// Buttons to offer, as form actions
    pub actions: Vec<UserAction>,
    /// Label of the install button, if offered
    pub install_label: Option<String>,
    pub hint: Option<String>,
    pub privileged: bool,
    pub license_text: Option<String>,
    pub phase: AttemptPhase,
    pub last_action: Option<ActionReport>,
}

impl StatusView {
    pub fn new(
        status: InstallationStatus,
        ui: UiState,
        privileged: bool,
        removal_supported: bool,
    ) -> Self {
        let actions = available_actions(ui, status, privileged, removal_supported);
        let install_label = actions
            .contains(&UserAction::Install)
            .then(|| install_button_label(status).to_string());
        let hint = (!privileged && status != InstallationStatus::Installed)
            .then(|| UNPRIVILEGED_HINT.to_string());

        Self {
            status,
            headline: headline(status).to_string(),
            ui,
            banner: None,
            actions,
            install_label,
            hint,
            privileged,
            license_text: None,
            phase: AttemptPhase::Idle,
            last_action: None,
        }
    }
}

pub fn headline(status: InstallationStatus) -> &'static str {
    match status {
        InstallationStatus::NotInstalled => "Plugin NOT installed",
        InstallationStatus::Installed => "Plugin installed and up-to-date",
        InstallationStatus::Outdated => "Plugin out-of-date",
    }
}

pub fn install_button_label(status: InstallationStatus) -> &'static str {
    match status {
        InstallationStatus::NotInstalled => "Install Plugin",
        InstallationStatus::Installed => "Re-install Plugin",
        InstallationStatus::Outdated => "Update Plugin",
    }
}

/// Navigation link to the plugin page.
pub fn link_label(privileged: bool) -> &'static str {
    if privileged {
        "Install Proprietary Plugin"
    } else {
        "Proprietary Plugin Status"
    }
}

pub fn available_actions(
    ui: UiState,
    status: InstallationStatus,
    privileged: bool,
    removal_supported: bool,
) -> Vec<UserAction> {
    match ui {
        UiState::Status if !privileged => Vec::new(),
        UiState::Status => {
            let mut actions = vec![UserAction::Install];
            if removal_supported && status != InstallationStatus::NotInstalled {
                actions.push(UserAction::Remove);
            }
            actions
        }
        UiState::LicensePrompt => vec![UserAction::LicenseAccept, UserAction::LicenseDecline],
        UiState::ConfirmReinstall => vec![UserAction::InstallConfirm, UserAction::InstallCancel],
        UiState::ConfirmRemove => vec![UserAction::RemoveConfirm, UserAction::RemoveCancel],
    }
}
