//! Integration tests for the plugin page and the startup update.

mod common;

use std::sync::atomic::Ordering;

use common::*;
use hpa_plugin::presenter::{messages, UNPRIVILEGED_HINT};
use hpa_plugin::{
    ActionOutcome, AttemptPhase, ErrorKind, InstallMode, InstallationStatus, UiState, UserAction,
};

/// Test: page for a plugin that is not installed
#[tokio::test]
async fn integration_status_view_not_installed() {
    let fx = Fixture::new(InstallMode::Relocate);
    let service = fx.service();

    let view = service.status_view().await;
    assert_eq!(view.status, InstallationStatus::NotInstalled);
    assert_eq!(view.headline, "Plugin NOT installed");
    assert_eq!(view.ui, UiState::Status);
    assert_eq!(view.actions, vec![UserAction::Install]);
    assert_eq!(view.install_label.as_deref(), Some("Install Plugin"));
    assert!(view.banner.is_none());
    assert!(view.hint.is_none());
    assert!(view.license_text.is_none());
    assert_eq!(service.link_label(), "Install Proprietary Plugin");
}

/// Test: install, license prompt, accept
#[tokio::test]
async fn integration_form_install_and_accept() {
    let fx = Fixture::new(InstallMode::Relocate);
    let service = fx.service();

    let view = service.handle_form_action("install-plugin").await;
    assert_eq!(view.ui, UiState::LicensePrompt);
    assert_eq!(view.banner.as_deref(), Some(messages::DOWNLOADED));
    assert_eq!(view.license_text.as_deref(), Some(LICENSE_TEXT));
    assert_eq!(
        view.actions,
        vec![UserAction::LicenseAccept, UserAction::LicenseDecline]
    );
    assert_eq!(view.phase, AttemptPhase::AwaitingLicense);

    // Reloading the page keeps showing the license.
    let reload = service.status_view().await;
    assert_eq!(reload.ui, UiState::LicensePrompt);
    assert_eq!(reload.license_text.as_deref(), Some(LICENSE_TEXT));

    let view = service.handle_form_action("license-accepted").await;
    assert_eq!(view.ui, UiState::Status);
    assert_eq!(view.status, InstallationStatus::Installed);
    assert_eq!(view.banner.as_deref(), Some(messages::INSTALLED));
    assert_eq!(view.install_label.as_deref(), Some("Re-install Plugin"));
    assert_eq!(view.actions, vec![UserAction::Install, UserAction::Remove]);
    // The installed plugin's license is shown on the status page.
    assert_eq!(view.license_text.as_deref(), Some(LICENSE_TEXT));

    let report = service.last_action().unwrap();
    assert_eq!(report.action, Some(UserAction::LicenseAccept));
    assert_eq!(report.outcome, ActionOutcome::Completed);
}

/// Test: declining the license
#[tokio::test]
async fn integration_form_decline_license() {
    let fx = Fixture::new(InstallMode::Relocate);
    let service = fx.service();

    service.handle_user_action(UserAction::Install).await;
    let view = service.handle_user_action(UserAction::LicenseDecline).await;

    assert_eq!(view.ui, UiState::Status);
    assert_eq!(view.status, InstallationStatus::NotInstalled);
    assert_eq!(view.banner.as_deref(), Some(messages::LICENSE_DECLINED));
    assert_eq!(view.last_action.unwrap().outcome, ActionOutcome::Cancelled);
    assert!(!fx.staging_dir().exists());
}

/// Test: fresh install failure shows the download banner
#[tokio::test]
async fn integration_form_download_failed() {
    let fx = Fixture::new(InstallMode::Relocate);
    fx.transport.serve(PLUGIN_URL, vec![0u8; 10]);
    let service = fx.service();

    let view = service.handle_form_action("install-plugin").await;
    assert_eq!(view.ui, UiState::Status);
    assert_eq!(view.banner.as_deref(), Some(messages::DOWNLOAD_FAILED));
    assert_eq!(view.phase, AttemptPhase::RolledBack);

    let report = view.last_action.unwrap();
    assert_eq!(report.outcome, ActionOutcome::Failed);
    assert_eq!(report.kind, Some(ErrorKind::SizeMismatch));
    assert!(report.detail.is_some());
}

/// Test: failed update shows the installation banner
#[tokio::test]
async fn integration_form_update_failed() {
    let fx = Fixture::new(InstallMode::Relocate);
    fx.installed("3.20.11");
    fx.runner.gpg_code.store(1, Ordering::SeqCst);
    let service = fx.service();

    let view = service.handle_form_action("install-plugin").await;
    assert_eq!(view.status, InstallationStatus::Outdated);
    assert_eq!(view.banner.as_deref(), Some(messages::INSTALL_FAILED));
    assert_eq!(view.last_action.unwrap().kind, Some(ErrorKind::Signature));
}

/// Test: reinstall confirmation, both cancel and confirm
#[tokio::test]
async fn integration_form_reinstall_confirmation() {
    let fx = Fixture::new(InstallMode::Relocate);
    fx.installed(VERSION);
    let service = fx.service();

    let view = service.handle_form_action("install-plugin").await;
    assert_eq!(view.ui, UiState::ConfirmReinstall);
    assert_eq!(
        view.actions,
        vec![UserAction::InstallConfirm, UserAction::InstallCancel]
    );
    assert!(fx.transport.requests().is_empty());

    let view = service.handle_form_action("cancel").await;
    assert_eq!(view.ui, UiState::Status);
    assert_eq!(view.banner.as_deref(), Some(messages::NOT_REINSTALLED));
    assert!(fx.transport.requests().is_empty());

    service.handle_form_action("install-plugin").await;
    let view = service.handle_form_action("install-plugin-yes").await;
    assert_eq!(view.ui, UiState::Status);
    assert_eq!(view.banner.as_deref(), Some(messages::INSTALLED));
    assert!(!fx.transport.requests().is_empty());
}

/// Test: remove confirmation, both cancel and confirm
#[tokio::test]
async fn integration_form_remove_confirmation() {
    let fx = Fixture::new(InstallMode::Relocate);
    fx.installed(VERSION);
    fx.live_plugin(&["hpcups-x86_64.so"]);
    let service = fx.service();

    let view = service.handle_form_action("remove-plugin").await;
    assert_eq!(view.ui, UiState::ConfirmRemove);
    assert_eq!(view.banner.as_deref(), Some(messages::REMOVING));

    let view = service.handle_form_action("cancel").await;
    assert_eq!(view.banner.as_deref(), Some(messages::NOT_REMOVED));
    assert!(fx.live_dir().exists());

    service.handle_form_action("remove-plugin").await;
    let view = service.handle_form_action("remove-plugin-yes").await;
    assert_eq!(view.banner.as_deref(), Some(messages::REMOVED));
    assert_eq!(view.status, InstallationStatus::NotInstalled);
    assert!(!fx.live_dir().exists());
}

/// Test: script mode has no remove button and refuses removal
#[tokio::test]
async fn integration_form_remove_unsupported() {
    let fx = Fixture::new(InstallMode::Script);
    fx.installed(VERSION);
    let service = fx.service();

    let view = service.status_view().await;
    assert_eq!(view.actions, vec![UserAction::Install]);

    let view = service.handle_form_action("remove-plugin").await;
    assert_eq!(view.ui, UiState::Status);
    assert_eq!(view.banner.as_deref(), Some(messages::REMOVAL_FAILED));
    assert_eq!(view.last_action.unwrap().kind, Some(ErrorKind::Unsupported));
}

/// Test: unknown form value
#[tokio::test]
async fn integration_form_unknown_action() {
    let fx = Fixture::new(InstallMode::Relocate);
    let service = fx.service();

    let view = service.handle_form_action("format-disk").await;
    assert_eq!(view.ui, UiState::Status);
    assert_eq!(view.banner.as_deref(), Some(messages::UNKNOWN_ACTION));
    assert!(fx.transport.requests().is_empty());
}

/// Test: unprivileged users see status only
#[tokio::test]
async fn integration_unprivileged_view() {
    let fx = Fixture::new(InstallMode::Relocate);
    fx.installed("3.20.11");
    fx.host.privileged.store(false, Ordering::SeqCst);
    let service = fx.service();

    let view = service.status_view().await;
    assert_eq!(view.status, InstallationStatus::Outdated);
    assert!(!view.privileged);
    assert!(view.actions.is_empty());
    assert!(view.install_label.is_none());
    assert_eq!(view.hint.as_deref(), Some(UNPRIVILEGED_HINT));
    assert_eq!(service.link_label(), "Proprietary Plugin Status");

    let view = service.handle_form_action("install-plugin").await;
    assert_eq!(view.last_action.unwrap().kind, Some(ErrorKind::PrivilegeRequired));
    assert!(fx.transport.requests().is_empty());
}

/// Test: script-mode license is read from the HPLIP data directory
#[tokio::test]
async fn integration_script_mode_installed_license() {
    let fx = Fixture::new(InstallMode::Script);
    fx.installed(VERSION);
    let plugins = fx.dir.path().join("share").join("data").join("plugins");
    std::fs::create_dir_all(&plugins).unwrap();
    std::fs::write(plugins.join("license.txt"), "installed license\n").unwrap();
    let service = fx.service();

    let view = service.status_view().await;
    assert_eq!(view.license_text.as_deref(), Some("installed license\n"));
}

/// Test: startup check updates an outdated plugin
#[tokio::test]
async fn integration_ensure_up_to_date_updates_outdated() {
    let fx = Fixture::new(InstallMode::Relocate);
    fx.installed("3.20.11");
    let service = fx.service();

    let report = service.ensure_up_to_date().await.unwrap();
    assert_eq!(report.outcome, ActionOutcome::Completed);
    assert_eq!(report.action, None);
    assert_eq!(service.status(), InstallationStatus::Installed);
    assert_eq!(service.last_action(), Some(report));
}

/// Test: an empty state file counts as an outdated install
#[tokio::test]
async fn integration_ensure_up_to_date_empty_state() {
    let fx = Fixture::new(InstallMode::Relocate);
    fx.write_state("");
    let service = fx.service();
    assert_eq!(service.status(), InstallationStatus::Outdated);

    let report = service.ensure_up_to_date().await.unwrap();
    assert_eq!(report.outcome, ActionOutcome::Completed);
    let state = String::from_utf8(fx.read_state().unwrap()).unwrap();
    assert!(state.contains("version = 3.21.8"));
}

/// Test: startup check leaves missing and current plugins alone
#[tokio::test]
async fn integration_ensure_up_to_date_noop() {
    let fx = Fixture::new(InstallMode::Relocate);
    let service = fx.service();
    assert!(service.ensure_up_to_date().await.is_none());

    fx.installed(VERSION);
    assert!(service.ensure_up_to_date().await.is_none());
    assert!(fx.transport.requests().is_empty());
}

/// Test: startup check does nothing without privileges
#[tokio::test]
async fn integration_ensure_up_to_date_unprivileged() {
    let fx = Fixture::new(InstallMode::Relocate);
    fx.installed("3.20.11");
    fx.host.privileged.store(false, Ordering::SeqCst);
    let service = fx.service();

    assert!(service.ensure_up_to_date().await.is_none());
    assert!(fx.transport.requests().is_empty());
    assert_eq!(service.status(), InstallationStatus::Outdated);
}

/// Test: failed startup update is reported and rolled back
#[tokio::test]
async fn integration_ensure_up_to_date_failure() {
    let fx = Fixture::new(InstallMode::Relocate);
    fx.installed("3.20.11");
    let before = fx.read_state();
    fx.transport.unserve(INDEX_URL);
    let service = fx.service();

    let report = service.ensure_up_to_date().await.unwrap();
    assert_eq!(report.outcome, ActionOutcome::Failed);
    assert_eq!(report.message, messages::INSTALL_FAILED);
    assert_eq!(report.kind, Some(ErrorKind::Network));
    assert_eq!(fx.read_state(), before);
}
