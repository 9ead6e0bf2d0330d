//! Derivation of the plugin installation status.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::host::HostEnvironment;
use crate::state::{StateSnapshot, StateStore};

/// Installation status of the plugin relative to the host software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatus {
    NotInstalled,
    Outdated,
    Installed,
}

impl InstallationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::Outdated => "outdated",
            Self::Installed => "installed",
        }
    }
}

impl std::fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads host version and persisted state to compute [`InstallationStatus`].
pub struct VersionProbe {
    host: Arc<dyn HostEnvironment>,
    state: Arc<StateStore>,
}

impl VersionProbe {
    pub fn new(host: Arc<dyn HostEnvironment>, state: Arc<StateStore>) -> Self {
        Self { host, state }
    }

    /// Current status. Never fails: unreadable inputs count as not installed.
    pub fn current_status(&self) -> InstallationStatus {
        let snapshot = match self.state.read() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(
                    path = %self.state.path().display(),
                    "Unable to read plugin state file: {}", e
                );
                return InstallationStatus::NotInstalled;
            }
        };

        let status = match &snapshot {
            StateSnapshot::Present(state) if state.installed && state.version.is_some() => {
                match self.host.host_version() {
                    Ok(version) => derive_status(&snapshot, Some(&version)),
                    Err(e) => {
                        error!("{}", e);
                        InstallationStatus::NotInstalled
                    }
                }
            }
            _ => derive_status(&snapshot, None),
        };

        debug!(%status, "Plugin status");
        status
    }
}

/// Status from a state snapshot and the host version.
///
/// An empty state file forces an install attempt. An installed record is
/// only trusted together with a version string; versions compare
/// ASCII case-insensitively.
pub fn derive_status(snapshot: &StateSnapshot, host_version: Option<&str>) -> InstallationStatus {
    match snapshot {
        StateSnapshot::Missing => InstallationStatus::NotInstalled,
        StateSnapshot::Empty => InstallationStatus::Outdated,
        StateSnapshot::Present(state) => {
            match (state.installed, state.version.as_deref(), host_version) {
                (true, Some(recorded), Some(host)) if recorded.eq_ignore_ascii_case(host) => {
                    InstallationStatus::Installed
                }
                (true, Some(_), Some(_)) => InstallationStatus::Outdated,
                _ => InstallationStatus::NotInstalled,
            }
        }
    }
}
