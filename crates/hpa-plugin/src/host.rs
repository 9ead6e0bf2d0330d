//! What the printer application host provides to the plugin workflow.

use std::path::PathBuf;

use hpa_config::ConfigDocument;
use tracing::error;

use crate::error::PluginError;

/// Host capabilities the plugin workflow depends on.
pub trait HostEnvironment: Send + Sync {
    /// Version of the installed HPLIP; also the plugin index section name.
    fn host_version(&self) -> Result<String, PluginError>;

    /// True if the process may install or remove the plugin.
    fn is_privileged(&self) -> bool;

    /// HPLIP data directory (`[dirs] home`), if known.
    fn data_dir(&self) -> Option<PathBuf> {
        None
    }
}

/// Host backed by `hplip.conf` and the process's effective UID.
#[derive(Debug, Clone)]
pub struct SystemHost {
    host_config_path: PathBuf,
}

impl SystemHost {
    pub fn new(host_config_path: impl Into<PathBuf>) -> Self {
        Self {
            host_config_path: host_config_path.into(),
        }
    }

    fn read_config(&self) -> Result<ConfigDocument, PluginError> {
        let text = std::fs::read_to_string(&self.host_config_path).map_err(|e| {
            error!(
                path = %self.host_config_path.display(),
                "Unable to open HPLIP configuration file: {}", e
            );
            PluginError::HostVersionUnavailable(format!(
                "cannot read {}: {}",
                self.host_config_path.display(),
                e
            ))
        })?;
        Ok(ConfigDocument::parse(&text))
    }
}

impl HostEnvironment for SystemHost {
    fn host_version(&self) -> Result<String, PluginError> {
        let doc = self.read_config()?;
        match doc.get(Some("hplip"), "version") {
            Some(version) if !version.is_empty() => Ok(version.to_string()),
            _ => Err(PluginError::HostVersionUnavailable(format!(
                "no [hplip] version in {}",
                self.host_config_path.display()
            ))),
        }
    }

    fn is_privileged(&self) -> bool {
        effective_uid_is_root()
    }

    fn data_dir(&self) -> Option<PathBuf> {
        let doc = self.read_config().ok()?;
        doc.get(Some("dirs"), "home")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
    }
}

#[cfg(unix)]
fn effective_uid_is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn effective_uid_is_root() -> bool {
    false
}
