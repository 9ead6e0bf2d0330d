//! Persisted plugin installation state (`hplip.state`).
//!
//! The state file is a [`ConfigDocument`] with a `[plugin]` section:
//!
//! ```text
//! [plugin]
//! installed = 1
//! eula = 1
//! version = 3.21.8
//! ```
//!
//! Lines other than these keys are preserved. Rewrites go to a temporary
//! file in the same directory which is then renamed over the old file, so
//! an interrupted write leaves the previous file intact.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use hpa_config::ConfigDocument;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::PluginError;

/// Section holding the plugin keys.
pub const STATE_SECTION: &str = "plugin";

const KEY_INSTALLED: &str = "installed";
const KEY_EULA: &str = "eula";
const KEY_VERSION: &str = "version";

/// Decoded contents of the `[plugin]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    pub installed: bool,
    pub version: Option<String>,
    pub license_accepted: bool,
}

impl PersistedState {
    pub fn from_document(doc: &ConfigDocument) -> Self {
        let section = Some(STATE_SECTION);
        Self {
            installed: doc.get(section, KEY_INSTALLED).is_some_and(parse_flag),
            version: doc
                .get(section, KEY_VERSION)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            license_accepted: doc.get(section, KEY_EULA).is_some_and(parse_flag),
        }
    }
}

/// What was found at the state path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSnapshot {
    /// No state file
    Missing,
    /// Zero-length state file
    Empty,
    Present(PersistedState),
}

/// Records the outcome of an install or removal.
pub trait StateRecorder: Send + Sync {
    fn record_installed(&self, version: &str) -> Result<bool, PluginError>;

    fn record_removed(&self) -> Result<bool, PluginError>;
}

/// Reads and atomically rewrites the state file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles on the file.
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file.
    pub fn read(&self) -> Result<StateSnapshot, PluginError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StateSnapshot::Missing)
            }
            Err(e) => return Err(PluginError::fs(&self.path, e)),
        };

        if text.is_empty() {
            return Ok(StateSnapshot::Empty);
        }
        Ok(StateSnapshot::Present(PersistedState::from_document(
            &ConfigDocument::parse(&text),
        )))
    }

    /// Record a successful installation of `version` with accepted license.
    pub fn record_installed(&self, version: &str) -> Result<bool, PluginError> {
        info!(path = %self.path.display(), version, "Registering plugin installation");
        self.update(&[
            (KEY_INSTALLED, Some("1")),
            (KEY_EULA, Some("1")),
            (KEY_VERSION, Some(version)),
        ])
    }

    /// Record that the plugin was removed.
    pub fn record_removed(&self) -> Result<bool, PluginError> {
        info!(path = %self.path.display(), "Registering plugin removal");
        self.update(&[
            (KEY_INSTALLED, Some("0")),
            (KEY_EULA, None),
            (KEY_VERSION, None),
        ])
    }

    /// Apply edits to the `[plugin]` section and replace the file if
    /// anything changed.
    fn update(&self, edits: &[(&str, Option<&str>)]) -> Result<bool, PluginError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(PluginError::fs(&self.path, e)),
        };

        let mut doc = ConfigDocument::parse(&text);
        let mut changed = false;
        for (key, value) in edits {
            changed |= doc.set(Some(STATE_SECTION), key, *value)?;
        }

        if !changed {
            debug!(path = %self.path.display(), "Plugin state unchanged");
            return Ok(false);
        }

        self.replace_file(&doc.to_string())?;
        debug!(path = %self.path.display(), "Plugin state written");
        Ok(true)
    }

    fn replace_file(&self, content: &str) -> Result<(), PluginError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| PluginError::fs(parent, e))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| PluginError::fs(parent, e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| PluginError::fs(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| PluginError::fs(tmp.path(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))
                .map_err(|e| PluginError::fs(tmp.path(), e))?;
        }

        tmp.persist(&self.path)
            .map_err(|e| PluginError::fs(&self.path, e.error))?;
        Ok(())
    }
}

/// Integer flag as HPLIP writes it; `true`/`yes` are accepted too.
fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") {
        return true;
    }
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<u64>().is_ok_and(|n| n != 0)
}

impl StateRecorder for StateStore {
    fn record_installed(&self, version: &str) -> Result<bool, PluginError> {
        StateStore::record_installed(self, version)
    }

    fn record_removed(&self) -> Result<bool, PluginError> {
        StateStore::record_removed(self)
    }
}
