//! Installation strategies.
//!
//! A staged plugin is installed either by HP's own installer script
//! ([`ScriptInstaller`]) or by moving the extracted tree into place
//! ([`RelocateInstaller`]). The relocating strategy is self-contained and
//! is the only one that can uninstall again.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::config::{InstallMode, PluginConfig};
use crate::error::PluginError;
use crate::host::HostEnvironment;
use crate::staging::{remove_flat_dir, StagingArea, LICENSE_FILE_NAME};

/// CPU architecture tag used in the plugin's library file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchTag {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "x86_32")]
    X86_32,
    #[serde(rename = "arm64")]
    Arm64,
    #[serde(rename = "arm32")]
    Arm32,
}

impl ArchTag {
    /// Tag for the architecture this crate was built for.
    ///
    /// Targets HP publishes no libraries for fall back to `x86_64`.
    pub fn current() -> Self {
        if cfg!(target_arch = "aarch64") {
            Self::Arm64
        } else if cfg!(target_arch = "arm") {
            Self::Arm32
        } else if cfg!(target_arch = "x86") {
            Self::X86_32
        } else {
            Self::X86_64
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::X86_32 => "x86_32",
            Self::Arm64 => "arm64",
            Self::Arm32 => "arm32",
        }
    }

    /// Link name for an architecture-specific library.
    ///
    /// `hpcups-x86_64.so` becomes `hpcups.so` and `libhpmud-arm64.so.0`
    /// becomes `libhpmud.so.0`. Files for other architectures yield `None`.
    pub fn link_name(&self, file_name: &str) -> Option<String> {
        let marker = format!("-{}.so", self.as_str());
        let idx = file_name.find(&marker)?;
        if idx == 0 {
            return None;
        }
        let suffix_start = idx + 1 + self.as_str().len();
        Some(format!("{}{}", &file_name[..idx], &file_name[suffix_start..]))
    }
}

impl fmt::Display for ArchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchTag {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" => Ok(Self::X86_64),
            "x86_32" => Ok(Self::X86_32),
            "arm64" => Ok(Self::Arm64),
            "arm32" => Ok(Self::Arm32),
            other => Err(PluginError::Config(format!("unknown architecture tag: {}", other))),
        }
    }
}

/// Turns a staged plugin into an installed one.
#[async_trait]
pub trait InstallStrategy: Send + Sync {
    fn mode(&self) -> InstallMode;

    /// Install from `staging`. On error the live installation is unchanged.
    ///
    /// A replaced installation may be kept aside until
    /// [`InstallStrategy::commit`] or [`InstallStrategy::abort`].
    async fn install(&self, staging: &StagingArea) -> Result<(), PluginError>;

    /// Whether [`InstallStrategy::remove`] is supported.
    fn supports_removal(&self) -> bool {
        false
    }

    /// Take the live installation out of use. It stays recoverable until
    /// [`InstallStrategy::commit`] or [`InstallStrategy::abort`].
    async fn remove(&self, _staging: &StagingArea) -> Result<(), PluginError> {
        Err(PluginError::RemovalUnsupported(self.mode().as_str()))
    }

    /// Drop whatever the last `install` or `remove` kept aside.
    async fn commit(&self, _staging: &StagingArea) -> Result<(), PluginError> {
        Ok(())
    }

    /// Undo the last successful `install` or `remove`.
    async fn abort(&self, _staging: &StagingArea) -> Result<(), PluginError> {
        Ok(())
    }

    /// Where the installed plugin's license text lives.
    fn installed_license_path(
        &self,
        staging: &StagingArea,
        host: &dyn HostEnvironment,
    ) -> Option<PathBuf>;
}

/// Strategy for the configured [`InstallMode`].
pub fn for_config(config: &PluginConfig, runner: Arc<dyn CommandRunner>) -> Arc<dyn InstallStrategy> {
    match config.mode {
        InstallMode::Script => Arc::new(ScriptInstaller::new(
            runner,
            &config.script.interpreter,
            &config.script.entry_point,
        )),
        InstallMode::Relocate => Arc::new(RelocateInstaller::new(config.arch())),
    }
}

// ============================================================================
// Script installation
// ============================================================================

/// Runs the installer script shipped in the plugin, e.g.
/// `python3 installPlugin.py`, from inside the staging directory.
pub struct ScriptInstaller {
    runner: Arc<dyn CommandRunner>,
    interpreter: String,
    entry_point: String,
}

impl ScriptInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>, interpreter: &str, entry_point: &str) -> Self {
        Self {
            runner,
            interpreter: interpreter.to_string(),
            entry_point: entry_point.to_string(),
        }
    }
}

#[async_trait]
impl InstallStrategy for ScriptInstaller {
    fn mode(&self) -> InstallMode {
        InstallMode::Script
    }

    async fn install(&self, staging: &StagingArea) -> Result<(), PluginError> {
        let dir = staging.path();
        if !dir.join(&self.entry_point).is_file() {
            return Err(PluginError::InstallScript(format!(
                "{} not found in {}",
                self.entry_point,
                dir.display()
            )));
        }

        info!(path = %dir.display(), "Installing the plugin");
        let spec = CommandSpec::new(&self.interpreter)
            .arg(&self.entry_point)
            .current_dir(&dir);
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| PluginError::InstallScript(format!("unable to run {}: {}", spec, e)))?;

        if !output.success() {
            error!(command = %spec, "Unable to install the plugin");
            return Err(PluginError::InstallScript(output.describe_failure()));
        }
        Ok(())
    }

    fn installed_license_path(
        &self,
        _staging: &StagingArea,
        host: &dyn HostEnvironment,
    ) -> Option<PathBuf> {
        match host.data_dir() {
            Some(home) => Some(home.join("data").join("plugins").join(LICENSE_FILE_NAME)),
            None => {
                error!("Unable to locate HPLIP data directory, cannot load license text");
                None
            }
        }
    }
}

// ============================================================================
// Relocating installation
// ============================================================================

/// Links the current architecture's libraries under their generic names and
/// renames the staging directory to the live one.
pub struct RelocateInstaller {
    arch: ArchTag,
}

impl RelocateInstaller {
    pub fn new(arch: ArchTag) -> Self {
        Self { arch }
    }

    pub fn arch(&self) -> ArchTag {
        self.arch
    }

    /// Symlink `name-<arch>.so*` to `name.so*` inside `dir`.
    pub fn link_libraries(&self, dir: &Path) -> Result<usize, PluginError> {
        debug!(
            arch = %self.arch,
            path = %dir.display(),
            "Adding symlinks for dynamic link libraries"
        );

        let mut links = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| PluginError::fs(dir, e))? {
            let entry = entry.map_err(|e| PluginError::fs(dir, e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(link) = self.arch.link_name(name) {
                links.push((name.to_string(), link));
            }
        }

        for (target, link) in &links {
            let link_path = dir.join(link);
            symlink(Path::new(target), &link_path).map_err(|e| PluginError::fs(&link_path, e))?;
        }
        Ok(links.len())
    }

    /// Swap the staging directory in for the live one.
    ///
    /// The old installation stays in `plugin_old/` until commit or abort,
    /// and is put back right away if the staging directory cannot be
    /// renamed.
    fn promote(&self, staging: &StagingArea) -> Result<(), PluginError> {
        let staged = staging.path();
        let live = staging.live_dir();
        let backup = staging.backup_dir();

        let had_previous = self.set_aside(staging)?;

        debug!(from = %staged.display(), to = %live.display(), "Renaming plugin directory");
        if let Err(e) = std::fs::rename(&staged, &live) {
            if had_previous {
                if let Err(restore) = std::fs::rename(&backup, &live) {
                    error!(
                        path = %backup.display(),
                        "Unable to restore previous plugin version: {}", restore
                    );
                }
            }
            return Err(PluginError::fs(&staged, e));
        }
        Ok(())
    }

    /// Rename the live installation to `plugin_old/`. Returns whether there
    /// was one.
    fn set_aside(&self, staging: &StagingArea) -> Result<bool, PluginError> {
        let live = staging.live_dir();
        let backup = staging.backup_dir();

        if backup.exists() && !live.exists() {
            // An earlier attempt died after moving the plugin aside.
            warn!(path = %backup.display(), "Restoring plugin left aside by an interrupted attempt");
            std::fs::rename(&backup, &live).map_err(|e| PluginError::fs(&backup, e))?;
        }
        remove_flat_dir(&backup)?;

        if !live.exists() {
            return Ok(false);
        }
        debug!(path = %live.display(), "Moving plugin aside");
        // Refuse trees that are not ours before touching anything.
        ensure_flat(&live)?;
        std::fs::rename(&live, &backup).map_err(|e| PluginError::fs(&live, e))?;
        Ok(true)
    }
}

#[async_trait]
impl InstallStrategy for RelocateInstaller {
    fn mode(&self) -> InstallMode {
        InstallMode::Relocate
    }

    async fn install(&self, staging: &StagingArea) -> Result<(), PluginError> {
        let linked = self.link_libraries(&staging.path())?;
        debug!(count = linked, "Library links created");
        self.promote(staging)
    }

    fn supports_removal(&self) -> bool {
        true
    }

    async fn remove(&self, staging: &StagingArea) -> Result<(), PluginError> {
        let live = staging.live_dir();
        info!(path = %live.display(), "Removing plugin");
        if !self.set_aside(staging)? {
            debug!(path = %live.display(), "No plugin directory to remove");
        }
        Ok(())
    }

    async fn commit(&self, staging: &StagingArea) -> Result<(), PluginError> {
        let backup = staging.backup_dir();
        if remove_flat_dir(&backup)? {
            debug!(path = %backup.display(), "Old plugin version removed");
        }
        Ok(())
    }

    async fn abort(&self, staging: &StagingArea) -> Result<(), PluginError> {
        let live = staging.live_dir();
        let backup = staging.backup_dir();

        remove_flat_dir(&live)?;
        if backup.exists() {
            std::fs::rename(&backup, &live).map_err(|e| PluginError::fs(&backup, e))?;
            info!(path = %live.display(), "Previous plugin version restored");
        }
        Ok(())
    }

    fn installed_license_path(
        &self,
        staging: &StagingArea,
        _host: &dyn HostEnvironment,
    ) -> Option<PathBuf> {
        Some(staging.live_dir().join(LICENSE_FILE_NAME))
    }
}

fn ensure_flat(dir: &Path) -> Result<(), PluginError> {
    for entry in std::fs::read_dir(dir).map_err(|e| PluginError::fs(dir, e))? {
        let entry = entry.map_err(|e| PluginError::fs(dir, e))?;
        let file_type = entry.file_type().map_err(|e| PluginError::fs(entry.path(), e))?;
        if file_type.is_dir() {
            return Err(PluginError::fs(
                entry.path(),
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "unexpected subdirectory, not removing",
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}
