//! Configuration for plugin acquisition and installation.
//!
//! Paths default to the locations HPLIP itself uses; URLs default to HP's
//! published plugin index and download mirror.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::strategy::ArchTag;

/// Plugin index published by HP.
pub const DEFAULT_INDEX_URL: &str = "http://hplip.sf.net/plugin.conf";

/// Mirror used when the URL from the index fails.
pub const DEFAULT_MIRROR_BASE: &str = "https://developers.hp.com/sites/default/files";

/// Main plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// URL of the plugin index
    #[serde(default = "default_index_url")]
    pub index_url: String,

    /// Base URL of the fallback mirror
    #[serde(default = "default_mirror_base")]
    pub mirror_base: String,

    /// HPLIP configuration file (`[hplip] version`, `[dirs] home`)
    #[serde(default = "default_host_config_path")]
    pub host_config_path: PathBuf,

    /// Plugin state file (`[plugin] installed`, `eula`, `version`)
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Directory holding `plugin_tmp/` and `plugin/` (empty = `$HOME/.hplip`)
    #[serde(default)]
    pub plugin_root: Option<PathBuf>,

    /// Directory for temporary downloads (empty = system temp dir)
    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    /// How a verified plugin gets installed
    #[serde(default)]
    pub mode: InstallMode,

    /// Architecture tag override for library symlinks
    #[serde(default)]
    pub arch: Option<ArchTag>,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Detached signature verification
    #[serde(default)]
    pub signature: SignatureConfig,

    /// Installation script (script mode)
    #[serde(default)]
    pub script: ScriptConfig,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            index_url: default_index_url(),
            mirror_base: default_mirror_base(),
            host_config_path: default_host_config_path(),
            state_path: default_state_path(),
            plugin_root: None,
            download_dir: None,
            mode: InstallMode::default(),
            arch: None,
            network: NetworkConfig::default(),
            signature: SignatureConfig::default(),
            script: ScriptConfig::default(),
        }
    }
}

impl PluginConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, PluginError> {
        let content = std::fs::read_to_string(path).map_err(|e| PluginError::fs(path, e))?;
        toml::from_str(&content).map_err(|e| PluginError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), PluginError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PluginError::fs(parent, e))?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PluginError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| PluginError::fs(path, e))?;
        Ok(())
    }

    /// Directory holding the staging and live plugin directories.
    pub fn plugin_root(&self) -> Result<PathBuf, PluginError> {
        if let Some(dir) = &self.plugin_root {
            return Ok(dir.clone());
        }
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".hplip"))
            .ok_or_else(|| {
                PluginError::Config("no plugin_root configured and HOME is not set".to_string())
            })
    }

    /// Architecture tag, from config or the build target.
    pub fn arch(&self) -> ArchTag {
        self.arch.unwrap_or_else(ArchTag::current)
    }
}

/// Installation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Run the plugin's own install script with privileges
    #[default]
    Script,
    /// Symlink architecture libraries and move the tree into place
    Relocate,
}

impl InstallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Relocate => "relocate",
        }
    }
}

impl std::fmt::Display for InstallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network configuration for downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Hard timeout for a whole request in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum number of redirects to follow
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            timeout_seconds: default_timeout(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
        }
    }
}

/// Detached signature verification settings.
///
/// The keyring under `homedir` must already hold HP's signing key; this
/// crate never imports keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// gpg executable
    #[serde(default = "default_gpg_program")]
    pub program: String,

    /// `--homedir` passed to gpg; `$HOME` unless configured, `None` = gpg's default
    #[serde(default = "default_gpg_homedir")]
    pub homedir: Option<PathBuf>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            program: default_gpg_program(),
            homedir: default_gpg_homedir(),
        }
    }
}

/// Install script settings for [`InstallMode::Script`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Script path relative to the extracted plugin
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            entry_point: default_entry_point(),
        }
    }
}

// Default value functions for serde
fn default_index_url() -> String {
    DEFAULT_INDEX_URL.to_string()
}

fn default_mirror_base() -> String {
    DEFAULT_MIRROR_BASE.to_string()
}

fn default_host_config_path() -> PathBuf {
    PathBuf::from("/etc/hp/hplip.conf")
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/var/lib/hp/hplip.state")
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_timeout() -> u64 {
    300
}

fn default_max_redirects() -> usize {
    50
}

fn default_user_agent() -> String {
    format!("hpa-plugin/{}", env!("CARGO_PKG_VERSION"))
}

fn default_gpg_program() -> String {
    "gpg".to_string()
}

fn default_gpg_homedir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_entry_point() -> String {
    "installPlugin.py".to_string()
}
