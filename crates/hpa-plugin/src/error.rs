//! Error types for plugin acquisition and installation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while fetching, verifying, installing or removing
/// the plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Transport failure, non-2xx status or too many redirects
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// The index has no section for this version (not yet published)
    #[error("no plugin published for version {version}; is this version already released?")]
    VersionNotPublished { version: String },

    /// The version section exists but lacks a required field
    #[error("plugin index entry for version {version} is missing '{field}'")]
    IndexFieldMissing { version: String, field: &'static str },

    /// A field is present but unusable
    #[error("plugin index entry for version {version} has invalid '{field}': {value:?}")]
    InvalidIndexField {
        version: String,
        field: &'static str,
        value: String,
    },

    /// Both the primary and the fallback URL failed
    #[error("unable to download plugin from {primary} or {fallback}: {reason}")]
    Download {
        primary: String,
        fallback: String,
        reason: String,
    },

    /// Downloaded size differs from the index
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Downloaded content digest differs from the index
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Detached signature did not verify
    #[error("signature verification failed: {0}")]
    Signature(String),

    /// Unpacking the self-extracting archive failed
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Filesystem operation on a specific path failed
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another install/remove attempt is in progress
    #[error("another plugin install or removal is already in progress")]
    ConcurrentAttempt,

    /// Install/remove requires root
    #[error("the printer application must run as root to install or remove the plugin")]
    PrivilegeRequired,

    /// Reinstall over an up-to-date plugin needs explicit confirmation
    #[error("plugin is installed and up-to-date; reinstalling requires confirmation")]
    ConfirmationRequired,

    /// License accepted but nothing is staged
    #[error("no downloaded plugin is waiting for license acceptance")]
    NothingStaged,

    /// The configured install mode cannot uninstall
    #[error("plugin removal is not supported in {0} mode")]
    RemovalUnsupported(&'static str),

    /// Host software version could not be determined
    #[error("unable to determine installed HPLIP version: {0}")]
    HostVersionUnavailable(String),

    /// External installation script failed
    #[error("plugin installation script failed: {0}")]
    InstallScript(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Wrap an IO error with the path it concerns.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Discriminant for presentation layers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::VersionNotPublished { .. }
            | Self::IndexFieldMissing { .. }
            | Self::InvalidIndexField { .. } => ErrorKind::IndexIncomplete,
            Self::Download { .. } => ErrorKind::Download,
            Self::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::Signature(_) => ErrorKind::Signature,
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::Filesystem { .. } | Self::Io(_) | Self::InstallScript(_) => {
                ErrorKind::Filesystem
            }
            Self::ConcurrentAttempt => ErrorKind::ConcurrentAttempt,
            Self::PrivilegeRequired => ErrorKind::PrivilegeRequired,
            Self::ConfirmationRequired => ErrorKind::ConfirmationRequired,
            Self::NothingStaged => ErrorKind::NothingStaged,
            Self::RemovalUnsupported(_) => ErrorKind::Unsupported,
            Self::HostVersionUnavailable(_) | Self::Config(_) => ErrorKind::Configuration,
        }
    }
}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        let reason = if err.is_redirect() {
            format!("too many redirects ({})", err)
        } else if err.is_timeout() {
            format!("timed out ({})", err)
        } else {
            err.to_string()
        };
        PluginError::Network { url, reason }
    }
}

impl From<hpa_config::ConfigError> for PluginError {
    fn from(err: hpa_config::ConfigError) -> Self {
        PluginError::Config(err.to_string())
    }
}

/// Plain discriminant of [`PluginError`], serialisable for status pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    IndexIncomplete,
    Download,
    SizeMismatch,
    ChecksumMismatch,
    Signature,
    Extraction,
    Filesystem,
    ConcurrentAttempt,
    PrivilegeRequired,
    ConfirmationRequired,
    NothingStaged,
    Unsupported,
    Configuration,
}
