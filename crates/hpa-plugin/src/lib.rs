//! # hpa-plugin
//!
//! Acquisition and installation of HP's proprietary HPLIP plugin for the
//! HPLIP Printer Application.
//!
//! This crate handles:
//! - Deriving the plugin status from `hplip.conf` and `hplip.state`
//! - Downloading the plugin index, the plugin and its detached signature
//! - Size, checksum and signature verification before anything is unpacked
//! - Extraction into a staging directory and promotion to the live location
//! - Recording the installed version so later runs are idempotent
//!
//! ## Safety of the installation
//!
//! Only one install or removal runs at a time. Every failed attempt removes
//! its downloads and staging directory and leaves the state file as it was.
//! The state file is replaced by rename, never rewritten in place.

pub mod command;
pub mod config;
pub mod error;
pub mod fetch;
pub mod host;
pub mod manager;
pub mod presenter;
pub mod probe;
pub mod service;
pub mod staging;
pub mod state;
pub mod strategy;
pub mod transport;
pub mod verify;

// Re-export main types for convenience
pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};
pub use config::{InstallMode, NetworkConfig, PluginConfig, ScriptConfig, SignatureConfig};
pub use error::{ErrorKind, PluginError};
pub use fetch::{resolve_descriptor, ArtifactDescriptor, ArtifactFetcher, DownloadedArtifact};
pub use host::{HostEnvironment, SystemHost};
pub use manager::{AttemptPhase, AttemptSession, InstallIntent, InstallManager, InstallOutcome};
pub use presenter::{ActionOutcome, ActionReport, StatusView, UiState};
pub use probe::{InstallationStatus, VersionProbe};
pub use service::{PluginService, UnknownAction, UserAction};
pub use staging::StagingArea;
pub use state::{PersistedState, StateRecorder, StateSnapshot, StateStore};
pub use strategy::{ArchTag, InstallStrategy, RelocateInstaller, ScriptInstaller};
pub use transport::{HttpTransport, ReqwestTransport};
pub use verify::{ArtifactVerifier, ChecksumAlgorithm, GpgVerifier, SignatureVerifier};
