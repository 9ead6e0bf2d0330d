//! Artifact verification: size, checksum, detached signature.
//!
//! Checks always run in that order and stop at the first failure. The
//! signature check cannot be disabled; the keyring it relies on is
//! provisioned by the deployment, never by this crate.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, error};

use crate::command::{CommandRunner, CommandSpec};
use crate::config::SignatureConfig;
use crate::error::PluginError;
use crate::fetch::{ArtifactDescriptor, DownloadedArtifact};

/// Buffer size for reading files during hash computation.
const HASH_BUFFER_SIZE: usize = 8192;

/// Digest used for the index checksum, chosen by its hex length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Algorithm for a hex checksum, or `None` if it is not a SHA-1 or
    /// SHA-256 hex digest.
    pub fn for_hex(hex: &str) -> Option<Self> {
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        match hex.len() {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

/// Checks a detached signature over a file.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, artifact: &Path, signature: &Path) -> Result<(), PluginError>;
}

/// Verifies downloaded artifacts for integrity and authenticity.
pub struct ArtifactVerifier {
    signature: Arc<dyn SignatureVerifier>,
}

impl ArtifactVerifier {
    pub fn new(signature: Arc<dyn SignatureVerifier>) -> Self {
        Self { signature }
    }

    /// Size, then checksum, then signature.
    pub async fn verify_all(
        &self,
        artifact: &DownloadedArtifact,
        descriptor: &ArtifactDescriptor,
    ) -> Result<(), PluginError> {
        self.verify_size(artifact.path(), descriptor.expected_size)?;
        self.verify_checksum(artifact.path(), &descriptor.expected_checksum)?;
        self.verify_signature(artifact.path(), artifact.signature_path())
            .await
    }

    /// Require the file to be exactly `expected` bytes long.
    pub fn verify_size(&self, path: &Path, expected: u64) -> Result<(), PluginError> {
        let actual = std::fs::metadata(path)
            .map_err(|e| PluginError::fs(path, e))?
            .len();
        if actual != expected {
            error!(
                expected,
                actual,
                path = %path.display(),
                "Downloaded plugin file is not of expected size"
            );
            return Err(PluginError::SizeMismatch { expected, actual });
        }
        debug!(size = actual, "Downloaded file size OK");
        Ok(())
    }

    /// Compare the file digest against a hex checksum, ignoring case.
    pub fn verify_checksum(&self, path: &Path, expected_hex: &str) -> Result<(), PluginError> {
        let expected = expected_hex.trim().to_ascii_lowercase();
        // Anything unrecognisable is compared as SHA-1 and can only mismatch.
        let algorithm = ChecksumAlgorithm::for_hex(&expected).unwrap_or(ChecksumAlgorithm::Sha1);
        let actual = compute_checksum(path, algorithm)?;

        if actual.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
            error!(
                expected = %expected,
                actual = %actual,
                algorithm = algorithm.name(),
                path = %path.display(),
                "Checksum of the plugin file does not match the plugin index"
            );
            return Err(PluginError::ChecksumMismatch { expected, actual });
        }
        debug!(checksum = %actual, "Downloaded file checksum OK");
        Ok(())
    }

    pub async fn verify_signature(
        &self,
        artifact: &Path,
        signature: &Path,
    ) -> Result<(), PluginError> {
        debug!(path = %artifact.display(), "Verifying plugin signature");
        self.signature.verify(artifact, signature).await?;
        debug!(path = %artifact.display(), "Plugin signature verified");
        Ok(())
    }
}

/// Lowercase hex digest of a file.
pub fn compute_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, PluginError> {
    match algorithm {
        ChecksumAlgorithm::Sha1 => hash_file::<Sha1>(path),
        ChecksumAlgorithm::Sha256 => hash_file::<Sha256>(path),
    }
}

fn hash_file<D: Digest>(path: &Path) -> Result<String, PluginError> {
    let mut file = File::open(path).map_err(|e| PluginError::fs(path, e))?;
    let mut hasher = D::new();
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| PluginError::fs(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Detached signature verification with `gpg --verify`.
pub struct GpgVerifier {
    runner: Arc<dyn CommandRunner>,
    program: String,
    homedir: Option<PathBuf>,
}

impl GpgVerifier {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &SignatureConfig) -> Self {
        Self {
            runner,
            program: config.program.clone(),
            homedir: config.homedir.clone(),
        }
    }

    fn command(&self, artifact: &Path, signature: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program);
        if let Some(homedir) = &self.homedir {
            spec = spec.arg("--homedir").arg(homedir);
        }
        spec.args(["--no-permission-warning", "--verify"])
            .arg(signature)
            .arg(artifact)
    }

    /// Where the signing key is expected, as gpg is invoked.
    fn keyring(&self) -> String {
        match &self.homedir {
            Some(homedir) => format!("{} --homedir {}", self.program, homedir.display()),
            None => format!("{} (default homedir)", self.program),
        }
    }
}

#[async_trait]
impl SignatureVerifier for GpgVerifier {
    async fn verify(&self, artifact: &Path, signature: &Path) -> Result<(), PluginError> {
        let spec = self.command(artifact, signature);
        let output = self.runner.run(&spec).await.map_err(|e| {
            error!("Unable to run {}: {}", self.program, e);
            PluginError::Signature(format!("unable to run {}: {}", self.program, e))
        })?;

        if !output.success() {
            error!("Plugin signature verification failed");
            error!(
                keyring = %self.keyring(),
                "If this is due to a missing public key: HP's signing key must be \
                 imported into this keyring before installing the plugin"
            );
            return Err(PluginError::Signature(output.describe_failure()));
        }
        Ok(())
    }
}
