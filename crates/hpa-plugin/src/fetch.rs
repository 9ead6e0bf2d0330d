//! Plugin index lookup and artifact download.
//!
//! The index is a config-format file with one section per HPLIP version:
//!
//! ```text
//! [3.21.8]
//! url=https://www.openprinting.org/download/printdriver/auxfiles/HP/plugins/hplip-3.21.8-plugin.run
//! size=12345678
//! checksum=0123456789abcdef0123456789abcdef01234567
//! ```
//!
//! Every download lands in a fresh temporary file that is deleted when its
//! handle is dropped, so no attempt leaves downloads behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hpa_config::ConfigDocument;
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::config::PluginConfig;
use crate::error::PluginError;
use crate::transport::HttpTransport;
use crate::verify::ChecksumAlgorithm;

/// Where and what to download for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Version key the descriptor was resolved for
    pub version: String,
    pub url: String,
    pub expected_size: u64,
    /// Hex digest from the index, as published
    pub expected_checksum: String,
}

/// A verified-or-not artifact and its detached signature on local disk.
#[derive(Debug)]
pub struct DownloadedArtifact {
    /// URL the artifact was actually fetched from
    pub source_url: String,
    artifact: TempPath,
    signature: TempPath,
}

impl DownloadedArtifact {
    pub fn path(&self) -> &Path {
        &self.artifact
    }

    pub fn signature_path(&self) -> &Path {
        &self.signature
    }
}

/// Downloads the index, the artifact and its signature.
pub struct ArtifactFetcher {
    transport: Arc<dyn HttpTransport>,
    index_url: String,
    mirror_base: String,
    /// Directory for temporary downloads (system default if unset)
    work_dir: Option<PathBuf>,
}

impl ArtifactFetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &PluginConfig) -> Self {
        Self {
            transport,
            index_url: config.index_url.clone(),
            mirror_base: config.mirror_base.clone(),
            work_dir: config.download_dir.clone(),
        }
    }

    /// Put temporary downloads in `dir` instead of the system temp dir.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Download the index to a new temporary file.
    pub async fn fetch_index(&self) -> Result<TempPath, PluginError> {
        info!(url = %self.index_url, "Getting plugin index");
        let dest = self.temp_file("index")?;
        self.transport.download(&self.index_url, &dest).await?;
        Ok(dest)
    }

    /// Parse a downloaded index file.
    pub fn read_index(&self, path: &Path) -> Result<ConfigDocument, PluginError> {
        let text = std::fs::read_to_string(path).map_err(|e| PluginError::fs(path, e))?;
        Ok(ConfigDocument::parse(&text))
    }

    /// Download the artifact, falling back to the mirror once, then its
    /// signature from next to whichever URL worked.
    pub async fn fetch_artifact(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> Result<DownloadedArtifact, PluginError> {
        let artifact = self.temp_file("plugin")?;

        info!(version = %descriptor.version, "Getting plugin file from official location");
        debug!(url = %descriptor.url, "Trying URL");
        let source_url = match self.transport.download(&descriptor.url, &artifact).await {
            Ok(_) => descriptor.url.clone(),
            Err(primary_err) => {
                let fallback = fallback_url(&self.mirror_base, &descriptor.version);
                warn!(
                    url = %descriptor.url,
                    "Unable to download plugin file ({}), trying backup server", primary_err
                );
                debug!(url = %fallback, "Trying URL");
                if let Err(fallback_err) = self.transport.download(&fallback, &artifact).await {
                    return Err(PluginError::Download {
                        primary: descriptor.url.clone(),
                        fallback,
                        reason: format!("{}; {}", primary_err, fallback_err),
                    });
                }
                fallback
            }
        };

        let signature_url = format!("{}.asc", source_url);
        debug!(url = %signature_url, "Getting plugin signature file");
        let signature = self.temp_file("signature")?;
        self.transport.download(&signature_url, &signature).await?;

        Ok(DownloadedArtifact {
            source_url,
            artifact,
            signature,
        })
    }

    fn temp_file(&self, label: &str) -> Result<TempPath, PluginError> {
        let suffix = format!(".{}", label);
        let mut builder = tempfile::Builder::new();
        builder.prefix("hplip-").suffix(&suffix);
        let file = match &self.work_dir {
            Some(dir) => builder
                .tempfile_in(dir)
                .map_err(|e| PluginError::fs(dir, e))?,
            None => builder.tempfile()?,
        };
        Ok(file.into_temp_path())
    }
}

/// Look up url, size and checksum for `version`.
///
/// A missing section means the index does not know this version yet; it
/// is reported separately from a section with missing fields.
pub fn resolve_descriptor(
    index: &ConfigDocument,
    version: &str,
) -> Result<ArtifactDescriptor, PluginError> {
    if !index.has_section(version) {
        return Err(PluginError::VersionNotPublished {
            version: version.to_string(),
        });
    }

    let field = |name: &'static str| -> Result<String, PluginError> {
        index
            .get(Some(version), name)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PluginError::IndexFieldMissing {
                version: version.to_string(),
                field: name,
            })
    };

    let url = field("url")?;
    let size = field("size")?;
    let checksum = field("checksum")?;

    let expected_size = match size.parse::<u64>() {
        Ok(n) if n > 0 => n,
        _ => {
            return Err(PluginError::InvalidIndexField {
                version: version.to_string(),
                field: "size",
                value: size,
            })
        }
    };

    if ChecksumAlgorithm::for_hex(&checksum).is_none() {
        return Err(PluginError::InvalidIndexField {
            version: version.to_string(),
            field: "checksum",
            value: checksum,
        });
    }

    Ok(ArtifactDescriptor {
        version: version.to_string(),
        url,
        expected_size,
        expected_checksum: checksum,
    })
}

/// Deterministic mirror URL for a version.
pub fn fallback_url(mirror_base: &str, version: &str) -> String {
    format!(
        "{}/hplip-{}-plugin.run",
        mirror_base.trim_end_matches('/'),
        version
    )
}
