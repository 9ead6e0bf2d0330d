//! Staging and live plugin directories.
//!
//! Both live under the plugin root: the artifact is extracted into
//! `plugin_tmp/` and only becomes visible as `plugin/` by a rename. The
//! plugin is a flat directory of files and symlinks; removal refuses to
//! descend into anything else.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::command::{CommandRunner, CommandSpec};
use crate::error::PluginError;

/// Extraction directory.
pub const STAGING_DIR_NAME: &str = "plugin_tmp";

/// Live installation directory.
pub const LIVE_DIR_NAME: &str = "plugin";

/// Previous live installation, kept until the new state is recorded.
pub const BACKUP_DIR_NAME: &str = "plugin_old";

/// License file shipped inside the plugin.
pub const LICENSE_FILE_NAME: &str = "license.txt";

/// Owner of `plugin_tmp/` under a plugin root.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(STAGING_DIR_NAME)
    }

    pub fn live_dir(&self) -> PathBuf {
        self.root.join(LIVE_DIR_NAME)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR_NAME)
    }

    pub fn exists(&self) -> bool {
        self.path().is_dir()
    }

    /// License text location inside the staged plugin.
    pub fn license_path(&self) -> PathBuf {
        self.path().join(LICENSE_FILE_NAME)
    }

    /// Create an empty staging directory, clearing a stale one.
    pub fn prepare(&self) -> Result<PathBuf, PluginError> {
        create_root(&self.root)?;

        let dir = self.path();
        if remove_flat_dir(&dir)? {
            warn!(path = %dir.display(), "Removed stale staging directory");
        }
        std::fs::create_dir(&dir).map_err(|e| PluginError::fs(&dir, e))?;
        Ok(dir)
    }

    /// Unpack the self-extracting `artifact` into a fresh staging directory
    /// and make it readable for group and others.
    pub async fn extract(
        &self,
        runner: &dyn CommandRunner,
        artifact: &Path,
    ) -> Result<(), PluginError> {
        let dir = self.prepare()?;
        debug!(path = %dir.display(), "Uncompressing the plugin file");

        let spec = CommandSpec::new("sh")
            .arg(artifact)
            .args(["--tar", "xf", "--no-same-owner"])
            .current_dir(&dir);
        let output = runner
            .run(&spec)
            .await
            .map_err(|e| PluginError::Extraction(format!("unable to run {}: {}", spec, e)))?;
        if !output.success() {
            return Err(PluginError::Extraction(output.describe_failure()));
        }

        normalize_permissions(&dir)?;
        debug!(path = %dir.display(), "Plugin uncompressed");
        Ok(())
    }

    /// Remove the staging directory if present.
    pub fn discard(&self) -> Result<(), PluginError> {
        let dir = self.path();
        if remove_flat_dir(&dir)? {
            debug!(path = %dir.display(), "Staging directory removed");
        }
        Ok(())
    }
}

/// Create the plugin root, and any missing parents, owner-only.
#[cfg(unix)]
fn create_root(root: &Path) -> Result<(), PluginError> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(root)
        .map_err(|e| PluginError::fs(root, e))
}

#[cfg(not(unix))]
fn create_root(root: &Path) -> Result<(), PluginError> {
    std::fs::create_dir_all(root).map_err(|e| PluginError::fs(root, e))
}

/// Remove a directory holding only files and symlinks.
///
/// Returns `Ok(false)` if `dir` does not exist. If it contains a
/// subdirectory nothing is deleted and an error is returned.
pub fn remove_flat_dir(dir: &Path) -> Result<bool, PluginError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(PluginError::fs(dir, e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PluginError::fs(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| PluginError::fs(&path, e))?;
        if file_type.is_dir() {
            return Err(PluginError::fs(
                &path,
                io::Error::new(io::ErrorKind::Other, "unexpected subdirectory, not removing"),
            ));
        }
        files.push(path);
    }

    for path in files {
        std::fs::remove_file(&path).map_err(|e| PluginError::fs(&path, e))?;
    }
    std::fs::remove_dir(dir).map_err(|e| PluginError::fs(dir, e))?;
    Ok(true)
}

/// `chmod -R go+rX`: read for group/other everywhere, execute where the
/// entry is a directory or already executable by someone.
#[cfg(unix)]
pub fn normalize_permissions(dir: &Path) -> Result<(), PluginError> {
    use std::os::unix::fs::PermissionsExt;

    for entry in walkdir::WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            PluginError::fs(path, io::Error::from(e))
        })?;
        if entry.path_is_symlink() {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| PluginError::fs(entry.path(), io::Error::from(e)))?;
        let mode = metadata.permissions().mode();
        let mut wanted = mode | 0o044;
        if metadata.is_dir() || mode & 0o111 != 0 {
            wanted |= 0o011;
        }
        if wanted != mode {
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(wanted))
                .map_err(|e| PluginError::fs(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn normalize_permissions(_dir: &Path) -> Result<(), PluginError> {
    Ok(())
}
