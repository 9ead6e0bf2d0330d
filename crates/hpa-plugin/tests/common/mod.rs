//! Shared fixture for the integration tests: a host, HTTP transport and
//! command runner that never leave the test's temporary directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hpa_plugin::{
    ArchTag, CommandOutput, CommandRunner, CommandSpec, HostEnvironment, HttpTransport,
    InstallManager, InstallMode, PluginConfig, PluginError, PluginService, StateRecorder,
};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const VERSION: &str = "3.21.8";
pub const INDEX_URL: &str = "http://index.test/plugin.conf";
pub const PLUGIN_URL: &str = "http://downloads.test/hplip-3.21.8-plugin.run";
pub const MIRROR_BASE: &str = "http://mirror.test/files";
pub const MIRROR_URL: &str = "http://mirror.test/files/hplip-3.21.8-plugin.run";

/// sha1 of 100 zero bytes
pub const ZEROS_SHA1: &str = "ed4a77d1b56a118938788fc53037759b6c501e3d";

pub const LICENSE_TEXT: &str = "HP Proprietary Plugin License Agreement\n";

pub fn index_for(version: &str, url: &str, size: &str, checksum: &str) -> String {
    format!(
        "[3.20.11]\nurl=http://downloads.test/hplip-3.20.11-plugin.run\nsize=42\nchecksum={checksum}\n\n\
         [{version}]\nurl={url}\nsize={size}\nchecksum={checksum}\n"
    )
}

pub fn default_index() -> String {
    index_for(VERSION, PLUGIN_URL, "100", ZEROS_SHA1)
}

// ============================================================================
// Host
// ============================================================================

pub struct StubHost {
    pub version: Mutex<Option<String>>,
    pub privileged: AtomicBool,
    pub data_dir: Option<PathBuf>,
}

impl HostEnvironment for StubHost {
    fn host_version(&self) -> Result<String, PluginError> {
        self.version
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PluginError::HostVersionUnavailable("not configured".to_string()))
    }

    fn is_privileged(&self) -> bool {
        self.privileged.load(Ordering::SeqCst)
    }

    fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone()
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Holds a download of `url` until released.
pub struct Gate {
    pub url: String,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct StubTransport {
    files: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    gate: Mutex<Option<Gate>>,
}

impl StubTransport {
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(url.to_string(), body.into());
    }

    pub fn unserve(&self, url: &str) {
        self.files.lock().unwrap().remove(url);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Block downloads of `url`; returns (entered, release).
    pub fn gate(&self, url: &str) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Gate {
            url: url.to_string(),
            entered: entered.clone(),
            release: release.clone(),
        });
        (entered, release)
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, PluginError> {
        self.requests.lock().unwrap().push(url.to_string());

        let gate = self
            .gate
            .lock()
            .unwrap()
            .as_ref()
            .filter(|g| g.url == url)
            .map(|g| (g.entered.clone(), g.release.clone()));
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        let body = self.files.lock().unwrap().get(url).cloned();
        match body {
            Some(body) => {
                std::fs::write(dest, &body).map_err(|e| PluginError::fs(dest, e))?;
                Ok(body.len() as u64)
            }
            None => Err(PluginError::Network {
                url: url.to_string(),
                reason: "HTTP status 404 Not Found".to_string(),
            }),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Plays gpg, the self-extracting archive and the install script.
pub struct StubRunner {
    pub gpg_code: AtomicI32,
    pub extract_code: AtomicI32,
    pub script_code: AtomicI32,
    /// Files the archive "contains"
    pub contents: Mutex<Vec<(String, Vec<u8>)>>,
    pub calls: Mutex<Vec<CommandSpec>>,
}

impl Default for StubRunner {
    fn default() -> Self {
        Self {
            gpg_code: AtomicI32::new(0),
            extract_code: AtomicI32::new(0),
            script_code: AtomicI32::new(0),
            contents: Mutex::new(vec![
                ("license.txt".to_string(), LICENSE_TEXT.as_bytes().to_vec()),
                ("installPlugin.py".to_string(), b"print('ok')\n".to_vec()),
                ("hpcups-x86_64.so".to_string(), b"x86_64".to_vec()),
                ("hpcups-arm64.so".to_string(), b"arm64".to_vec()),
                ("plugin.spec".to_string(), b"[plugin]\n".to_vec()),
            ]),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl StubRunner {
    pub fn programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.program.to_string_lossy().into_owned())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for StubRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PluginError> {
        self.calls.lock().unwrap().push(spec.clone());

        let program = spec.program.to_string_lossy().into_owned();
        let code = match program.as_str() {
            "gpg" => self.gpg_code.load(Ordering::SeqCst),
            "sh" => {
                let code = self.extract_code.load(Ordering::SeqCst);
                let dir = spec.current_dir.clone().expect("extraction needs a directory");
                let contents = self.contents.lock().unwrap().clone();
                // A failing extraction still leaves a partial file behind.
                let take = if code == 0 { contents.len() } else { 1 };
                for (name, body) in contents.into_iter().take(take) {
                    std::fs::write(dir.join(name), body).unwrap();
                }
                code
            }
            "python3" => self.script_code.load(Ordering::SeqCst),
            _ => {
                return Err(PluginError::Io(std::io::Error::from(
                    std::io::ErrorKind::NotFound,
                )))
            }
        };

        Ok(CommandOutput {
            code: Some(code),
            output: if code == 0 {
                String::new()
            } else {
                format!("{} failed\n", program)
            },
        })
    }
}

// ============================================================================
// State
// ============================================================================

/// State file on a volume that has gone read-only.
pub struct ReadOnlyState {
    pub path: PathBuf,
}

impl ReadOnlyState {
    fn refuse(&self) -> Result<bool, PluginError> {
        Err(PluginError::fs(
            &self.path,
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        ))
    }
}

impl StateRecorder for ReadOnlyState {
    fn record_installed(&self, _version: &str) -> Result<bool, PluginError> {
        self.refuse()
    }

    fn record_removed(&self) -> Result<bool, PluginError> {
        self.refuse()
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Fixture {
    pub dir: TempDir,
    pub config: PluginConfig,
    pub host: Arc<StubHost>,
    pub transport: Arc<StubTransport>,
    pub runner: Arc<StubRunner>,
}

impl Fixture {
    /// Everything published and verifying; nothing installed.
    pub fn new(mode: InstallMode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("downloads")).unwrap();
        std::fs::create_dir_all(root.join("state")).unwrap();

        let config = PluginConfig {
            index_url: INDEX_URL.to_string(),
            mirror_base: MIRROR_BASE.to_string(),
            host_config_path: root.join("hplip.conf"),
            state_path: root.join("state").join("hplip.state"),
            plugin_root: Some(root.join("hplip")),
            download_dir: Some(root.join("downloads")),
            mode,
            arch: Some(ArchTag::X86_64),
            ..PluginConfig::default()
        };

        let host = Arc::new(StubHost {
            version: Mutex::new(Some(VERSION.to_string())),
            privileged: AtomicBool::new(true),
            data_dir: Some(root.join("share")),
        });

        let transport = Arc::new(StubTransport::default());
        transport.serve(INDEX_URL, default_index());
        transport.serve(PLUGIN_URL, vec![0u8; 100]);
        transport.serve(&format!("{}.asc", PLUGIN_URL), "-----BEGIN PGP SIGNATURE-----\n");

        Self {
            dir,
            config,
            host,
            transport,
            runner: Arc::new(StubRunner::default()),
        }
    }

    pub fn manager(&self) -> Arc<InstallManager> {
        Arc::new(
            InstallManager::new(
                &self.config,
                self.host.clone(),
                self.transport.clone(),
                self.runner.clone(),
            )
            .unwrap(),
        )
    }

    /// Manager whose state writes all fail.
    pub fn manager_with_read_only_state(&self) -> Arc<InstallManager> {
        let manager = InstallManager::new(
            &self.config,
            self.host.clone(),
            self.transport.clone(),
            self.runner.clone(),
        )
        .unwrap()
        .with_state_recorder(Arc::new(ReadOnlyState {
            path: self.config.state_path.clone(),
        }));
        Arc::new(manager)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.dir.path().join("hplip").join("plugin_old")
    }

    pub fn service(&self) -> PluginService {
        PluginService::new(self.manager())
    }

    pub fn write_state(&self, text: &str) {
        std::fs::write(&self.config.state_path, text).unwrap();
    }

    pub fn installed(&self, version: &str) {
        self.write_state(&format!(
            "[plugin]\ninstalled = 1\neula = 1\nversion = {}\n",
            version
        ));
    }

    /// Install a live plugin directory as a previous relocate install would.
    pub fn live_plugin(&self, files: &[&str]) {
        let live = self.live_dir();
        std::fs::create_dir_all(&live).unwrap();
        for name in files {
            std::fs::write(live.join(name), name.as_bytes()).unwrap();
        }
    }

    pub fn read_state(&self) -> Option<Vec<u8>> {
        std::fs::read(&self.config.state_path).ok()
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.dir.path().join("hplip").join("plugin_tmp")
    }

    pub fn live_dir(&self) -> PathBuf {
        self.dir.path().join("hplip").join("plugin")
    }

    /// Names of leftover files in the download directory.
    pub fn leftover_downloads(&self) -> Vec<String> {
        std::fs::read_dir(self.dir.path().join("downloads"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Entries of the state directory other than the state file itself.
    pub fn leftover_state_files(&self) -> Vec<String> {
        std::fs::read_dir(self.dir.path().join("state"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name != "hplip.state")
            .collect()
    }
}
