//! HTTP transport for the plugin index, artifact and signature.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::PluginError;

/// Downloads a URL into a local file.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Download `url` into `dest`, replacing its contents.
    ///
    /// Returns the number of bytes written. Non-2xx responses are errors.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, PluginError>;
}

/// [`HttpTransport`] backed by reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with the configured timeouts, redirect bound and
    /// user agent.
    pub fn new(config: &NetworkConfig) -> Result<Self, PluginError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| PluginError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, PluginError> {
        debug!(url, dest = %dest.display(), "Downloading");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PluginError::Network {
                url: url.to_string(),
                reason: format!("HTTP status {}", status),
            });
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| PluginError::fs(dest, e))?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| PluginError::fs(dest, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| PluginError::fs(dest, e))?;

        debug!(url, bytes = written, "Download complete");
        Ok(written)
    }
}
