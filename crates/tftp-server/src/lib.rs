//! TFTP Server Library
//!
//! Service wiring for the `tftp-server` executable: turns a [`ServiceConfig`]
//! into a file provider and a running [`TftpServer`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

// Re-export the protocol crate for easier access
pub use tftp;
use tftp::{FileProvider, RootDirectory, SingleFile, TftpServer, TftpServerConfig};

/// Where served bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    /// One file, loaded into memory, served for every requested name
    Payload(PathBuf),
    /// Files looked up by requested name below a directory
    Root(PathBuf),
}

/// Complete service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub server: TftpServerConfig,
    pub source: SourceConfig,
}

impl ServiceConfig {
    /// Build the file provider for the configured source
    pub async fn provider(&self) -> Result<Arc<dyn FileProvider>> {
        match &self.source {
            SourceConfig::Payload(path) => {
                let payload = SingleFile::load(path)
                    .await
                    .with_context(|| format!("Failed to read payload {}", path.display()))?;
                tracing::info!("Serving {} ({} bytes) for every request", path.display(), payload.len());
                Ok(Arc::new(payload))
            }
            SourceConfig::Root(root) => {
                if !root.is_dir() {
                    anyhow::bail!("Root directory {} does not exist", root.display());
                }
                tracing::info!("Serving files from {}", root.display());
                Ok(Arc::new(RootDirectory::new(root.clone())))
            }
        }
    }
}

/// Run the TFTP service until `shutdown` is cancelled
pub async fn run_service(config: ServiceConfig, shutdown: CancellationToken) -> Result<()> {
    let provider = config.provider().await?;
    let mut server = TftpServer::new(config.server, provider);
    server.bind().await?;
    server.serve(shutdown).await
}
