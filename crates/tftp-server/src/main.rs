//! TFTP Server - Main executable
//!
//! A read-only TFTP server serving a single payload, or a directory tree, over UDP.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use argh::FromArgs;
use tftp::{TftpServerConfig, TransferConfig};
use tftp_server::{ServiceConfig, SourceConfig, run_service};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "127.0.0.1:6060";

#[derive(FromArgs, Debug)]
#[argh(
    description = "Read-only TFTP server",
    example = "Serve one file to every client:\n  {command_name} --payload ./payload",
    example = "Serve a directory by file name:\n  {command_name} --address 0.0.0.0:69 --root /tftpboot"
)]
struct CliConfig {
    #[argh(
        option,
        short = 'a',
        description = "listen address",
        default = "DEFAULT_BIND.to_string()"
    )]
    address: String,

    #[argh(option, short = 'p', description = "file to serve to clients")]
    payload: Option<PathBuf>,

    #[argh(option, short = 'r', description = "directory to serve files from by name")]
    root: Option<PathBuf>,

    #[argh(option, description = "retransmission timeout in milliseconds", default = "3000")]
    timeout_ms: u64,

    #[argh(option, description = "transmissions per block before giving up", default = "8")]
    retries: usize,

    #[argh(option, description = "maximum concurrent transfers", default = "128")]
    max_sessions: usize,
}

impl CliConfig {
    fn into_service_config(self) -> Result<ServiceConfig> {
        let source = match (self.payload, self.root) {
            (Some(payload), None) => SourceConfig::Payload(payload),
            (None, Some(root)) => SourceConfig::Root(root),
            (Some(_), Some(_)) => bail!("--payload and --root are mutually exclusive"),
            (None, None) => bail!("one of --payload or --root is required"),
        };

        if self.retries == 0 {
            bail!("--retries must be at least 1");
        }
        if self.timeout_ms == 0 {
            bail!("--timeout-ms must be at least 1");
        }
        if self.max_sessions == 0 {
            bail!("--max-sessions must be at least 1");
        }

        let server = TftpServerConfig {
            bind_address: self.address,
            transfer_config: TransferConfig {
                timeout: Duration::from_millis(self.timeout_ms),
                max_retries: self.retries,
                ..Default::default()
            },
            max_sessions: self.max_sessions,
        };

        Ok(ServiceConfig { server, source })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli_config: CliConfig = argh::from_env();
    let service_config = cli_config.into_service_config()?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    run_service(service_config, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliConfig {
        CliConfig::from_args(&["tftp-server"], args).unwrap()
    }

    #[test]
    fn test_cli_defaults() {
        let config = cli(&["--payload", "./payload"]).into_service_config().unwrap();
        assert_eq!(config.server.bind_address, DEFAULT_BIND);
        assert_eq!(config.source, SourceConfig::Payload(PathBuf::from("./payload")));
        assert_eq!(config.server.transfer_config.timeout, Duration::from_secs(3));
        assert_eq!(config.server.transfer_config.max_retries, 8);
        assert_eq!(config.server.max_sessions, 128);
    }

    #[test]
    fn test_cli_root_and_tuning() {
        let config = cli(&["-a", "0.0.0.0:69", "-r", "/tftpboot", "--timeout-ms", "250", "--retries", "3"])
            .into_service_config()
            .unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:69");
        assert_eq!(config.source, SourceConfig::Root(PathBuf::from("/tftpboot")));
        assert_eq!(config.server.transfer_config.timeout, Duration::from_millis(250));
        assert_eq!(config.server.transfer_config.max_retries, 3);
    }

    #[test]
    fn test_cli_requires_exactly_one_source() {
        assert!(cli(&[]).into_service_config().is_err());
        assert!(cli(&["-p", "a", "-r", "b"]).into_service_config().is_err());
        assert!(cli(&["-p", "a", "--retries", "0"]).into_service_config().is_err());
    }

    #[test]
    fn test_cli_rejects_zero_limits() {
        assert!(cli(&["-p", "a", "--timeout-ms", "0"]).into_service_config().is_err());
        assert!(cli(&["-p", "a", "--max-sessions", "0"]).into_service_config().is_err());
        assert!(cli(&["-p", "a", "--timeout-ms", "1", "--max-sessions", "1"]).into_service_config().is_ok());
    }
}
