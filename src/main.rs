mod auth;
mod builder;
mod config;
mod error;
mod fs;
mod http;
mod image;
mod layer;
mod manifest;
mod reference;
mod registry;

use crate::config::{FileConfig, PullConfig, DEFAULT_PLATFORM};
use crate::http::ReqwestHttp;
use crate::reference::ImageReference;
use crate::registry::{DEFAULT_REGISTRY, DEFAULT_REPOSITORY_PREFIX};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Download an image from a registry as a `docker load`-able tarball.
#[derive(Debug, Parser)]
#[command(name = "image-downer", version)]
struct Cli {
    /// Image to pull, e.g. nginx:alpine
    #[arg(short, long)]
    image: String,

    /// Target platform [default: linux/amd64]
    #[arg(short, long)]
    arch: Option<String>,

    /// HTTP(S) proxy, e.g. http://127.0.0.1:7890
    #[arg(short, long)]
    proxy: Option<String>,

    /// Output archive [default: <name>-<tag>-<arch>.tar.gz]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Registry base URL
    #[arg(long)]
    registry: Option<String>,

    /// TOML file with defaults for registry, platform and proxy
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip sha256 verification of downloaded blobs
    #[arg(long)]
    no_verify: bool,

    /// Debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn into_config(self, file: FileConfig) -> Result<PullConfig> {
        let image: ImageReference = self.image.parse()?;

        Ok(PullConfig::builder()
            .image(image)
            .platform(
                self.arch
                    .or(file.platform)
                    .unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
            )
            .registry(
                self.registry
                    .or(file.registry)
                    .unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
            )
            .repository_prefix(
                file.repository_prefix
                    .unwrap_or_else(|| DEFAULT_REPOSITORY_PREFIX.to_string()),
            )
            .proxy(self.proxy.or(file.proxy))
            .output(self.output)
            .verify_digests(!self.no_verify && file.verify_digests.unwrap_or(true))
            .build())
    }
}

fn init_tracing(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = cli.into_config(file)?;
    config.validate()?;

    let http = ReqwestHttp::new(config.effective_proxy().as_deref())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current request");
            on_signal.cancel();
        }
    });

    match builder::pull(&config, http, cancel).await {
        Ok(_) => {
            tracing::info!("Successfully pulled {}", config.image);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Failed to pull image: {:#}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file() {
        let cli = Cli::try_parse_from([
            "image-downer",
            "--image",
            "nginx:alpine",
            "--arch",
            "linux/arm64",
        ])
        .unwrap();
        let file = FileConfig {
            platform: Some("linux/s390x".into()),
            registry: Some("https://mirror.example".into()),
            verify_digests: Some(false),
            ..FileConfig::default()
        };

        let config = cli.into_config(file).unwrap();
        assert_eq!(config.platform, "linux/arm64");
        assert_eq!(config.registry, "https://mirror.example");
        assert_eq!(config.image.name(), "nginx");
        assert!(!config.verify_digests);
    }

    #[test]
    fn defaults_without_file() {
        let cli = Cli::try_parse_from(["image-downer", "-i", "redis"]).unwrap();
        let config = cli.into_config(FileConfig::default()).unwrap();

        assert_eq!(config.platform, DEFAULT_PLATFORM);
        assert_eq!(config.registry, DEFAULT_REGISTRY);
        assert_eq!(config.image.tag(), "latest");
        assert!(config.verify_digests);
        assert!(config.output.is_none());
    }

    #[test]
    fn image_is_required() {
        assert!(Cli::try_parse_from(["image-downer"]).is_err());
    }
}
