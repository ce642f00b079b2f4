use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::error::PullError;
use crate::fs::ensure_output_available;
use crate::reference::ImageReference;
use crate::registry::{DEFAULT_REGISTRY, DEFAULT_REPOSITORY_PREFIX};

pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// Everything a single pull needs.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PullConfig {
    pub image: ImageReference,
    #[builder(default = DEFAULT_PLATFORM.to_string(), setter(into))]
    pub platform: String,
    #[builder(default = DEFAULT_REGISTRY.to_string(), setter(into))]
    pub registry: String,
    #[builder(default = DEFAULT_REPOSITORY_PREFIX.to_string(), setter(into))]
    pub repository_prefix: String,
    #[builder(default)]
    pub proxy: Option<String>,
    #[builder(default)]
    pub output: Option<PathBuf>,
    #[builder(default = true)]
    pub verify_digests: bool,
}

impl PullConfig {
    /// `<name>-<tag>-<platform>` with `/` turned into `-`.
    pub fn layout_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.image.name(),
            self.image.tag(),
            self.platform
        )
        .replace('/', "-")
    }

    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.tar.gz", self.layout_name())))
    }

    /// Configured proxy, else `https_proxy` / `HTTPS_PROXY` from the env.
    pub fn effective_proxy(&self) -> Option<String> {
        self.proxy.clone().filter(|p| !p.trim().is_empty()).or_else(|| {
            ["https_proxy", "HTTPS_PROXY"]
                .iter()
                .filter_map(|key| std::env::var(key).ok())
                .find(|v| !v.trim().is_empty())
        })
    }

    /// Checks done before any network traffic.
    pub fn validate(&self) -> Result<(), PullError> {
        if let Some(proxy) = self.effective_proxy() {
            Url::parse(&proxy).map_err(|_| PullError::InvalidProxy(proxy.clone()))?;
        }
        if let Some(output) = &self.output {
            ensure_output_available(output)?;
        }
        Ok(())
    }
}

/// Optional TOML defaults, overridden by command-line flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub registry: Option<String>,
    pub repository_prefix: Option<String>,
    pub platform: Option<String>,
    pub proxy: Option<String>,
    pub verify_digests: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parse TOML at {}", path.display()))
    }
}
