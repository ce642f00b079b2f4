use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::PullConfig;
use crate::error::PullError;
use crate::fs::build_archive;
use crate::http::RegistryHttp;
use crate::image::{config_file_name, ImageConfig};
use crate::layer::{layer_metadata, ChainLink, LAYER_TAR, LAYER_VERSION};
use crate::manifest::{self, ImageManifest};
use crate::reference::ImageReference;
use crate::registry::Registry;

const REPOSITORIES: &str = "repositories";
const MANIFEST_JSON: &str = "manifest.json";
const VERSION: &str = "VERSION";
const LAYER_JSON: &str = "json";

/// Entry of the top-level `manifest.json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RootManifest {
    config: String,
    repo_tags: Vec<String>,
    layers: Vec<String>,
}

/// What ended up on disk.
#[derive(Debug)]
pub struct LegacyLayout {
    pub root: PathBuf,
    pub config_file: String,
    pub layers: Vec<ChainLink>,
}

impl LegacyLayout {
    /// Id of the top layer, the one `repositories` points at.
    pub fn top_id(&self) -> Option<&str> {
        self.layers.last().map(|l| l.id.as_str())
    }
}

/// Writes a pulled image in the `docker save` layout under `root`.
pub struct LegacyImageBuilder<'a, H> {
    registry: &'a Registry<H>,
    image: &'a ImageReference,
    root: PathBuf,
    cancel: CancellationToken,
}

impl<'a, H: RegistryHttp> LegacyImageBuilder<'a, H> {
    pub fn new(
        registry: &'a Registry<H>,
        image: &'a ImageReference,
        root: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            image,
            root,
            cancel,
        }
    }

    pub async fn build(&self, manifest: &ImageManifest) -> Result<LegacyLayout> {
        if manifest.layers.is_empty() {
            return Err(PullError::Manifest {
                reference: self.image.to_string(),
                message: "manifest lists no layers".into(),
            }
            .into());
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("create directory {}", self.root.display()))?;

        let config = self.write_config(manifest).await?;

        let total = manifest.layers.len();
        println!("load layers length: {}, start download...", total);

        let mut layers: Vec<ChainLink> = Vec::with_capacity(total);
        for (index, layer) in manifest.layers.iter().enumerate() {
            let link = ChainLink::next(layers.last(), &layer.digest);
            let top = (index == total - 1).then_some(&config);

            println!("downloading {}/{}: {}", index + 1, total, layer.digest);
            self.write_layer(&link, &layer.digest, &layer.media_type, top)
                .await?;

            layers.push(link);
        }

        let layout = LegacyLayout {
            root: self.root.clone(),
            config_file: config_file_name(&manifest.config.digest),
            layers,
        };

        self.write_repositories(&layout).await?;
        self.write_manifest(&layout).await?;

        Ok(layout)
    }

    async fn write_config(&self, manifest: &ImageManifest) -> Result<ImageConfig> {
        let descriptor = &manifest.config;
        let raw = self.fetch(&descriptor.digest, &descriptor.media_type).await?;
        let config = ImageConfig::from_slice(&raw)
            .with_context(|| format!("parse config blob {}", descriptor.digest))?;

        let path = self.root.join(config_file_name(&descriptor.digest));
        tokio::fs::write(&path, config.raw())
            .await
            .with_context(|| format!("write {}", path.display()))?;

        Ok(config)
    }

    async fn write_layer(
        &self,
        link: &ChainLink,
        digest: &str,
        media_type: &str,
        top: Option<&ImageConfig>,
    ) -> Result<()> {
        let dir = self.root.join(&link.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create directory {}", dir.display()))?;

        let version = dir.join(VERSION);
        tokio::fs::write(&version, LAYER_VERSION)
            .await
            .with_context(|| format!("write {}", version.display()))?;

        let blob = self.fetch(digest, media_type).await?;
        tokio::fs::write(dir.join(LAYER_TAR), &blob)
            .await
            .with_context(|| format!("write layer {}", link.id))?;

        let metadata = serde_json::to_vec(&layer_metadata(link, top))?;
        let json = dir.join(LAYER_JSON);
        tokio::fs::write(&json, metadata)
            .await
            .with_context(|| format!("write {}", json.display()))?;

        tracing::debug!(id = %link.id, %digest, bytes = blob.len(), "layer written");
        Ok(())
    }

    async fn write_repositories(&self, layout: &LegacyLayout) -> Result<()> {
        let tags = BTreeMap::from([(self.image.tag(), layout.top_id().unwrap_or_default())]);
        let repositories = BTreeMap::from([(self.image.name(), tags)]);
        let path = self.root.join(REPOSITORIES);
        tokio::fs::write(&path, serde_json::to_vec(&repositories)?)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    async fn write_manifest(&self, layout: &LegacyLayout) -> Result<()> {
        let manifests = [RootManifest {
            config: layout.config_file.clone(),
            repo_tags: vec![self.image.to_string()],
            layers: layout.layers.iter().map(ChainLink::tar_path).collect(),
        }];
        let path = self.root.join(MANIFEST_JSON);
        tokio::fs::write(&path, serde_json::to_vec(&manifests)?)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    async fn fetch(&self, digest: &str, media_type: &str) -> Result<Vec<u8>> {
        if self.cancel.is_cancelled() {
            return Err(PullError::Cancelled.into());
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(PullError::Cancelled.into()),
            blob = self.registry.fetch_blob(digest, media_type) => {
                blob.with_context(|| format!("fetch blob {}", digest))
            }
        }
    }
}

/// Pulls `config.image` and writes the archive. Returns the archive path.
///
/// Staging happens in a temporary directory that is removed on return,
/// whether or not the pull succeeded.
pub async fn pull<H: RegistryHttp>(
    config: &PullConfig,
    http: H,
    cancel: CancellationToken,
) -> Result<PathBuf> {
    pull_in(config, http, cancel, &std::env::temp_dir()).await
}

/// [`pull`] with the temporary directory created under `tmp_parent`.
pub async fn pull_in<H: RegistryHttp>(
    config: &PullConfig,
    http: H,
    cancel: CancellationToken,
    tmp_parent: &Path,
) -> Result<PathBuf> {
    config.validate()?;

    let staging = tempfile::Builder::new()
        .prefix("image-downer")
        .tempdir_in(tmp_parent)
        .with_context(|| format!("create temporary directory in {}", tmp_parent.display()))?;
    println!("created temporary folder: {}", staging.path().display());

    let result = pull_into(config, http, cancel, staging.path()).await;

    let staging_path = staging.path().to_path_buf();
    if let Err(e) = staging.close() {
        tracing::warn!("Failed to cleanup temporary directory: {}", e);
    } else {
        println!("removed temporary folder: {}", staging_path.display());
    }

    result
}

/// Same as [`pull`] but stages under a caller-owned directory.
pub async fn pull_into<H: RegistryHttp>(
    config: &PullConfig,
    http: H,
    cancel: CancellationToken,
    staging: &Path,
) -> Result<PathBuf> {
    let image = &config.image;
    tracing::info!(image = %image, platform = %config.platform, "pulling image");

    let mut registry = Registry::new(
        http,
        &config.registry,
        &config.repository_prefix,
        image.name(),
    )
    .verify_digests(config.verify_digests);

    tracing::debug!(repository = registry.repository(), registry = %config.registry, "logging in");
    registry.login(image.tag()).await?;
    let manifest = manifest::resolve(&registry, image.tag(), &config.platform).await?;

    let root = staging.join(config.layout_name());
    let layout = LegacyImageBuilder::new(&registry, image, root, cancel)
        .build(&manifest)
        .await?;

    println!("start merge all layers...");
    let output = config.output_path();
    let (source, target) = (layout.root.clone(), output.clone());
    tokio::task::spawn_blocking(move || build_archive(&source, &target)).await??;

    println!("exported images: {}", output.display());
    println!(
        "you can use `docker load -i {}` to load to Docker",
        output.display()
    );

    Ok(output)
}
