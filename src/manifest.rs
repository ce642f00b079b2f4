use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;

use crate::error::PullError;
use crate::http::RegistryHttp;
use crate::registry::Registry;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// Index entries for attestations report this os/architecture.
const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
}

impl Platform {
    fn is_unknown(&self) -> bool {
        self.os == UNKNOWN || self.architecture == UNKNOWN
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestIndex {
    pub manifests: Vec<Descriptor>,
}

/// A single-platform manifest: config plus layers, base layer first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageManifest {
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// Index entries keyed by `os/architecture` (and `os/architecture/variant`
/// when the entry has a variant). Built per resolution.
#[derive(Debug, Clone, Default)]
pub struct PlatformManifests {
    entries: BTreeMap<String, Descriptor>,
}

impl PlatformManifests {
    pub fn from_index(index: &ManifestIndex) -> Self {
        let mut entries = BTreeMap::new();

        for descriptor in &index.manifests {
            let Some(platform) = &descriptor.platform else {
                continue;
            };
            if platform.is_unknown() {
                continue;
            }

            let key = format!("{}/{}", platform.os, platform.architecture);
            if let Some(variant) = &platform.variant {
                entries.insert(format!("{}/{}", key, variant), descriptor.clone());
            }
            // The first entry for an os/arch wins over later variants.
            entries.entry(key).or_insert_with(|| descriptor.clone());
        }

        Self { entries }
    }

    pub fn platforms(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn select(&self, platform: &str) -> Result<&Descriptor, PullError> {
        self.entries
            .get(platform)
            .ok_or_else(|| PullError::PlatformNotFound {
                requested: platform.to_string(),
                available: self.platforms(),
            })
    }
}

/// What a tag resolves to before platform selection.
#[derive(Debug, Clone)]
pub enum TagManifest {
    Index(PlatformManifests),
    Image(ImageManifest),
}

impl TagManifest {
    pub fn parse(reference: &str, body: &[u8]) -> Result<Self, PullError> {
        let malformed = |message: String| PullError::Manifest {
            reference: reference.to_string(),
            message,
        };

        let value: Value = serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;

        if value.get("manifests").is_some() {
            let index: ManifestIndex =
                serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
            return Ok(Self::Index(PlatformManifests::from_index(&index)));
        }

        if value.get("layers").is_some() {
            let manifest: ImageManifest =
                serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
            return Ok(Self::Image(manifest));
        }

        Err(malformed("neither `manifests` nor `layers` present".into()))
    }
}

pub fn parse_image_manifest(reference: &str, body: &[u8]) -> Result<ImageManifest, PullError> {
    serde_json::from_slice(body).map_err(|e| PullError::Manifest {
        reference: reference.to_string(),
        message: e.to_string(),
    })
}

/// Resolves `tag` to the image manifest for `platform`.
///
/// Fetches the tag advertising both list and single manifest types. For an
/// index, the matching entry's digest is fetched as a single manifest.
pub async fn resolve<H: RegistryHttp>(
    registry: &Registry<H>,
    tag: &str,
    platform: &str,
) -> Result<ImageManifest> {
    let accept = [
        DOCKER_MANIFEST_V2,
        DOCKER_MANIFEST_LIST_V2,
        OCI_MANIFEST_V1,
        OCI_INDEX_V1,
    ]
    .join(",");

    let body = registry.fetch_manifest(tag, &accept).await?;

    match TagManifest::parse(tag, &body)? {
        TagManifest::Image(manifest) => {
            tracing::debug!(%tag, "tag points at a single manifest");
            Ok(manifest)
        }
        TagManifest::Index(platforms) => {
            tracing::debug!(%tag, available = ?platforms.platforms(), "manifest index");
            let entry = platforms.select(platform)?;
            let accept = if entry.media_type.is_empty() {
                DOCKER_MANIFEST_V2
            } else {
                entry.media_type.as_str()
            };

            tracing::info!(%platform, digest = %entry.digest, "resolved platform manifest");
            let body = registry.fetch_manifest(&entry.digest, accept).await?;
            Ok(parse_image_manifest(&entry.digest, &body)?)
        }
    }
}
