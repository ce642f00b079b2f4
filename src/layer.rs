use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::image::ImageConfig;

/// `created` stamp written for every layer except the last.
pub const DEFAULT_CREATED: &str = "1970-01-01T08:00:00+08:00";

pub const LAYER_VERSION: &str = "1.0";
pub const LAYER_TAR: &str = "layer.tar";

/// Legacy layer id: `sha256(parent + "-" + blob_digest)`, lowercase hex.
/// The first layer uses an empty parent; the separator is always present.
pub fn compute_chain_id(parent_id: &str, blob_digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent_id.as_bytes());
    hasher.update(b"-");
    hasher.update(blob_digest.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One step of the layer chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub id: String,
    pub parent: Option<String>,
}

impl ChainLink {
    pub fn next(parent: Option<&ChainLink>, blob_digest: &str) -> Self {
        let parent_id = parent.map(|p| p.id.clone());
        Self {
            id: compute_chain_id(parent_id.as_deref().unwrap_or_default(), blob_digest),
            parent: parent_id,
        }
    }

    /// Path of the layer tarball relative to the layout root.
    pub fn tar_path(&self) -> String {
        format!("{}/{}", self.id, LAYER_TAR)
    }
}

/// Static `container_config` attached to every layer's metadata.
pub fn container_config() -> Value {
    json!({
        "Hostname": "",
        "Domainname": "",
        "User": "",
        "AttachStdin": false,
        "AttachStdout": false,
        "AttachStderr": false,
        "Tty": false,
        "OpenStdin": false,
        "StdinOnce": false,
        "Env": null,
        "Cmd": null,
        "Image": "",
        "Volumes": null,
        "WorkingDir": "",
        "Entrypoint": null,
        "OnBuild": null,
        "Labels": null,
    })
}

/// Builds the `json` document of a legacy layer directory.
///
/// The top layer carries the image config (minus `history` and `rootfs`);
/// every other layer only gets a fixed `created` stamp.
pub fn layer_metadata(link: &ChainLink, top_config: Option<&ImageConfig>) -> Map<String, Value> {
    let mut metadata = match top_config {
        Some(config) => config.layer_template(),
        None => {
            let mut map = Map::new();
            map.insert("created".into(), Value::from(DEFAULT_CREATED));
            map
        }
    };

    metadata.insert("container_config".into(), container_config());
    metadata.insert("id".into(), Value::from(link.id.clone()));
    match &link.parent {
        Some(parent) => {
            metadata.insert("parent".into(), Value::from(parent.clone()));
        }
        None => {
            metadata.remove("parent");
        }
    }

    metadata
}
