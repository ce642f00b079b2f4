use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Keys dropped from the config before it becomes top-layer metadata.
const STRIPPED_KEYS: [&str; 2] = ["history", "rootfs"];

/// The image configuration blob, kept both raw (written verbatim to the
/// layout) and parsed (used as the top layer's metadata template).
#[derive(Debug, Clone)]
pub struct ImageConfig {
    raw: Vec<u8>,
    fields: Map<String, Value>,
}

impl ImageConfig {
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let fields: Map<String, Value> =
            serde_json::from_slice(raw).context("image config is not a JSON object")?;
        Ok(Self {
            raw: raw.to_vec(),
            fields,
        })
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Copy of the config without `history` and `rootfs`.
    pub fn layer_template(&self) -> Map<String, Value> {
        let mut template = self.fields.clone();
        for key in STRIPPED_KEYS {
            template.remove(key);
        }
        template
    }
}

/// File name of the config inside the layout: the digest without its
/// algorithm prefix, plus `.json`.
pub fn config_file_name(digest: &str) -> String {
    let hex = digest.split_once(':').map_or(digest, |(_, hex)| hex);
    format!("{}.json", hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_leaves_original_untouched() {
        let config =
            ImageConfig::from_slice(br#"{"os":"linux","history":[],"rootfs":{}}"#).unwrap();
        let template = config.layer_template();

        assert_eq!(template.len(), 1);
        assert!(config.fields.contains_key("history"));
        assert!(config.fields.contains_key("rootfs"));
    }

    #[test]
    fn rejects_non_object_config() {
        assert!(ImageConfig::from_slice(b"[1,2,3]").is_err());
        assert!(ImageConfig::from_slice(b"not json").is_err());
    }

    #[test]
    fn config_file_name_strips_algorithm() {
        assert_eq!(config_file_name("sha256:abc123"), "abc123.json");
        assert_eq!(config_file_name("abc123"), "abc123.json");
    }
}
