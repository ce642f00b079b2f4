use std::fmt;
use std::str::FromStr;

use crate::error::PullError;

pub const DEFAULT_TAG: &str = "latest";

/// A `name[:tag]` image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    name: String,
    tag: String,
}

impl ImageReference {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl FromStr for ImageReference {
    type Err = PullError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        // A colon followed by a '/' belongs to a host:port, not a tag.
        let (name, tag) = match s.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (s, DEFAULT_TAG),
        };

        // Any colon left in the name must be a registry port.
        let stray_colon = name
            .rsplit_once(':')
            .is_some_and(|(_, rest)| !rest.contains('/'));

        if name.is_empty() || tag.is_empty() || stray_colon {
            return Err(PullError::InvalidReference(s.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}
