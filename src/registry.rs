use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::auth::{self, BearerToken};
use crate::error::PullError;
use crate::http::{RegistryHttp, RequestHeaders};

pub const DEFAULT_REGISTRY: &str = "https://registry-1.docker.io";
pub const DEFAULT_REPOSITORY_PREFIX: &str = "library";

/// A repository on a registry, plus the token obtained for it.
pub struct Registry<H> {
    http: H,
    base_url: String,
    repository: String,
    token: Option<BearerToken>,
    verify_digests: bool,
}

impl<H: RegistryHttp> Registry<H> {
    pub fn new(http: H, base_url: &str, prefix: &str, name: &str) -> Self {
        let repository = if prefix.is_empty() || name.contains('/') {
            name.to_string()
        } else {
            format!("{}/{}", prefix.trim_matches('/'), name)
        };

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            repository,
            token: None,
            verify_digests: true,
        }
    }

    pub fn verify_digests(mut self, verify: bool) -> Self {
        self.verify_digests = verify;
        self
    }

    #[cfg(test)]
    pub fn http(&self) -> &H {
        &self.http
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn manifest_url(&self, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.base_url, self.repository, reference
        )
    }

    pub fn blob_url(&self, digest: &str) -> String {
        format!("{}/v2/{}/blobs/{}", self.base_url, self.repository, digest)
    }

    /// Runs the challenge/token handshake against the manifest endpoint
    /// of `tag`. The token is kept for the rest of the run.
    pub async fn login(&mut self, tag: &str) -> Result<()> {
        let url = self.manifest_url(tag);
        self.token = auth::authenticate(&self.http, &url)
            .await
            .with_context(|| format!("authenticate against {}", url))?;
        Ok(())
    }

    pub async fn fetch_manifest(&self, reference: &str, accept: &str) -> Result<Vec<u8>> {
        let url = self.manifest_url(reference);
        self.get(&url, accept).await
    }

    /// Downloads a blob verbatim. With verification on, the body must hash
    /// to `digest`.
    pub async fn fetch_blob(&self, digest: &str, media_type: &str) -> Result<Vec<u8>> {
        let url = self.blob_url(digest);
        let body = self.get(&url, media_type).await?;

        if self.verify_digests {
            verify_digest(digest, &body)?;
        }

        Ok(body)
    }

    async fn get(&self, url: &str, accept: &str) -> Result<Vec<u8>> {
        let headers = RequestHeaders::default()
            .accept(accept)
            .bearer(self.token.as_ref().map(BearerToken::as_str));

        let response = self.http.get(url, &headers).await?;
        Ok(response.error_for_status(url)?.body)
    }
}

/// Checks `body` against a `sha256:<hex>` digest.
pub fn verify_digest(digest: &str, body: &[u8]) -> Result<(), PullError> {
    let expected = match digest.split_once(':') {
        Some(("sha256", hex)) if hex.len() == 64 => hex,
        _ => return Err(PullError::UnsupportedDigest(digest.to_string())),
    };

    let actual = format!("{:x}", Sha256::digest(body));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(PullError::DigestMismatch {
            expected: digest.to_string(),
            actual: format!("sha256:{}", actual),
        });
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn sha256_digest(body: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(body))
}
