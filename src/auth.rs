//! Bearer-token handshake with a registry.
//!
//! An anonymous manifest request answers `401` with a `WWW-Authenticate:
//! Bearer realm=..,service=..,scope=..` challenge. The realm is then asked
//! for a token, which is reused for every later request of the run.

use anyhow::{Context, Result};
use http_auth::parser::ChallengeParser;
use reqwest::Url;
use serde::Deserialize;

use crate::error::PullError;
use crate::http::{RegistryHttp, RequestHeaders};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parses the first `Bearer` challenge of a `WWW-Authenticate` value.
    /// Parameter order and name case do not matter; `realm` is required.
    pub fn parse(header: &str) -> Result<Self, PullError> {
        for challenge in ChallengeParser::new(header) {
            let challenge =
                challenge.map_err(|e| PullError::Challenge(format!("{:?}: {}", e, header)))?;
            if !challenge.scheme.eq_ignore_ascii_case("Bearer") {
                continue;
            }

            let mut realm = None;
            let mut service = None;
            let mut scope = None;
            for (k, v) in &challenge.params {
                if k.eq_ignore_ascii_case("realm") {
                    realm = Some(v.to_unescaped());
                } else if k.eq_ignore_ascii_case("service") {
                    service = Some(v.to_unescaped());
                } else if k.eq_ignore_ascii_case("scope") {
                    scope = Some(v.to_unescaped());
                }
            }

            let realm = realm
                .filter(|r| !r.is_empty())
                .ok_or_else(|| PullError::Challenge(format!("missing realm in {:?}", header)))?;

            return Ok(Self {
                realm,
                service,
                scope,
            });
        }

        Err(PullError::Challenge(format!(
            "no Bearer challenge in {:?}",
            header
        )))
    }

    /// `<realm>?service=<service>&scope=<scope>`, skipping absent parameters.
    pub fn token_url(&self) -> Result<Url, PullError> {
        let mut url = Url::parse(&self.realm)
            .map_err(|e| PullError::Challenge(format!("realm {:?}: {}", self.realm, e)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &self.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &self.scope {
                query.append_pair("scope", scope);
            }
        }
        Ok(url)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Exchanges a challenge for a token with one unauthenticated GET.
pub async fn fetch_token<H: RegistryHttp + ?Sized>(
    http: &H,
    challenge: &AuthChallenge,
) -> Result<BearerToken> {
    let url = challenge.token_url()?;
    tracing::debug!(realm = %challenge.realm, service = ?challenge.service, scope = ?challenge.scope, "requesting token");

    let response = http
        .get(url.as_str(), &RequestHeaders::default())
        .await?
        .error_for_status(url.as_str())?;

    let body: TokenResponse = serde_json::from_slice(&response.body)
        .with_context(|| format!("decode token response from {}", challenge.realm))?;

    body.token
        .or(body.access_token)
        .filter(|t| !t.is_empty())
        .map(BearerToken)
        .ok_or_else(|| PullError::Token(challenge.realm.clone()).into())
}

/// Probes `url` anonymously. A success means the registry needs no token;
/// a `401` must carry a Bearer challenge, which is resolved to a token.
pub async fn authenticate<H: RegistryHttp + ?Sized>(
    http: &H,
    url: &str,
) -> Result<Option<BearerToken>> {
    let response = http.get(url, &RequestHeaders::default()).await?;

    if response.status.is_success() {
        tracing::debug!(%url, "registry allows anonymous access");
        return Ok(None);
    }

    match response.www_authenticate().map(str::to_string) {
        Some(header) => {
            let challenge = AuthChallenge::parse(&header)?;
            tracing::debug!(?challenge, "auth challenge");
            Ok(Some(fetch_token(http, &challenge).await?))
        }
        None => {
            response.error_for_status(url)?;
            Err(PullError::Challenge(format!("no WWW-Authenticate header from {}", url)).into())
        }
    }
}
