use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, WWW_AUTHENTICATE};
use reqwest::StatusCode;

use crate::error::PullError;

/// Optional headers a registry request may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    pub accept: Option<String>,
    pub bearer: Option<String>,
}

impl RequestHeaders {
    pub fn accept(mut self, media_type: impl Into<String>) -> Self {
        self.accept = Some(media_type.into());
        self
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token.map(str::to_string);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Raw `WWW-Authenticate` value, if the registry sent one.
    pub fn www_authenticate(&self) -> Option<&str> {
        self.headers
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(PullError::Status {
                url: url.to_string(),
                status: self.status,
            }
            .into())
        }
    }
}

/// The single GET primitive the puller needs. Non-2xx answers are returned
/// as responses, not errors, so callers can inspect challenges.
#[async_trait]
pub trait RegistryHttp: Send + Sync {
    async fn get(&self, url: &str, headers: &RequestHeaders) -> Result<HttpResponse>;
}

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(proxy: Option<&str>) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().user_agent(concat!("image-downer/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|_| PullError::InvalidProxy(proxy.to_string()))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl RegistryHttp for ReqwestHttp {
    async fn get(&self, url: &str, headers: &RequestHeaders) -> Result<HttpResponse> {
        tracing::debug!(%url, accept = ?headers.accept, "GET");

        let mut request = self.client.get(url);
        if let Some(accept) = &headers.accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(token) = &headers.bearer {
            request = request.bearer_auth(token);
        }

        let transport = |e: reqwest::Error| PullError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport)?.to_vec();

        tracing::debug!(%url, %status, bytes = body.len(), "response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory registry used by the resolver and assembler tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use reqwest::header::HeaderValue;

    use super::*;

    #[derive(Default)]
    pub struct FakeRegistry {
        routes: HashMap<String, HttpResponse>,
        challenges: HashMap<String, String>,
        requests: Mutex<Vec<(String, RequestHeaders)>>,
    }

    impl FakeRegistry {
        pub fn route(&mut self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> &mut Self {
            self.routes.insert(
                url.to_string(),
                HttpResponse {
                    status: StatusCode::from_u16(status).unwrap(),
                    headers: HeaderMap::new(),
                    body: body.into(),
                },
            );
            self
        }

        /// Requests to `url` without a bearer token get a `401` carrying
        /// `challenge`; authenticated ones fall through to the routes.
        pub fn challenge(&mut self, url: &str, challenge: &str) -> &mut Self {
            self.challenges.insert(url.to_string(), challenge.to_string());
            self
        }

        pub fn requests(&self) -> Vec<(String, RequestHeaders)> {
            self.requests.lock().unwrap().clone()
        }

        pub fn requested(&self, url: &str) -> bool {
            self.requests().iter().any(|(u, _)| u == url)
        }
    }

    #[async_trait]
    impl RegistryHttp for FakeRegistry {
        async fn get(&self, url: &str, headers: &RequestHeaders) -> Result<HttpResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), headers.clone()));

            if let (Some(challenge), None) = (self.challenges.get(url), &headers.bearer) {
                let mut response_headers = HeaderMap::new();
                response_headers.insert(WWW_AUTHENTICATE, HeaderValue::from_str(challenge).unwrap());
                return Ok(HttpResponse {
                    status: StatusCode::UNAUTHORIZED,
                    headers: response_headers,
                    body: Vec::new(),
                });
            }

            match self.routes.get(url) {
                Some(response) => Ok(response.clone()),
                None => Ok(HttpResponse {
                    status: StatusCode::NOT_FOUND,
                    headers: HeaderMap::new(),
                    body: Vec::new(),
                }),
            }
        }
    }
}
