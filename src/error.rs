use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Failures a pull can end with. Wrapped in `anyhow::Error` on the way up;
/// callers that care about the kind use `downcast_ref::<PullError>()`.
#[derive(Debug, Error)]
pub enum PullError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: StatusCode },

    #[error("invalid authentication challenge: {0}")]
    Challenge(String),

    #[error("token response from {0} carries no token")]
    Token(String),

    #[error("malformed manifest for {reference}: {message}")]
    Manifest { reference: String, message: String },

    #[error("platform {requested} not found, available: [{}]", available.join(", "))]
    PlatformNotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("unsupported digest: {0}")]
    UnsupportedDigest(String),

    #[error("output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("invalid proxy url: {0}")]
    InvalidProxy(String),

    #[error("invalid image reference: {0:?}")]
    InvalidReference(String),

    #[error("pull cancelled")]
    Cancelled,
}
