//! Error type for configuration and transport plumbing
//!
//! The public link API is fire-and-forget; these errors only surface from
//! config loading and endpoint derivation. Everything else is logged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid API base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("API base URL has no host")]
    MissingHost,

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
