//! Link configuration
//!
//! Loaded from TOML (every field optional) and turned into a WebSocket
//! endpoint by swapping the REST base URL's scheme and port.

use crate::backoff::BackoffPolicy;
use crate::error::{LinkError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default REST API base URL
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:3000";
/// Port the realtime socket listens on, next to the REST API
pub const DEFAULT_WS_PORT: u16 = 3001;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// REST API base URL the socket endpoint is derived from
    pub api_base_url: String,
    /// Fixed alternate port for the socket endpoint
    pub ws_port: u16,
    /// Path of the socket endpoint
    pub ws_path: String,
    /// WebSocket ping interval in seconds, 0 disables keepalive
    pub keepalive_secs: u64,
    /// How long a ping may go unanswered before the connection counts as dead
    pub pong_timeout_ms: u64,
    /// Upper bound on TCP connect plus WebSocket upgrade
    pub connect_timeout_ms: u64,
    /// How long an intentional close waits for the peer's close frame
    pub close_timeout_ms: u64,
    pub backoff: BackoffPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_port: DEFAULT_WS_PORT,
            ws_path: "/".to_string(),
            keepalive_secs: 30,
            pong_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            close_timeout_ms: 5_000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl LinkConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn ws_endpoint(&self) -> Result<String> {
        ws_endpoint(&self.api_base_url, self.ws_port, &self.ws_path)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Derive the WebSocket endpoint from the REST API base URL.
///
/// `http` maps to `ws` and `https` to `wss`; the port is replaced with
/// `port` and the REST path with `path`. Credentials, query and fragment of
/// the base URL are not carried over.
pub fn ws_endpoint(api_base_url: &str, port: u16, path: &str) -> Result<String> {
    let base = Url::parse(api_base_url)?;
    let scheme = match base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(LinkError::UnsupportedScheme(other.to_string())),
    };
    let host = base.host_str().ok_or(LinkError::MissingHost)?;

    if path.starts_with('/') {
        Ok(format!("{scheme}://{host}:{port}{path}"))
    } else {
        Ok(format!("{scheme}://{host}:{port}/{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_becomes_ws() {
        let url = ws_endpoint("http://localhost:3000", 3001, "/").unwrap();
        assert_eq!(url, "ws://localhost:3001/");
    }

    #[test]
    fn test_https_becomes_wss_and_drops_rest_path() {
        let url = ws_endpoint("https://api.example.com/api/v1/", 8443, "/ws").unwrap();
        assert_eq!(url, "wss://api.example.com:8443/ws");
    }

    #[test]
    fn test_default_port_replaced() {
        // No explicit port in the base URL
        let url = ws_endpoint("https://learn.example.org", 3001, "/").unwrap();
        assert_eq!(url, "wss://learn.example.org:3001/");
    }

    #[test]
    fn test_relative_path_gets_leading_slash() {
        let url = ws_endpoint("http://10.0.0.5:80", 9000, "live").unwrap();
        assert_eq!(url, "ws://10.0.0.5:9000/live");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let config = LinkConfig::new("http://localhost:3000/api");
        assert_eq!(config.ws_endpoint().unwrap(), config.ws_endpoint().unwrap());
    }

    #[test]
    fn test_unsupported_scheme_rejected() {
        let err = ws_endpoint("ftp://files.example.com", 3001, "/").unwrap_err();
        assert!(matches!(err, LinkError::UnsupportedScheme(s) if s == "ftp"));
    }

    #[test]
    fn test_garbage_url_rejected() {
        let err = ws_endpoint("not a url", 3001, "/").unwrap_err();
        assert!(matches!(err, LinkError::InvalidUrl(_)));
    }

    #[test]
    fn test_from_toml() {
        let config = LinkConfig::from_toml_str(
            r#"
            api_base_url = "https://lms.example.com"
            ws_port = 4001
            keepalive_secs = 0
            connect_timeout_ms = 2500

            [backoff]
            base_ms = 500
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.ws_endpoint().unwrap(), "wss://lms.example.com:4001/");
        assert_eq!(config.keepalive(), None);
        assert_eq!(config.close_timeout(), Duration::from_secs(5));
        assert_eq!(config.connect_timeout(), Duration::from_millis(2500));
        assert_eq!(config.pong_timeout(), Duration::from_secs(10));
        assert_eq!(config.backoff, BackoffPolicy::new(500, 30_000, 3));
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(LinkConfig::from_toml_str("").unwrap(), LinkConfig::default());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = LinkConfig::from_toml_str("ws_port = \"nope\"").unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }
}
