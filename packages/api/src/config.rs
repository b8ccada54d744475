//! Backend connection settings.

use std::time::Duration;

use serde::Deserialize;

use crate::ApiError;

/// Where the hosted backend lives and how to talk to it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BaasConfig {
    /// Project base URL, e.g. `https://abc.example.co`.
    pub url: String,
    /// Public (anon) API key sent with every request.
    pub anon_key: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl BaasConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URL without a trailing slash. Fails on anything that is not http(s).
    pub fn base_url(&self) -> Result<&str, ApiError> {
        let url = self.url.trim_end_matches('/');
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ApiError::Config(format!("backend url must be http(s): {url:?}")));
        }
        Ok(url)
    }

    /// Websocket endpoint of the realtime service.
    pub fn realtime_url(&self) -> Result<String, ApiError> {
        let base = self.base_url()?;
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            format!("ws://{}", &base["http://".len()..])
        };
        Ok(format!(
            "{ws}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.anon_key
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let config = BaasConfig::new("https://proj.example.co/", "anon");
        assert_eq!(config.base_url().unwrap(), "https://proj.example.co");
        assert_eq!(
            config.realtime_url().unwrap(),
            "wss://proj.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let local = BaasConfig::new("http://localhost:54321", "k");
        assert_eq!(
            local.realtime_url().unwrap(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn test_rejects_non_http() {
        let config = BaasConfig::new("ftp://nope", "k");
        assert!(matches!(config.base_url(), Err(ApiError::Config(_))));
    }
}
