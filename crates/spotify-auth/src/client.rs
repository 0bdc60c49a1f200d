//! Shared OAuth client handle
//!
//! One `OAuthClient` is built at startup and cloned into every request
//! handler and the refresh coordinator. Cloning is cheap: the reqwest
//! connection pool and the configuration are both reference counted.

use std::sync::Arc;
use std::time::Duration;

use common::Secret;

use crate::constants::{API_BASE, AUTHORIZE_ENDPOINT, DEFAULT_SCOPES, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

/// Registered application credentials plus the endpoints to talk to.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    pub scopes: String,
    pub token_endpoint: String,
    pub authorize_endpoint: String,
    pub api_base: String,
}

impl ClientConfig {
    /// Config pointing at Spotify's production endpoints with the default scopes.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            authorize_endpoint: AUTHORIZE_ENDPOINT.to_string(),
            api_base: API_BASE.to_string(),
        }
    }

    pub fn with_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = scopes.into();
        self
    }

    /// Route token and Web API calls to `base` (e.g. a mock server):
    /// `{base}/api/token`, `{base}/authorize`, `{base}/v1`.
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.token_endpoint = format!("{base}/api/token");
        self.authorize_endpoint = format!("{base}/authorize");
        self.api_base = format!("{base}/v1");
        self
    }
}

/// Spotify OAuth + Web API client.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: Arc<ClientConfig>,
}

impl OAuthClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(config: ClientConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;
        Ok(Self::with_http_client(config, http))
    }

    /// Build a client around an existing reqwest client.
    pub fn with_http_client(config: ClientConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new(
            "client-id",
            Secret::new("client-secret".to_string()),
            "https://bot.example.com/callback",
        )
    }

    #[test]
    fn defaults_point_at_spotify() {
        let config = config();
        assert_eq!(config.token_endpoint, "https://accounts.spotify.com/api/token");
        assert_eq!(config.authorize_endpoint, "https://accounts.spotify.com/authorize");
        assert_eq!(config.api_base, "https://api.spotify.com/v1");
        assert_eq!(config.scopes, DEFAULT_SCOPES);
    }

    #[test]
    fn base_url_override_rewrites_all_endpoints() {
        let config = config().with_base_url("http://127.0.0.1:4010/");
        assert_eq!(config.token_endpoint, "http://127.0.0.1:4010/api/token");
        assert_eq!(config.authorize_endpoint, "http://127.0.0.1:4010/authorize");
        assert_eq!(config.api_base, "http://127.0.0.1:4010/v1");
    }

    #[test]
    fn debug_does_not_leak_client_secret() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("client-secret"), "got: {debug}");
    }
}
