//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The Spotify client secret comes from SPOTIFY_CLIENT_SECRET or
//! client_secret_file and is never read from the TOML itself. REDIS_URL
//! overrides `store.url` since the URL may embed a password.

use common::Secret;
use credential_engine::RefreshPolicy;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";
pub const REDIS_URL_ENV: &str = "REDIS_URL";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Spotify application registration
#[derive(Debug, Deserialize)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file holding the client secret (alternative to SPOTIFY_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Redis,
    /// Process-local store; credentials are lost on restart.
    Memory,
}

/// Credential store settings
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            url: None,
            op_timeout_secs: default_op_timeout(),
        }
    }
}

/// Refresh timing, all in seconds
#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_secs: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_rejected_backoff")]
    pub rejected_backoff_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_orphan_rearm")]
    pub orphan_rearm_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            claim_ttl_secs: default_claim_ttl(),
            retry_backoff_secs: default_retry_backoff(),
            rejected_backoff_secs: default_rejected_backoff(),
            reconnect_delay_secs: default_reconnect_delay(),
            orphan_rearm_secs: default_orphan_rearm(),
        }
    }
}

impl RefreshConfig {
    pub fn policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            claim_ttl: Duration::from_secs(self.claim_ttl_secs),
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            rejected_backoff: Duration::from_secs(self.rejected_backoff_secs),
            orphan_delay: Duration::from_secs(self.orphan_rearm_secs),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_scopes() -> String {
    spotify_auth::DEFAULT_SCOPES.to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_op_timeout() -> u64 {
    5
}

fn default_claim_ttl() -> u64 {
    30
}

fn default_retry_backoff() -> u64 {
    60
}

fn default_rejected_backoff() -> u64 {
    3600
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_orphan_rearm() -> u64 {
    1
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. SPOTIFY_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Some(url) = std::env::var(REDIS_URL_ENV)
            .ok()
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty())
        {
            config.store.url = Some(url);
        }

        config.spotify.client_secret = match Secret::from_env(CLIENT_SECRET_ENV) {
            Some(secret) => Some(secret),
            None => match config.spotify.client_secret_file {
                Some(ref file) => Some(Secret::from_file(file)?),
                None => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let redirect = &self.spotify.redirect_uri;
        if !redirect.starts_with("http://") && !redirect.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "redirect_uri must start with http:// or https://, got: {redirect}"
            )));
        }

        if self.spotify.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        let non_zero = [
            ("request_timeout_secs", self.spotify.request_timeout_secs),
            ("op_timeout_secs", self.store.op_timeout_secs),
            ("claim_ttl_secs", self.refresh.claim_ttl_secs),
            ("retry_backoff_secs", self.refresh.retry_backoff_secs),
            ("rejected_backoff_secs", self.refresh.rejected_backoff_secs),
            ("reconnect_delay_secs", self.refresh.reconnect_delay_secs),
            ("orphan_rearm_secs", self.refresh.orphan_rearm_secs),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(common::Error::Config(format!(
                "{name} must be greater than 0"
            )));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.store.backend == BackendKind::Redis && self.store.url.is_none() {
            return Err(common::Error::Config(format!(
                "store.url (or {REDIS_URL_ENV}) is required for the redis backend"
            )));
        }

        if self.spotify.client_secret.is_none() {
            return Err(common::Error::MissingSecret(format!(
                "{CLIENT_SECRET_ENV} or spotify.client_secret_file"
            )));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("spotify-credential-engine.toml")
    }
}
