//! Authorization URL for starting the code flow
//!
//! The chat user id travels through the provider as `state` and comes back
//! on the callback, which is how the callback knows whose credential it is
//! storing.

use crate::client::OAuthClient;
use crate::error::{Error, Result};

impl OAuthClient {
    /// Build the authorize endpoint URL a user opens to link their account.
    pub fn authorize_url(&self, user_id: &str) -> Result<String> {
        let config = &self.config;
        let url = reqwest::Url::parse_with_params(
            &config.authorize_endpoint,
            &[
                ("client_id", config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("scope", config.scopes.as_str()),
                ("state", user_id),
            ],
        )
        .map_err(|e| Error::InvalidResponse(format!("invalid authorize endpoint: {e}")))?;
        Ok(url.into())
    }
}
