//! Per-user credential record
//!
//! The record is what the credential store persists (as JSON) under the
//! user's key. It is built once from the code-exchange response and then
//! renewed in place from every refresh response.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// A single user's OAuth credentials.
///
/// `expires_at` is a unix timestamp in milliseconds, fixed when the record is
/// built so that saving the same record twice stores identical bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// Provider-reported lifetime of `access_token`, in seconds
    pub expires_in: u64,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: u64,
}

impl Credential {
    /// Build the initial record from an authorization-code grant.
    ///
    /// The code grant must carry a refresh token; without one the engine
    /// could never renew the credential.
    pub fn from_grant(token: TokenResponse) -> Result<Self> {
        let refresh_token = token.refresh_token.ok_or_else(|| {
            Error::AuthExchangeFailed("token response carried no refresh_token".into())
        })?;
        Ok(Self {
            expires_at: expires_at(token.expires_in),
            access_token: token.access_token,
            refresh_token,
            token_type: token.token_type,
            scope: token.scope,
            expires_in: token.expires_in,
        })
    }

    /// Merge a refresh response into this record.
    ///
    /// The existing refresh token is kept unless the provider rotated it.
    /// Scope is kept when the response omits it.
    pub fn renewed(&self, token: TokenResponse) -> Self {
        Self {
            expires_at: expires_at(token.expires_in),
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| self.refresh_token.clone()),
            token_type: token.token_type,
            scope: token.scope.or_else(|| self.scope.clone()),
            expires_in: token.expires_in,
        }
    }

    /// Whether the access token is past its provider-reported lifetime.
    pub fn is_expired(&self) -> bool {
        now_millis() >= self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn expires_at(expires_in: u64) -> u64 {
    now_millis().saturating_add(expires_in.saturating_mul(1000))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
