//! Error types for OAuth and Web API operations

/// Errors from the Spotify OAuth client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure or client-side timeout; the provider never answered.
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("authorization code exchange failed: {0}")]
    AuthExchangeFailed(String),

    #[error("token refresh failed ({status}): {message}")]
    AuthRefreshFailed { status: u16, message: String },

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Web API returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl Error {
    /// Whether the provider refused the grant itself (revoked or malformed
    /// refresh token, bad client credentials) as opposed to a transient
    /// failure worth retrying soon.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::AuthRefreshFailed {
                status: 400 | 401 | 403,
                ..
            }
        )
    }
}

/// Result alias for OAuth operations.
pub type Result<T> = std::result::Result<T, Error>;
