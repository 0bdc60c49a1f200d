//! Error types for credential engine operations

/// Errors from credential store and refresh operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend unreachable or an operation timed out. Callers must report
    /// this as "try again later", never as "not authenticated".
    #[error("credential store unavailable: {0}")]
    StoreUnavailable(String),

    /// The user has no credential record. A normal state, not a fault.
    #[error("user {0} is not authenticated")]
    NotAuthenticated(String),

    #[error("corrupt credential record for user {user_id}: {reason}")]
    CorruptRecord { user_id: String, reason: String },

    #[error("serializing credential: {0}")]
    Serialization(String),

    #[error(transparent)]
    Auth(#[from] spotify_auth::Error),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_unavailable_is_distinct_from_not_authenticated() {
        let unavailable = Error::StoreUnavailable("connection refused".into());
        let absent = Error::NotAuthenticated("42".into());
        assert!(unavailable.to_string().contains("unavailable"));
        assert_eq!(absent.to_string(), "user 42 is not authenticated");
    }

    #[test]
    fn auth_errors_convert_transparently() {
        let err: Error = spotify_auth::Error::AuthExchangeFailed("bad code".into()).into();
        assert_eq!(err.to_string(), "authorization code exchange failed: bad code");
    }
}
