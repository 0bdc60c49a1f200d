//! Service-specific error types
//!
//! Per-request failures surfaced by the HTTP handlers. Startup failures go
//! through `anyhow` in `main` instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The user declined the authorization prompt.
    #[error("Access denied")]
    AccessDenied,

    #[error("missing query parameter: {0}")]
    MissingParameter(&'static str),

    #[error(transparent)]
    Auth(#[from] spotify_auth::Error),

    #[error(transparent)]
    Engine(#[from] credential_engine::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        use credential_engine::Error as EngineError;
        match self {
            Error::AccessDenied => StatusCode::FORBIDDEN,
            Error::MissingParameter(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) | Error::Engine(EngineError::Auth(_)) => StatusCode::BAD_GATEWAY,
            Error::Engine(EngineError::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Engine(EngineError::NotAuthenticated(_)) => StatusCode::NOT_FOUND,
            Error::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            serde_json::json!({ "error": self.to_string() }).to_string(),
        )
            .into_response()
    }
}
