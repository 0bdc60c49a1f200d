//! HTTP surface
//!
//! Endpoints:
//! - GET    /callback?code&state[&error] - complete the authorization flow
//! - GET    /authorize/{user_id}         - redirect a user to the consent page
//! - GET    /users/{user_id}             - credential status (never tokens)
//! - DELETE /users/{user_id}             - logout
//! - GET    /health                      - store reachability
//! - GET    /metrics                     - Prometheus text format

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use credential_engine::CredentialStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use spotify_auth::OAuthClient;
use tracing::{info, warn};

use crate::error::{Error, Result};

const SUCCESS_PAGE: &str = "Success! You can now close this tab.";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CredentialStore>,
    pub oauth: OAuthClient,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<CredentialStore>, oauth: OAuthClient, prometheus: PrometheusHandle) -> Self {
        Self {
            store,
            oauth,
            prometheus,
            started_at: Instant::now(),
        }
    }
}

/// Build the router with a concurrency limit of `max_connections`.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/callback", get(callback))
        .route("/authorize/{user_id}", get(authorize))
        .route("/users/{user_id}", get(user_status).delete(logout))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Query string the provider appends when redirecting back.
#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// GET /callback - exchange the code and store the user's first credential.
///
/// Responses are plain text since a browser is on the other end.
async fn callback(State(state): State<AppState>, Query(params): Query<CallbackParams>) -> Response {
    let (status, body) = match complete_authorization(&state, params).await {
        Ok(()) => (StatusCode::OK, SUCCESS_PAGE.to_string()),
        Err(e) => {
            let status = e.status();
            let body = match status {
                StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST => e.to_string(),
                StatusCode::BAD_GATEWAY => {
                    warn!(error = %e, "authorization code exchange failed");
                    "Could not complete authorization with Spotify, please try again.".into()
                }
                StatusCode::SERVICE_UNAVAILABLE => {
                    warn!(error = %e, "credential store unavailable during callback");
                    "Service temporarily unavailable, please try again.".into()
                }
                _ => {
                    warn!(error = %e, "callback failed");
                    "Internal error".into()
                }
            };
            (status, body)
        }
    };

    crate::metrics::record_callback(status.as_u16());
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn complete_authorization(state: &AppState, params: CallbackParams) -> Result<()> {
    if let Some(reason) = params.error.filter(|e| !e.is_empty()) {
        info!(reason, user_id = params.state.as_deref(), "user denied authorization");
        return Err(Error::AccessDenied);
    }
    let code = non_empty(params.code).ok_or(Error::MissingParameter("code"))?;
    let user_id = non_empty(params.state).ok_or(Error::MissingParameter("state"))?;

    let credential = state.oauth.exchange_code(&code).await?;
    let ttl = Duration::from_secs(credential.expires_in);
    state.store.save(&user_id, &credential, Some(ttl)).await?;

    info!(user_id, expires_in = credential.expires_in, "user authorized");
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// GET /authorize/{user_id} - 307 to the provider's consent page.
async fn authorize(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Redirect> {
    let url = state.oauth.authorize_url(&user_id)?;
    Ok(Redirect::temporary(&url))
}

/// GET /users/{user_id} - whether the user is linked and when the next
/// refresh is due.
async fn user_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse> {
    let body = match state.store.load(&user_id).await? {
        Some(credential) => {
            let refresh_in = state.store.trigger_ttl(&user_id).await?;
            serde_json::json!({
                "user_id": user_id,
                "authenticated": true,
                "expires_at": credential.expires_at,
                "expired": credential.is_expired(),
                "refresh_in_secs": refresh_in.map(|d| d.as_secs()),
            })
        }
        None => serde_json::json!({
            "user_id": user_id,
            "authenticated": false,
            "expires_at": null,
            "expired": null,
            "refresh_in_secs": null,
        }),
    };

    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    ))
}

/// DELETE /users/{user_id} - remove record, trigger and claim.
async fn logout(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse> {
    if !state.store.delete(&user_id).await? {
        return Err(credential_engine::Error::NotAuthenticated(user_id).into());
    }

    info!(user_id, "user logged out");
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "user_id": user_id, "status": "removed" }).to_string(),
    ))
}

/// GET /health - 200 while the store answers, 503 otherwise.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let backend = state.store.backend().id().to_string();

    let (status_code, body) = match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "store": "reachable",
                "backend": backend,
                "uptime_seconds": uptime,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "degraded",
                "store": "unreachable",
                "backend": backend,
                "error": e.to_string(),
                "uptime_seconds": uptime,
            }),
        ),
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /metrics - Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
