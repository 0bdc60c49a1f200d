//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (callback completes the flow)
//! 2. Token refresh (triggered by the credential engine on expiry)
//!
//! Both POST a form body to `token_endpoint` with HTTP basic client
//! authentication, differing only in grant type and parameters.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::OAuthClient;
use crate::credentials::Credential;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `refresh_token` is always present on a code exchange but usually absent
/// on refresh; the caller keeps the previous one in that case.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthClient {
    /// Exchange an authorization code for the user's first credential.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential> {
        let response = self
            .post_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .await
            .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::AuthExchangeFailed(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::AuthExchangeFailed(format!("invalid token response: {e}")))?;

        debug!(code = %abbreviate(code), "user credentials received");
        Credential::from_grant(token)
    }

    /// Swap a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .post_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await
            .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::AuthRefreshFailed {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("invalid refresh response: {e}")))
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> reqwest::Result<reqwest::Response> {
        self.http
            .post(&self.config.token_endpoint)
            .basic_auth(
                &self.config.client_id,
                Some(self.config.client_secret.expose()),
            )
            .form(form)
            .send()
            .await
    }
}

/// First and last 8 characters of a one-time code, for logs.
fn abbreviate(code: &str) -> String {
    if code.len() <= 16 || !code.is_ascii() {
        return "<short>".to_string();
    }
    format!("{}...{}", &code[..8], &code[code.len() - 8..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use common::Secret;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASIC_AUTH: &str = "Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=";

    fn client_for(server: &MockServer) -> OAuthClient {
        let config = ClientConfig::new(
            "client-id",
            Secret::new("client-secret".to_string()),
            "https://bot.example.com/callback",
        )
        .with_base_url(&server.uri());
        OAuthClient::new(config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn token_response_deserializes_without_refresh_token() {
        let json = r#"{"access_token":"A2","token_type":"Bearer","scope":"user-read-recently-played","expires_in":3600}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "A2");
        assert_eq!(token.expires_in, 3600);
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn abbreviate_keeps_code_ends_only() {
        let code = "AQBxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxEND12345";
        assert_eq!(abbreviate(code), "AQBxxxxx...END12345");
        assert_eq!(abbreviate("short"), "<short>");
    }

    #[tokio::test]
    async fn exchange_code_posts_form_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header("authorization", BASIC_AUTH))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .and(body_string_contains("redirect_uri=https%3A%2F%2Fbot.example.com%2Fcallback"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A1",
                "token_type": "Bearer",
                "scope": "user-read-recently-played",
                "expires_in": 3600,
                "refresh_token": "R1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = client_for(&server).exchange_code("auth-code").await.unwrap();
        assert_eq!(credential.access_token, "A1");
        assert_eq!(credential.refresh_token, "R1");
        assert_eq!(credential.expires_in, 3600);
    }

    #[tokio::test]
    async fn exchange_code_non_2xx_is_exchange_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).exchange_code("bogus").await.unwrap_err();
        assert!(matches!(err, Error::AuthExchangeFailed(_)), "got: {err:?}");
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn exchange_code_without_refresh_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A1",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).exchange_code("code").await.unwrap_err();
        assert!(matches!(err, Error::AuthExchangeFailed(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn refresh_posts_refresh_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(header("authorization", BASIC_AUTH))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=R1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = client_for(&server).refresh("R1").await.unwrap();
        assert_eq!(token.access_token, "A2");
        assert!(token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn refresh_400_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).refresh("revoked").await.unwrap_err();
        match &err {
            Error::AuthRefreshFailed { status, message } => {
                assert_eq!(*status, 400);
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("expected AuthRefreshFailed, got {other:?}"),
        }
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn refresh_503_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).refresh("R1").await.unwrap_err();
        assert!(!err.is_rejection(), "503 must be retryable, got {err:?}");
    }

    #[tokio::test]
    async fn refresh_times_out_as_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config = ClientConfig::new(
            "client-id",
            Secret::new("client-secret".to_string()),
            "https://bot.example.com/callback",
        )
        .with_base_url(&server.uri());
        let client = OAuthClient::new(config, Duration::from_millis(100)).unwrap();

        let err = client.refresh("R1").await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got: {err:?}");
    }
}
