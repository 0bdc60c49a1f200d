//! Spotify OAuth client library
//!
//! Provides the authorization-code and refresh-token grants, the authorize
//! URL helper used to start the flow, the per-user credential record, and the
//! handful of authenticated Web API calls the bot needs. The crate has no
//! knowledge of where credentials are stored. That is `credential-engine`'s
//! concern.
//!
//! Credential flow:
//! 1. Bot calls `OAuthClient::authorize_url(user_id)` and shows the link
//! 2. Spotify redirects to the callback with `code` and `state=user_id`
//! 3. Callback calls `OAuthClient::exchange_code()` → `Credential`
//! 4. Credential persisted by the store with a trigger TTL of `expires_in`
//! 5. On trigger expiry, `OAuthClient::refresh()` + `Credential::renewed()`

pub mod authorize;
pub mod client;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod resource;
pub mod token;

pub use client::{ClientConfig, OAuthClient};
pub use constants::*;
pub use credentials::Credential;
pub use error::{Error, Result};
pub use resource::{CurrentlyPlaying, PlayHistory, Track};
pub use token::TokenResponse;
