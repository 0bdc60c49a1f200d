//! Spotify OAuth and Web API endpoints
//!
//! Defaults for `ClientConfig`. Tests point the client at a mock server
//! instead of overriding these.

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";

/// Authorization endpoint the user is sent to from the bot
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.spotify.com/authorize";

/// Web API base for the authenticated resource calls
pub const API_BASE: &str = "https://api.spotify.com/v1";

/// Scopes needed to read playback history and modify the queue.
pub const DEFAULT_SCOPES: &str =
    "user-read-recently-played user-read-currently-playing user-modify-playback-state";
