//! Authenticated Web API calls used by the bot's presentation layer
//!
//! Every call takes the caller's current access token. A stale or revoked
//! token surfaces as `Error::Api { status: 401, .. }`; the bot shows "try
//! again" and the credential engine renews the token on its own schedule.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::OAuthClient;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    pub album: Album,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Track {
    /// "Artist A, Artist B"
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Album {
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Image {
    pub url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExternalUrls {
    #[serde(default)]
    pub spotify: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,
    /// Absent for ads, podcasts in some markets, and private sessions.
    pub item: Option<Track>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayHistory {
    pub track: Track,
    pub played_at: String,
}

#[derive(Deserialize)]
struct RecentlyPlayedPage {
    items: Vec<PlayHistory>,
}

impl OAuthClient {
    /// The track playing right now, or `None` when nothing is playing.
    pub async fn currently_playing(&self, access_token: &str) -> Result<Option<CurrentlyPlaying>> {
        let response = self
            .http
            .get(format!("{}/me/player/currently-playing", self.config.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Http(format!("currently-playing request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let playing = parse::<CurrentlyPlaying>(response).await?;
        debug!(is_playing = playing.is_playing, "fetched currently playing");
        Ok(Some(playing))
    }

    /// The user's most recently played tracks, newest first.
    pub async fn recently_played(&self, access_token: &str, limit: u32) -> Result<Vec<PlayHistory>> {
        let response = self
            .http
            .get(format!("{}/me/player/recently-played", self.config.api_base))
            .bearer_auth(access_token)
            .query(&[("limit", limit)])
            .send()
            .await
            .map_err(|e| Error::Http(format!("recently-played request failed: {e}")))?;

        let page = parse::<RecentlyPlayedPage>(response).await?;
        debug!(tracks = page.items.len(), "fetched recently played");
        Ok(page.items)
    }

    /// Look up a single track by id.
    pub async fn track(&self, access_token: &str, track_id: &str) -> Result<Track> {
        let response = self
            .http
            .get(format!("{}/tracks/{track_id}", self.config.api_base))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Http(format!("track request failed: {e}")))?;

        parse(response).await
    }

    /// Append a track (by `spotify:track:...` URI) to the user's playback queue.
    pub async fn add_to_queue(&self, access_token: &str, uri: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/me/player/queue", self.config.api_base))
            .bearer_auth(access_token)
            .query(&[("uri", uri)])
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(|e| Error::Http(format!("add-to-queue request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(response).await);
        }
        debug!(uri, "added track to queue");
        Ok(())
    }
}

async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("unexpected Web API payload: {e}")))
}

async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Error::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use common::Secret;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OAuthClient {
        let config = ClientConfig::new(
            "client-id",
            Secret::new("client-secret".to_string()),
            "https://bot.example.com/callback",
        )
        .with_base_url(&server.uri());
        OAuthClient::new(config, Duration::from_secs(5)).unwrap()
    }

    fn track_json(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "name": format!("Song {id}"),
            "uri": format!("spotify:track:{id}"),
            "artists": [{"name": "First"}, {"name": "Second"}],
            "album": {
                "name": "Album",
                "images": [{"url": "https://i.scdn.co/image/1", "height": 640, "width": 640}]
            },
            "external_urls": {"spotify": format!("https://open.spotify.com/track/{id}")},
            "preview_url": null,
            "duration_ms": 200000
        })
    }

    #[tokio::test]
    async fn currently_playing_uses_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_playing": true,
                "item": track_json("t1")
            })))
            .expect(1)
            .mount(&server)
            .await;

        let playing = client_for(&server).currently_playing("A1").await.unwrap().unwrap();
        assert!(playing.is_playing);
        let track = playing.item.unwrap();
        assert_eq!(track.uri, "spotify:track:t1");
        assert_eq!(track.artist_names(), "First, Second");
    }

    #[tokio::test]
    async fn currently_playing_no_content_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert!(client_for(&server).currently_playing("A1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recently_played_passes_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/recently-played"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"track": track_json("t1"), "played_at": "2026-10-19T10:00:00Z"},
                    {"track": track_json("t2"), "played_at": "2026-10-19T09:55:00Z"}
                ]
            })))
            .mount(&server)
            .await;

        let items = client_for(&server).recently_played("A1", 5).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].track.id, "t2");
    }

    #[tokio::test]
    async fn stale_token_surfaces_as_api_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/recently-played"))
            .respond_with(ResponseTemplate::new(401).set_body_string("The access token expired"))
            .mount(&server)
            .await;

        let err = client_for(&server).recently_played("stale", 5).await.unwrap_err();
        match err {
            Error::Api { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("expired"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn track_lookup_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/tracks/t9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(track_json("t9")))
            .mount(&server)
            .await;

        let track = client_for(&server).track("A1", "t9").await.unwrap();
        assert_eq!(track.name, "Song t9");
        assert_eq!(track.album.images[0].height, Some(640));
    }

    #[tokio::test]
    async fn add_to_queue_accepts_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/me/player/queue"))
            .and(query_param("uri", "spotify:track:t1"))
            .and(header("authorization", "Bearer A1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .add_to_queue("A1", "spotify:track:t1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn add_to_queue_without_active_device_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/me/player/queue"))
            .respond_with(ResponseTemplate::new(404).set_body_string("NO_ACTIVE_DEVICE"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .add_to_queue("A1", "spotify:track:t1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api { status: 404, .. }));
    }
}
