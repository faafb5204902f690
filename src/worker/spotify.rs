//! Spotify metadata client: client-credentials OAuth2 with a cached token,
//! a public-page scrape that needs no credentials, and the credentialed API
//! lookup for genre and label.
//!
//! Every path degrades gracefully: scrape fields are independently
//! optional and API failures yield empty details, never an error.

use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthUrl, ClientId, ClientSecret, TokenResponse, TokenUrl};
use regex::Regex;
use tokio::sync::RwLock;

use crate::models::SpotifyCredentials;

/// Per-call timeout for page and API fetches.
const CALL_TIMEOUT: StdDuration = StdDuration::from_secs(30);
/// Cap on the whole credentialed API sequence (track + artist).
const API_SEQUENCE_CAP: StdDuration = StdDuration::from_secs(60);
/// Tokens are refreshed a minute before Spotify's stated expiry.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Spotify endpoint configuration; tests point these at local stubs.
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub auth_url: String,
    pub token_url: String,
    pub api_base_url: String,
    pub page_base_url: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.spotify.com/authorize".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
            api_base_url: "https://api.spotify.com".to_string(),
            page_base_url: "https://open.spotify.com".to_string(),
        }
    }
}

/// Fields scraped from the public track page. All optional; any extraction
/// that fails just leaves its field empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapedTrackMetadata {
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub image_url: Option<String>,
}

/// Result of the credentialed API lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiTrackDetails {
    pub genres: Option<String>,
    pub label: Option<String>,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Spotify client owned by the Worker Service.
pub struct SpotifyClient {
    config: SpotifyConfig,
    http: reqwest::Client,
    credentials: RwLock<SpotifyCredentials>,
    token: RwLock<Option<CachedToken>>,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig, credentials: SpotifyCredentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            config,
            http,
            credentials: RwLock::new(credentials),
            token: RwLock::new(None),
        }
    }

    /// Replace credentials and invalidate the cached token.
    pub async fn set_credentials(&self, credentials: SpotifyCredentials) {
        *self.credentials.write().await = credentials;
        *self.token.write().await = None;
    }

    pub async fn has_credentials(&self) -> bool {
        self.credentials.read().await.is_present()
    }

    /// Full verification: actually acquire a token.
    pub async fn verify_credentials(&self) -> bool {
        if !self.has_credentials().await {
            return false;
        }
        match self.token().await {
            Ok(_) => true,
            Err(error) => {
                tracing::info!(%error, "Spotify credential verification failed");
                false
            }
        }
    }

    /// Cached client-credentials access token, refreshed a minute early.
    async fn token(&self) -> Result<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let credentials = self.credentials.read().await.clone();
        if !credentials.is_present() {
            return Err(anyhow!("Spotify credentials not configured"));
        }

        let oauth_client = BasicClient::new(
            ClientId::new(credentials.client_id),
            Some(ClientSecret::new(credentials.client_secret)),
            AuthUrl::new(self.config.auth_url.clone()).context("invalid auth URL")?,
            Some(TokenUrl::new(self.config.token_url.clone()).context("invalid token URL")?),
        );

        let response = tokio::time::timeout(
            CALL_TIMEOUT,
            oauth_client
                .exchange_client_credentials()
                .request_async(async_http_client),
        )
        .await
        .context("token request timed out")?
        .map_err(|e| anyhow!("token exchange failed: {e}"))?;

        let ttl = response
            .expires_in()
            .map(|d| d.as_secs() as i64)
            .unwrap_or(3600);
        let access_token = response.access_token().secret().clone();

        *self.token.write().await = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Utc::now() + Duration::seconds(ttl - TOKEN_EXPIRY_MARGIN_SECS),
        });

        Ok(access_token)
    }

    /// Scrape the public track page for release year, track number, and
    /// cover image URL. No credentials required.
    pub async fn scrape_track_page(&self, track_id: &str) -> ScrapedTrackMetadata {
        let url = format!("{}/track/{}", self.config.page_base_url, track_id);
        let html = match self.fetch_page(&url).await {
            Ok(html) => html,
            Err(error) => {
                tracing::debug!(track_id, %error, "Track page fetch failed");
                return ScrapedTrackMetadata::default();
            }
        };

        let year = extract_meta(&html, "music:release_date")
            .and_then(|date| date.get(..4).and_then(|y| y.parse().ok()));
        let track_number =
            extract_meta(&html, "music:album:track").and_then(|n| n.parse().ok());
        let image_url = extract_meta(&html, "og:image");

        ScrapedTrackMetadata {
            year,
            track_number,
            image_url,
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("requesting track page")?
            .error_for_status()
            .context("track page returned an error status")?;
        response.text().await.context("reading track page body")
    }

    /// Credentialed lookup: artist genres and album label. Any failure or
    /// timeout yields empty details.
    pub async fn api_lookup(&self, track_id: &str) -> ApiTrackDetails {
        match tokio::time::timeout(API_SEQUENCE_CAP, self.api_lookup_inner(track_id)).await {
            Ok(Ok(details)) => details,
            Ok(Err(error)) => {
                tracing::debug!(track_id, %error, "Spotify API lookup failed");
                ApiTrackDetails::default()
            }
            Err(_) => {
                tracing::debug!(track_id, "Spotify API lookup exceeded the sequence cap");
                ApiTrackDetails::default()
            }
        }
    }

    async fn api_lookup_inner(&self, track_id: &str) -> Result<ApiTrackDetails> {
        let token = self.token().await?;

        let track: serde_json::Value = self
            .http
            .get(format!("{}/v1/tracks/{}", self.config.api_base_url, track_id))
            .bearer_auth(&token)
            .send()
            .await
            .context("requesting track")?
            .error_for_status()
            .context("track request returned an error status")?
            .json()
            .await
            .context("parsing track body")?;

        let label = track["album"]["label"]
            .as_str()
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        let genres = match track["artists"][0]["id"].as_str() {
            Some(artist_id) => {
                let artist: serde_json::Value = self
                    .http
                    .get(format!("{}/v1/artists/{}", self.config.api_base_url, artist_id))
                    .bearer_auth(&token)
                    .send()
                    .await
                    .context("requesting artist")?
                    .error_for_status()
                    .context("artist request returned an error status")?
                    .json()
                    .await
                    .context("parsing artist body")?;
                artist["genres"]
                    .as_array()
                    .map(|genres| {
                        genres
                            .iter()
                            .filter_map(|g| g.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .filter(|joined| !joined.is_empty())
            }
            None => None,
        };

        Ok(ApiTrackDetails { genres, label })
    }
}

/// Pull a `<meta>` tag's content by property/name, tolerating either
/// attribute order.
fn extract_meta(html: &str, key: &str) -> Option<String> {
    let escaped = regex::escape(key);
    let patterns = [
        format!(r#"<meta[^>]*?(?:property|name)="{escaped}"[^>]*?content="([^"]*)""#),
        format!(r#"<meta[^>]*?content="([^"]*)"[^>]*?(?:property|name)="{escaped}""#),
    ];
    for pattern in patterns {
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if let Some(captures) = re.captures(html) {
            let content = captures[1].to_string();
            if !content.is_empty() {
                return Some(content);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TRACK_PAGE: &str = r#"<html><head>
        <meta property="og:image" content="https://i.scdn.co/image/cover.jpg"/>
        <meta name="music:release_date" content="1984-06-25"/>
        <meta name="music:album:track" content="7"/>
    </head></html>"#;

    fn credentials() -> SpotifyCredentials {
        SpotifyCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn client_against(server: &MockServer) -> SpotifyClient {
        let config = SpotifyConfig {
            auth_url: format!("{}/authorize", server.uri()),
            token_url: format!("{}/api/token", server.uri()),
            api_base_url: server.uri(),
            page_base_url: server.uri(),
        };
        SpotifyClient::new(config, credentials())
    }

    async fn mount_token_endpoint(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "test-token",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn meta_extraction_tolerates_attribute_order() {
        assert_eq!(
            extract_meta(TRACK_PAGE, "og:image").as_deref(),
            Some("https://i.scdn.co/image/cover.jpg")
        );
        let reversed = r#"<meta content="2001-01-01" property="music:release_date">"#;
        assert_eq!(
            extract_meta(reversed, "music:release_date").as_deref(),
            Some("2001-01-01")
        );
        assert_eq!(extract_meta(TRACK_PAGE, "missing:key"), None);
    }

    #[tokio::test]
    async fn scrape_extracts_year_track_number_and_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/track/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TRACK_PAGE))
            .mount(&server)
            .await;

        let client = client_against(&server);
        let scraped = client.scrape_track_page("abc123").await;
        assert_eq!(scraped.year, Some(1984));
        assert_eq!(scraped.track_number, Some(7));
        assert_eq!(
            scraped.image_url.as_deref(),
            Some("https://i.scdn.co/image/cover.jpg")
        );
    }

    #[tokio::test]
    async fn scrape_failure_yields_empty_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/track/abc123"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_against(&server);
        assert_eq!(client.scrape_track_page("abc123").await, ScrapedTrackMetadata::default());
    }

    #[tokio::test]
    async fn verify_credentials_acquires_a_token() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;

        let client = client_against(&server);
        assert!(client.verify_credentials().await);
    }

    #[tokio::test]
    async fn verify_fails_without_credentials() {
        let server = MockServer::start().await;
        let config = SpotifyConfig {
            token_url: format!("{}/api/token", server.uri()),
            ..SpotifyConfig::default()
        };
        let client = SpotifyClient::new(config, SpotifyCredentials::default());
        assert!(!client.verify_credentials().await);
    }

    #[tokio::test]
    async fn api_lookup_joins_genres_and_reads_label() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/tracks/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "artists": [{"id": "artist-1"}],
                "album": {"label": "Warner Bros."},
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/artists/artist-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "genres": ["funk", "pop", "rock"],
            })))
            .mount(&server)
            .await;

        let client = client_against(&server);
        let details = client.api_lookup("abc123").await;
        assert_eq!(details.genres.as_deref(), Some("funk, pop, rock"));
        assert_eq!(details.label.as_deref(), Some("Warner Bros."));
    }

    #[tokio::test]
    async fn api_failure_degrades_to_empty_details() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        Mock::given(method("GET"))
            .and(path("/v1/tracks/abc123"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_against(&server);
        assert_eq!(client.api_lookup("abc123").await, ApiTrackDetails::default());
    }
}
