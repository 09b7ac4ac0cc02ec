//! Spotify Web API client
//!
//! Covers the three calls the service needs plus token upkeep:
//! - authorization-code exchange and refresh (accounts service)
//! - currently playing track
//! - audio features (tempo) for a track
//!
//! Web API calls use bearer authentication. An expired token, or a 401 from
//! the Web API, triggers one refresh and a single retry of that request.

use async_trait::async_trait;
use huertbeat_common::config::SpotifyCredentials;
use huertbeat_common::{Error, Result};
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::MusicService;
use crate::models::Playback;

pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com";
pub const SPOTIFY_ACCOUNTS_BASE: &str = "https://accounts.spotify.com";
const USER_AGENT: &str = concat!("huertbeat/", env!("CARGO_PKG_VERSION"));

/// Scopes requested during authorization
pub const SCOPES: &[&str] = &["user-read-currently-playing"];

/// Refresh a little before the advertised expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Base URLs of the Spotify services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyEndpoints {
    pub api_base: String,
    pub accounts_base: String,
}

impl Default for SpotifyEndpoints {
    fn default() -> Self {
        Self {
            api_base: SPOTIFY_API_BASE.to_string(),
            accounts_base: SPOTIFY_ACCOUNTS_BASE.to_string(),
        }
    }
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub expires_in: u64,
    /// Absent on most refresh responses
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Token endpoint error body
#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Web API error body: `{"error": {"status": 401, "message": "..."}}`
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// `GET /v1/me/player/currently-playing` response
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub currently_playing_type: Option<String>,
    #[serde(default)]
    pub item: Option<PlayingItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayingItem {
    /// Null for local files
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl CurrentlyPlaying {
    /// Reduce the response to a playback observation
    ///
    /// Paused players, non-track items and items without an id count as idle.
    pub fn into_playback(self) -> Playback {
        if !self.is_playing {
            return Playback::Idle;
        }
        if let Some(kind) = self.currently_playing_type.as_deref() {
            if kind != "track" {
                return Playback::Idle;
            }
        }
        match self.item.and_then(|item| item.id) {
            Some(track_id) => Playback::Playing { track_id },
            None => Playback::Idle,
        }
    }
}

/// `GET /v1/audio-features/{id}` response, trimmed to what is used
#[derive(Debug, Clone, Deserialize)]
pub struct AudioFeatures {
    pub tempo: f64,
}

#[derive(Debug, Clone)]
struct TokenSet {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

impl TokenSet {
    fn from_response(response: TokenResponse, previous_refresh: Option<String>) -> Self {
        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(EXPIRY_MARGIN);
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: Instant::now() + lifetime,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Spotify Web API client
pub struct SpotifyClient {
    http_client: reqwest::Client,
    credentials: SpotifyCredentials,
    endpoints: SpotifyEndpoints,
    tokens: RwLock<Option<TokenSet>>,
}

impl SpotifyClient {
    pub fn new(credentials: SpotifyCredentials, timeout: Duration) -> Result<Self> {
        Self::with_endpoints(credentials, SpotifyEndpoints::default(), timeout)
    }

    /// Client against non-default base URLs
    pub fn with_endpoints(
        credentials: SpotifyCredentials,
        endpoints: SpotifyEndpoints,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            credentials,
            endpoints,
            tokens: RwLock::new(None),
        })
    }

    /// URL of the authorization page the operator must visit
    pub fn authorize_url(&self) -> Result<Url> {
        let scope = SCOPES.join(" ");
        Url::parse_with_params(
            &format!("{}/authorize", self.endpoints.accounts_base),
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
                ("scope", scope.as_str()),
            ],
        )
        .map_err(|e| Error::Config(format!("Invalid accounts URL: {}", e)))
    }

    /// Whether an access token is held
    pub async fn is_authorized(&self) -> bool {
        self.tokens.read().await.is_some()
    }

    /// Exchange an authorization code for an access/refresh token pair
    pub async fn exchange_code(&self, code: &str) -> Result<()> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
        ];
        let response = self.request_token(&params).await?;
        if response.refresh_token.is_none() {
            tracing::warn!("Token exchange returned no refresh token");
        }

        *self.tokens.write().await = Some(TokenSet::from_response(response, None));
        tracing::info!("Spotify access token acquired");
        Ok(())
    }

    /// Replace the access token using the stored refresh token
    pub async fn refresh(&self) -> Result<()> {
        let refresh_token = self
            .tokens
            .read()
            .await
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .ok_or_else(|| Error::Auth("No refresh token available".to_string()))?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let response = self.request_token(&params).await?;

        *self.tokens.write().await = Some(TokenSet::from_response(response, Some(refresh_token)));
        tracing::debug!("Spotify access token refreshed");
        Ok(())
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(format!("{}/api/token", self.endpoints.accounts_base))
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<TokenError>(&text) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => text,
            };
            return Err(Error::Auth(format!("{} ({})", message, status.as_u16())));
        }

        Ok(response.json().await?)
    }

    /// Current access token, refreshed first if it has expired
    async fn access_token(&self) -> Result<String> {
        let expired = {
            let tokens = self.tokens.read().await;
            match tokens.as_ref() {
                Some(t) if !t.is_expired() => return Ok(t.access_token.clone()),
                Some(_) => true,
                None => false,
            }
        };

        if !expired {
            return Err(Error::Auth("Not authorized with Spotify".to_string()));
        }

        self.refresh().await?;
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_else(|| Error::Auth("Not authorized with Spotify".to_string()))
    }

    /// Bearer-authenticated GET with one refresh-and-retry on 401
    async fn authorized_get(&self, path: &str) -> Result<Response> {
        let url = format!("{}{}", self.endpoints.api_base, path);

        let token = self.access_token().await?;
        let response = self.http_client.get(&url).bearer_auth(token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("Spotify returned 401, refreshing token");
        self.refresh().await?;
        let token = self.access_token().await?;
        Ok(self.http_client.get(&url).bearer_auth(token).send().await?)
    }
}

/// Turn a non-success Web API response into an error
async fn api_error(response: Response) -> Error {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    Error::Api { status, message }
}

#[async_trait]
impl MusicService for SpotifyClient {
    async fn current_playback(&self) -> Result<Playback> {
        let response = self.authorized_get("/v1/me/player/currently-playing").await?;

        match response.status() {
            StatusCode::NO_CONTENT => return Ok(Playback::Idle),
            status if !status.is_success() => return Err(api_error(response).await),
            _ => {}
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Playback::Idle);
        }
        let playing: CurrentlyPlaying = serde_json::from_str(&body).map_err(|e| {
            Error::InvalidInput(format!("Unexpected currently-playing body: {}", e))
        })?;
        Ok(playing.into_playback())
    }

    async fn track_tempo(&self, track_id: &str) -> Result<f64> {
        let response = self
            .authorized_get(&format!("/v1/audio-features/{}", track_id))
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let features: AudioFeatures = response.json().await?;
        tracing::debug!(track_id, tempo = features.tempo, "Audio features fetched");
        Ok(features.tempo)
    }
}
