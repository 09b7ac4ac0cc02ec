//! HTTP client integration tests
//!
//! Each test starts a local axum server that mimics the Spotify accounts
//! service, the Spotify Web API, or the Hue bridge REST API.

mod helpers;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Form, Json, Router,
};
use helpers::spawn_mock_server;
use huertbeat::models::{LightStateUpdate, Playback};
use huertbeat::services::spotify_client::SpotifyEndpoints;
use huertbeat::services::{HueClient, LightBridge, MusicService, SpotifyClient};
use huertbeat_common::config::SpotifyCredentials;
use huertbeat_common::Error;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Spotify mock
// ============================================================================

struct MockSpotify {
    /// Token the Web API currently accepts
    valid_token: Mutex<String>,
    /// Grant types seen by the token endpoint, in order
    grants: Mutex<Vec<String>>,
    playing: Mutex<Option<Value>>,
}

impl MockSpotify {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            valid_token: Mutex::new("token-1".to_string()),
            grants: Mutex::new(Vec::new()),
            playing: Mutex::new(None),
        })
    }
}

async fn token_endpoint(
    State(mock): State<Arc<MockSpotify>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let basic = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !basic.starts_with("Basic ") {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid_client" })))
            .into_response();
    }

    let grant = form.get("grant_type").cloned().unwrap_or_default();
    mock.grants.lock().unwrap().push(grant.clone());

    match grant.as_str() {
        "authorization_code" if form.get("code").map(String::as_str) == Some("good") => Json(json!({
            "access_token": "token-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "scope": "user-read-currently-playing"
        }))
        .into_response(),
        "refresh_token" if form.get("refresh_token").map(String::as_str) == Some("refresh-1") => {
            Json(json!({
                "access_token": "token-2",
                "token_type": "Bearer",
                "expires_in": 3600
            }))
            .into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid authorization code"
            })),
        )
            .into_response(),
    }
}

fn bearer_ok(mock: &MockSpotify, headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", mock.valid_token.lock().unwrap());
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

fn expired() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": { "status": 401, "message": "The access token expired" } })),
    )
        .into_response()
}

async fn currently_playing(State(mock): State<Arc<MockSpotify>>, headers: HeaderMap) -> Response {
    if !bearer_ok(&mock, &headers) {
        return expired();
    }
    let playing = mock.playing.lock().unwrap().clone();
    match playing {
        Some(body) => Json(body).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn audio_features(
    State(mock): State<Arc<MockSpotify>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !bearer_ok(&mock, &headers) {
        return expired();
    }
    if id == "known" {
        Json(json!({ "id": "known", "tempo": 128.0, "energy": 0.8 })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "status": 404, "message": "analysis not found" } })),
        )
            .into_response()
    }
}

async fn spotify_fixture() -> (Arc<MockSpotify>, SpotifyClient) {
    let mock = MockSpotify::new();
    let router = Router::new()
        .route("/api/token", post(token_endpoint))
        .route("/v1/me/player/currently-playing", get(currently_playing))
        .route("/v1/audio-features/:id", get(audio_features))
        .with_state(mock.clone());
    let base = spawn_mock_server(router).await;

    let client = SpotifyClient::with_endpoints(
        SpotifyCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost:1312/callback".to_string(),
        },
        SpotifyEndpoints {
            api_base: base.clone(),
            accounts_base: base,
        },
        Duration::from_secs(5),
    )
    .unwrap();
    (mock, client)
}

#[tokio::test]
async fn test_exchange_code_then_poll_playing_track() {
    let (mock, client) = spotify_fixture().await;
    *mock.playing.lock().unwrap() = Some(json!({
        "is_playing": true,
        "currently_playing_type": "track",
        "progress_ms": 1000,
        "item": { "id": "known", "name": "Song" }
    }));

    client.exchange_code("good").await.unwrap();
    assert!(client.is_authorized().await);

    let playback = client.current_playback().await.unwrap();
    assert_eq!(
        playback,
        Playback::Playing {
            track_id: "known".to_string()
        }
    );
    assert_eq!(client.track_tempo("known").await.unwrap(), 128.0);
}

#[tokio::test]
async fn test_no_content_is_idle() {
    let (_mock, client) = spotify_fixture().await;
    client.exchange_code("good").await.unwrap();
    assert_eq!(client.current_playback().await.unwrap(), Playback::Idle);
}

#[tokio::test]
async fn test_rejected_code_is_auth_error() {
    let (_mock, client) = spotify_fixture().await;
    let err = client.exchange_code("stale").await.unwrap_err();
    match err {
        Error::Auth(msg) => {
            assert!(msg.contains("invalid_grant"));
            assert!(msg.contains("400"));
        }
        other => panic!("Expected Auth error, got {:?}", other),
    }
    assert!(!client.is_authorized().await);
}

#[tokio::test]
async fn test_missing_analysis_is_api_error_with_status() {
    let (_mock, client) = spotify_fixture().await;
    client.exchange_code("good").await.unwrap();

    let err = client.track_tempo("unknown").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(err.to_string().contains("analysis not found"));
}

#[tokio::test]
async fn test_unauthorized_response_refreshes_and_retries() {
    let (mock, client) = spotify_fixture().await;
    client.exchange_code("good").await.unwrap();

    // Server side expiry: only the refreshed token is accepted now
    *mock.valid_token.lock().unwrap() = "token-2".to_string();

    assert_eq!(client.current_playback().await.unwrap(), Playback::Idle);
    assert_eq!(
        *mock.grants.lock().unwrap(),
        vec!["authorization_code".to_string(), "refresh_token".to_string()]
    );

    // The refreshed token keeps working without another refresh
    assert_eq!(client.track_tempo("known").await.unwrap(), 128.0);
    assert_eq!(mock.grants.lock().unwrap().len(), 2);
}

// ============================================================================
// Hue bridge mock
// ============================================================================

#[derive(Default)]
struct MockBridge {
    writes: Mutex<Vec<(String, Value)>>,
}

async fn bridge_lights(Path(user): Path<String>) -> Json<Value> {
    if user != "good" {
        return Json(json!([
            { "error": { "type": 1, "address": "/lights", "description": "unauthorized user" } }
        ]));
    }
    Json(json!({
        "1": {
            "name": "Desk",
            "type": "Extended color light",
            "state": { "on": true, "bri": 120, "hue": 8000, "sat": 140, "reachable": true }
        },
        "2": {
            "name": "Hallway",
            "type": "Dimmable light",
            "state": { "on": false, "bri": 254, "reachable": false }
        }
    }))
}

async fn bridge_save(
    State(mock): State<Arc<MockBridge>>,
    Path((_user, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    mock.writes.lock().unwrap().push((id.clone(), body));
    if id == "9" {
        return Json(json!([
            { "error": { "type": 3, "address": "/lights/9/state", "description": "resource, /lights/9/state, not available" } }
        ]));
    }
    Json(json!([{ "success": { "/lights/1/state/on": true } }]))
}

async fn bridge_fixture(user: &str) -> (Arc<MockBridge>, HueClient) {
    let mock = Arc::new(MockBridge::default());
    let router = Router::new()
        .route("/api/:user/lights", get(bridge_lights))
        .route("/api/:user/lights/:id/state", put(bridge_save))
        .with_state(mock.clone());
    let base = spawn_mock_server(router).await;
    let client =
        HueClient::with_base_url(format!("{}/api/{}", base, user), Duration::from_secs(5)).unwrap();
    (mock, client)
}

#[tokio::test]
async fn test_bridge_lights_snapshot() {
    let (_mock, client) = bridge_fixture("good").await;
    let lights = client.lights().await.unwrap();

    assert_eq!(lights.len(), 2);
    assert_eq!(lights[0].id, "1");
    assert_eq!(lights[0].name, "Desk");
    assert!(lights[0].reachable);
    assert_eq!(lights[0].hue, Some(8000));
    assert!(!lights[1].reachable);
    assert_eq!(lights[1].hue, None);
}

#[tokio::test]
async fn test_bridge_unauthorized_user() {
    let (_mock, client) = bridge_fixture("intruder").await;
    let err = client.lights().await.unwrap_err();
    assert!(matches!(err, Error::Bridge(ref msg) if msg.contains("unauthorized user")));
}

#[tokio::test]
async fn test_bridge_save_sends_partial_state() {
    let (mock, client) = bridge_fixture("good").await;

    let on = LightStateUpdate {
        on: true,
        transition_time: 8,
        hue: Some(41870),
        brightness: Some(254),
        saturation: Some(254),
    };
    let off = LightStateUpdate {
        on: false,
        transition_time: 8,
        hue: None,
        brightness: None,
        saturation: None,
    };
    client.save_light("1", &on).await.unwrap();
    client.save_light("1", &off).await.unwrap();

    let writes = mock.writes.lock().unwrap();
    assert_eq!(
        writes[0],
        (
            "1".to_string(),
            json!({ "on": true, "transitiontime": 8, "hue": 41870, "bri": 254, "sat": 254 })
        )
    );
    assert_eq!(
        writes[1],
        ("1".to_string(), json!({ "on": false, "transitiontime": 8 }))
    );
}

#[tokio::test]
async fn test_bridge_save_error_entry() {
    let (_mock, client) = bridge_fixture("good").await;
    let off = LightStateUpdate {
        on: false,
        transition_time: 0,
        hue: None,
        brightness: None,
        saturation: None,
    };
    let err = client.save_light("9", &off).await.unwrap_err();
    assert!(err.to_string().contains("not available"));
}
