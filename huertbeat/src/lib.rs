//! huertbeat library - Hue lights pulsing to the Spotify beat
//!
//! - [`services`]: Spotify Web API and Hue bridge clients
//! - [`session`]: poll loop detecting track changes
//! - [`pulse`]: pulse driver toggling the lights
//! - [`timer`]: skip-on-miss interval shared by both loops
//! - [`api`]: OAuth callback and health endpoints

use axum::Router;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod models;
pub mod pulse;
pub mod services;
pub mod session;
pub mod timer;

use services::SpotifyClient;

/// Version, commit, build time and profile stamped in by `build.rs`
pub fn build_id() -> String {
    format!(
        "v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    )
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Client that receives the tokens from the callback
    pub spotify: Arc<SpotifyClient>,
    /// Fired once, on the first successful code exchange
    pub on_authorized: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    /// Create new application state
    pub fn new(spotify: Arc<SpotifyClient>, on_authorized: oneshot::Sender<()>) -> Self {
        Self {
            spotify,
            on_authorized: Arc::new(Mutex::new(Some(on_authorized))),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/callback", get(api::handle_callback))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
