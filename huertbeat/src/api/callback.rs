//! OAuth callback endpoint
//!
//! Spotify redirects the operator's browser here with `?code=...` after
//! consent (or `?error=...` on refusal). The code is exchanged for tokens
//! and the main task is told to start polling.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::AppState;

const PLAYING_HTML: &str = include_str!("../ui/playing.html");
const FAILED_HTML: &str = include_str!("../ui/failed.html");

/// Query parameters Spotify appends to the redirect URI
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub error: Option<String>,
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn failure_page(status: StatusCode, message: &str) -> Response {
    let body = FAILED_HTML.replace("{message}", &escape_html(message));
    (status, Html(body)).into_response()
}

/// GET /callback
pub async fn handle_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(reason) = query.error {
        warn!("Spotify authorization refused: {}", reason);
        return failure_page(
            StatusCode::BAD_REQUEST,
            &format!("Spotify refused authorization: {}", reason),
        );
    }

    let Some(code) = query.code else {
        warn!("Callback without authorization code");
        return failure_page(StatusCode::BAD_REQUEST, "No authorization code received.");
    };

    // Held across the exchange so concurrent callbacks are handled one at a time
    let mut pending = state.on_authorized.lock().await;
    if pending.is_none() {
        info!("Callback received after authorization completed, ignoring");
        return Html(PLAYING_HTML).into_response();
    }

    match state.spotify.exchange_code(&code).await {
        Ok(()) => {
            if let Some(tx) = pending.take() {
                if tx.send(()).is_err() {
                    warn!("Authorization completed but nobody is waiting for it");
                }
            }
            info!("✓ Authorized with Spotify");
            Html(PLAYING_HTML).into_response()
        }
        Err(e) => {
            error!(status = ?e.status(), "Uh oh, auth failed: {}", e);
            failure_page(StatusCode::BAD_GATEWAY, &e.to_string())
        }
    }
}
