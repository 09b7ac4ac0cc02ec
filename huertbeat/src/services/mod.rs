//! Outbound service clients and the traits the session drives them through

use async_trait::async_trait;
use huertbeat_common::Result;

use crate::models::{Light, LightStateUpdate, Playback};

pub mod hue_client;
pub mod spotify_client;

pub use hue_client::HueClient;
pub use spotify_client::SpotifyClient;

/// Source of "what is playing" and tempo information
#[async_trait]
pub trait MusicService: Send + Sync {
    /// Current playback observation
    async fn current_playback(&self) -> Result<Playback>;

    /// Tempo in beats per minute for a track
    async fn track_tempo(&self, track_id: &str) -> Result<f64>;
}

/// Light bridge holding the lights being pulsed
#[async_trait]
pub trait LightBridge: Send + Sync {
    /// Snapshot of every light known to the bridge, reachable or not
    async fn lights(&self) -> Result<Vec<Light>>;

    /// Push a new state for a single light
    async fn save_light(&self, light_id: &str, update: &LightStateUpdate) -> Result<()>;
}
