//! Domain types shared by the clients, the pulse driver and the session

use serde::{Deserialize, Serialize};

/// A track and its tempo, fetched fresh on every detected change
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    /// Beats per minute
    pub tempo: f64,
}

/// What the player is doing right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playback {
    /// A track with a known identifier is playing
    Playing { track_id: String },
    /// Nothing playing, paused, or an item without a track identifier
    Idle,
}

impl Playback {
    pub fn track_id(&self) -> Option<&str> {
        match self {
            Playback::Playing { track_id } => Some(track_id),
            Playback::Idle => None,
        }
    }
}

/// Snapshot of one light as reported by the bridge
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub id: String,
    pub name: String,
    pub reachable: bool,
    pub on: bool,
    /// 16-bit hue, absent for lights without color support
    pub hue: Option<u16>,
    pub brightness: Option<u8>,
    pub saturation: Option<u8>,
    /// Seconds, as last sent by this process
    pub transition_time: Option<f64>,
}

impl Light {
    /// Fold an outgoing state update into the local copy
    pub fn apply(&mut self, update: &LightStateUpdate) {
        self.on = update.on;
        self.transition_time = Some(f64::from(update.transition_time) / 10.0);
        if let Some(hue) = update.hue {
            self.hue = Some(hue);
        }
        if let Some(bri) = update.brightness {
            self.brightness = Some(bri);
        }
        if let Some(sat) = update.saturation {
            self.saturation = Some(sat);
        }
    }
}

/// Partial light state sent to the bridge for one light on one pulse tick
///
/// Field names follow the bridge's wire format. Color fields are omitted
/// from the body when `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightStateUpdate {
    pub on: bool,
    /// Deciseconds
    #[serde(rename = "transitiontime")]
    pub transition_time: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(rename = "bri", skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(rename = "sat", skip_serializing_if = "Option::is_none")]
    pub saturation: Option<u8>,
}

impl LightStateUpdate {
    /// True when the update carries any color field
    pub fn has_color(&self) -> bool {
        self.hue.is_some() || self.brightness.is_some() || self.saturation.is_some()
    }
}
