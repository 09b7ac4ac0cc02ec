//! Configuration loading: credentials file and runtime tunables
//!
//! Two files feed the service:
//! - **Credentials** (JSON, `.credentials.json`): Hue bridge address and
//!   username, Spotify client id/secret and redirect URI. Required.
//! - **Tunables** (TOML, `huertbeat.toml`): pulse shape, poll cadence, server
//!   port and log level. Optional; a missing file falls back to compiled
//!   defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default credentials file name, resolved relative to the working directory
pub const DEFAULT_CREDENTIALS_FILE: &str = ".credentials.json";

/// Default tunables file name
pub const DEFAULT_CONFIG_FILE: &str = "huertbeat.toml";

// ============================================================================
// Credentials
// ============================================================================

/// Hue bridge connection details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HueCredentials {
    /// Bridge IP address or host name on the local network
    pub host: String,
    /// Registered bridge username (API key)
    pub username: String,
}

/// Spotify application credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Must match the redirect URI registered with the Spotify app
    pub redirect_uri: String,
}

/// Contents of the credentials file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub hue: HueCredentials,
    pub spotify: SpotifyCredentials,
}

impl Credentials {
    /// Parse credentials from JSON text and reject empty values
    pub fn from_json(text: &str) -> Result<Self> {
        let credentials: Credentials = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("Parse credentials failed: {}", e)))?;
        credentials.validate()?;
        Ok(credentials)
    }

    /// Load credentials from a file, failing fast on any problem
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Read credentials file {} failed: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("hue.host", &self.hue.host),
            ("hue.username", &self.hue.username),
            ("spotify.clientId", &self.spotify.client_id),
            ("spotify.clientSecret", &self.spotify.client_secret),
            ("spotify.redirectUri", &self.spotify.redirect_uri),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tunables
// ============================================================================

/// When the pulse hue moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HueAdvance {
    /// Advance after every tick, on and off alike
    #[default]
    Toggle,
    /// Advance only after an "on" tick, once per on/off cycle
    Cycle,
}

/// Pulse shape settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Beats between two light toggles
    pub beats_per_pulse: f64,
    /// Target brightness on "on" ticks, unit interval
    pub brightness: f64,
    /// Target saturation on "on" ticks, unit interval
    pub saturation: f64,
    /// Hue in degrees at the start of every track
    pub initial_hue: u16,
    /// Degrees added to the hue on every advance
    pub hue_increment: u16,
    pub hue_advance: HueAdvance,
    /// Fraction of the period spent transitioning, unit interval
    pub smoothness: f64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            beats_per_pulse: 2.0,
            brightness: 1.0,
            saturation: 1.0,
            initial_hue: 230,
            hue_increment: 53,
            hue_advance: HueAdvance::Toggle,
            smoothness: 0.8,
        }
    }
}

/// Poll loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Time between two "what is playing" queries
    pub interval_ms: u64,
    /// Timeout applied to every outbound request
    pub request_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            request_timeout_secs: 10,
        }
    }
}

/// Callback server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Open the authorization page in the default browser at startup
    pub open_browser: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 1312,
            open_browser: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level applied to huertbeat crates when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Contents of `huertbeat.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub pulse: PulseConfig,
    pub poll: PollConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Parse tunables from TOML text and validate ranges
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load tunables from `path`
    ///
    /// A missing file is not an error: compiled defaults are returned and the
    /// caller decides how loudly to report it. An unreadable or invalid file
    /// is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Check every value against its allowed range
    pub fn validate(&self) -> Result<()> {
        let pulse = &self.pulse;
        if !(pulse.beats_per_pulse.is_finite() && pulse.beats_per_pulse > 0.0) {
            return Err(Error::Config(format!(
                "pulse.beats_per_pulse must be positive, got {}",
                pulse.beats_per_pulse
            )));
        }
        for (name, value) in [
            ("pulse.brightness", pulse.brightness),
            ("pulse.saturation", pulse.saturation),
            ("pulse.smoothness", pulse.smoothness),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if pulse.initial_hue >= 360 {
            return Err(Error::Config(format!(
                "pulse.initial_hue must be below 360, got {}",
                pulse.initial_hue
            )));
        }
        if self.poll.interval_ms == 0 {
            return Err(Error::Config("poll.interval_ms must be positive".to_string()));
        }
        if self.poll.request_timeout_secs == 0 {
            return Err(Error::Config(
                "poll.request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// File resolution
// ============================================================================

/// Resolve the tunables file path
///
/// Priority order:
/// 1. Explicit path (command-line argument or environment variable)
/// 2. `huertbeat.toml` in the working directory
/// 3. `{config_dir}/huertbeat/huertbeat.toml`
/// 4. `huertbeat.toml` in the working directory, even if missing
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }

    if let Some(user_config) = dirs::config_dir().map(|d| d.join("huertbeat").join(DEFAULT_CONFIG_FILE)) {
        if user_config.exists() {
            return user_config;
        }
    }

    local
}
