//! Philips Hue bridge client
//!
//! Talks to the bridge's local REST API at `http://{host}/api/{username}`.
//! The bridge answers most failures with HTTP 200 and a JSON array of
//! `{"error": {...}}` entries, so every body is checked for error entries.

use async_trait::async_trait;
use huertbeat_common::config::HueCredentials;
use huertbeat_common::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use super::LightBridge;
use crate::models::{Light, LightStateUpdate};

/// Light entry in `GET /lights`
#[derive(Debug, Clone, Deserialize)]
struct BridgeLight {
    #[serde(default)]
    name: String,
    state: BridgeLightState,
}

#[derive(Debug, Clone, Deserialize)]
struct BridgeLightState {
    #[serde(default)]
    on: bool,
    #[serde(default)]
    bri: Option<u8>,
    #[serde(default)]
    hue: Option<u16>,
    #[serde(default)]
    sat: Option<u8>,
    #[serde(default)]
    reachable: bool,
}

/// Error entry body: `{"type": 1, "address": "/lights", "description": "unauthorized user"}`
#[derive(Debug, Clone, Deserialize)]
struct BridgeErrorDetail {
    #[serde(rename = "type")]
    kind: u32,
    #[serde(default)]
    address: String,
    description: String,
}

/// Return the first error entry in a bridge response, if any
fn check_bridge_errors(body: &Value) -> Result<()> {
    let Some(entries) = body.as_array() else {
        return Ok(());
    };
    for entry in entries {
        if let Some(error) = entry.get("error") {
            let detail: BridgeErrorDetail = serde_json::from_value(error.clone())
                .map_err(|e| Error::Bridge(format!("Malformed error entry: {}", e)))?;
            return Err(Error::Bridge(format!(
                "{} (type {}, {})",
                detail.description, detail.kind, detail.address
            )));
        }
    }
    Ok(())
}

/// Parse a `GET /lights` body into lights ordered by numeric id
fn parse_lights(body: Value) -> Result<Vec<Light>> {
    check_bridge_errors(&body)?;

    let raw: BTreeMap<String, BridgeLight> = serde_json::from_value(body)
        .map_err(|e| Error::Bridge(format!("Unexpected lights body: {}", e)))?;

    let mut lights: Vec<Light> = raw
        .into_iter()
        .map(|(id, light)| Light {
            id,
            name: light.name,
            reachable: light.state.reachable,
            on: light.state.on,
            hue: light.state.hue,
            brightness: light.state.bri,
            saturation: light.state.sat,
            transition_time: None,
        })
        .collect();
    lights.sort_by(|a, b| (a.id.len(), &a.id).cmp(&(b.id.len(), &b.id)));
    Ok(lights)
}

/// Hue bridge client
pub struct HueClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HueClient {
    pub fn new(credentials: &HueCredentials, timeout: Duration) -> Result<Self> {
        let base_url = format!("http://{}/api/{}", credentials.host, credentials.username);
        Self::with_base_url(base_url, timeout)
    }

    /// Client against an explicit `.../api/{username}` base URL
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into(),
        })
    }

    async fn read_body(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl LightBridge for HueClient {
    async fn lights(&self) -> Result<Vec<Light>> {
        let response = self
            .http_client
            .get(format!("{}/lights", self.base_url))
            .send()
            .await?;
        let lights = parse_lights(Self::read_body(response).await?)?;

        tracing::debug!(
            total = lights.len(),
            reachable = lights.iter().filter(|l| l.reachable).count(),
            "Fetched lights from bridge"
        );
        Ok(lights)
    }

    async fn save_light(&self, light_id: &str, update: &LightStateUpdate) -> Result<()> {
        let response = self
            .http_client
            .put(format!("{}/lights/{}/state", self.base_url, light_id))
            .json(update)
            .send()
            .await?;
        check_bridge_errors(&Self::read_body(response).await?)
    }
}
