//! Shared test doubles for huertbeat integration tests
//!
//! - [`FakeMusic`] / [`FakeBridge`]: in-memory implementations of the
//!   service traits that count every call
//! - [`spawn_mock_server`]: serves an axum router on an ephemeral port

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use huertbeat::models::{Light, LightStateUpdate, Playback};
use huertbeat::services::{LightBridge, MusicService};
use huertbeat_common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Music service whose answers are set by the test
#[derive(Default)]
pub struct FakeMusic {
    playback: Mutex<Option<Playback>>,
    tempos: Mutex<HashMap<String, f64>>,
    fail_playback: Mutex<bool>,
    /// Tempo lookups that take this long to answer, by track id
    tempo_delays: Mutex<HashMap<String, Duration>>,
    /// Delay applied to the next playback query only
    next_playback_delay: Mutex<Option<Duration>>,
    pub playback_calls: AtomicUsize,
    /// When each playback query started
    pub playback_times: Mutex<Vec<Instant>>,
    pub tempo_calls: Mutex<Vec<String>>,
}

impl FakeMusic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn play(&self, track_id: &str, tempo: f64) {
        self.tempos
            .lock()
            .unwrap()
            .insert(track_id.to_string(), tempo);
        *self.playback.lock().unwrap() = Some(Playback::Playing {
            track_id: track_id.to_string(),
        });
    }

    /// Playing a track whose tempo lookup fails
    pub fn play_unanalyzable(&self, track_id: &str) {
        self.tempos.lock().unwrap().remove(track_id);
        *self.playback.lock().unwrap() = Some(Playback::Playing {
            track_id: track_id.to_string(),
        });
    }

    pub fn stop(&self) {
        *self.playback.lock().unwrap() = Some(Playback::Idle);
    }

    pub fn set_unreachable(&self, failing: bool) {
        *self.fail_playback.lock().unwrap() = failing;
    }

    /// Make tempo lookups for `track_id` answer after `delay`
    pub fn delay_tempo(&self, track_id: &str, delay: Duration) {
        self.tempo_delays
            .lock()
            .unwrap()
            .insert(track_id.to_string(), delay);
    }

    /// Make the next playback query answer after `delay`, with the playback
    /// current at the time it was asked
    pub fn delay_next_playback(&self, delay: Duration) {
        *self.next_playback_delay.lock().unwrap() = Some(delay);
    }

    /// Milliseconds since `start` of every playback query
    pub fn playback_times_ms(&self, start: Instant) -> Vec<u128> {
        self.playback_times
            .lock()
            .unwrap()
            .iter()
            .map(|at| (*at - start).as_millis())
            .collect()
    }

    pub fn tempo_calls_for(&self, track_id: &str) -> usize {
        self.tempo_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == track_id)
            .count()
    }

    pub fn total_tempo_calls(&self) -> usize {
        self.tempo_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MusicService for FakeMusic {
    async fn current_playback(&self) -> Result<Playback> {
        self.playback_calls.fetch_add(1, Ordering::SeqCst);
        self.playback_times.lock().unwrap().push(Instant::now());
        if *self.fail_playback.lock().unwrap() {
            return Err(Error::Api {
                status: 503,
                message: "Service unavailable".to_string(),
            });
        }
        let playback = self.playback.lock().unwrap().clone().unwrap_or(Playback::Idle);
        let delay = self.next_playback_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(playback)
    }

    async fn track_tempo(&self, track_id: &str) -> Result<f64> {
        self.tempo_calls.lock().unwrap().push(track_id.to_string());
        let delay = self.tempo_delays.lock().unwrap().get(track_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.tempos
            .lock()
            .unwrap()
            .get(track_id)
            .copied()
            .ok_or_else(|| Error::Api {
                status: 404,
                message: "analysis not found".to_string(),
            })
    }
}

/// Bridge that records every write
pub struct FakeBridge {
    lights: Vec<Light>,
    fail_lights: Mutex<bool>,
    pub get_all_calls: AtomicUsize,
    pub writes: Mutex<Vec<(String, LightStateUpdate)>>,
}

impl FakeBridge {
    pub fn new(lights: Vec<Light>) -> Self {
        Self {
            lights,
            fail_lights: Mutex::new(false),
            get_all_calls: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        *self.fail_lights.lock().unwrap() = offline;
    }

    pub fn get_all_count(&self) -> usize {
        self.get_all_calls.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn writes_snapshot(&self) -> Vec<(String, LightStateUpdate)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl LightBridge for FakeBridge {
    async fn lights(&self) -> Result<Vec<Light>> {
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_lights.lock().unwrap() {
            return Err(Error::Bridge("link button not pressed".to_string()));
        }
        Ok(self.lights.clone())
    }

    async fn save_light(&self, light_id: &str, update: &LightStateUpdate) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((light_id.to_string(), update.clone()));
        Ok(())
    }
}

pub fn light(id: &str, reachable: bool) -> Light {
    Light {
        id: id.to_string(),
        name: format!("Light {}", id),
        reachable,
        on: true,
        hue: Some(0),
        brightness: Some(100),
        saturation: Some(100),
        transition_time: None,
    }
}

/// Serve `router` on 127.0.0.1 and return its base URL
pub async fn spawn_mock_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock server");
    let addr = listener.local_addr().expect("Mock server has no address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{}", addr)
}
