//! Pulse driver: toggles every reachable light in time with the beat
//!
//! One activation per track. The activation owns its [`PulseState`] and a
//! snapshot of the bridge's lights, ticks on a [`timer::interval`] with the
//! first tick applied immediately, and stops when its cancellation token
//! fires. [`PulseHandle`] is the only way to reach a running activation.

use huertbeat_common::config::{HueAdvance, PulseConfig};
use huertbeat_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{Light, LightStateUpdate};
use crate::services::LightBridge;
use crate::timer;

/// Time between two toggles: `(60 / tempo) * beats_per_pulse`
pub fn pulse_period(tempo: f64, beats_per_pulse: f64) -> Result<Duration> {
    if !(tempo.is_finite() && tempo > 0.0) {
        return Err(Error::InvalidInput(format!(
            "tempo must be a positive number, got {}",
            tempo
        )));
    }
    match Duration::try_from_secs_f64(60.0 / tempo * beats_per_pulse) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(Error::InvalidInput(format!(
            "tempo {} gives no usable pulse period",
            tempo
        ))),
    }
}

/// Degrees to the bridge's 16-bit hue range
pub fn hue_to_bridge(degrees: u16) -> u16 {
    (f64::from(degrees % 360) / 360.0 * 65535.0).round() as u16
}

/// Unit interval to the bridge's 8-bit brightness/saturation range
pub fn unit_to_bridge(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 254.0).round() as u8
}

/// Transition time in deciseconds: `floor(period * 10 * smoothness)`
///
/// Never longer than the period for smoothness within [0, 1].
pub fn transition_deciseconds(period: Duration, smoothness: f64) -> u16 {
    (period.as_secs_f64() * 10.0 * smoothness).floor() as u16
}

/// Alternating on/off state with a rotating hue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseState {
    /// True on the "on" half of the pulse
    pub toggle: bool,
    /// Degrees, 0..360
    pub hue: u16,
}

impl PulseState {
    pub fn new(initial_hue: u16) -> Self {
        Self {
            toggle: true,
            hue: initial_hue % 360,
        }
    }

    /// Light state to send on the current tick
    pub fn update(&self, period: Duration, config: &PulseConfig) -> LightStateUpdate {
        let transition_time = transition_deciseconds(period, config.smoothness);
        if self.toggle {
            LightStateUpdate {
                on: true,
                transition_time,
                hue: Some(hue_to_bridge(self.hue)),
                brightness: Some(unit_to_bridge(config.brightness)),
                saturation: Some(unit_to_bridge(config.saturation)),
            }
        } else {
            LightStateUpdate {
                on: false,
                transition_time,
                hue: None,
                brightness: None,
                saturation: None,
            }
        }
    }

    /// Prepare for the next tick: move the hue, then flip the toggle
    pub fn advance(&mut self, config: &PulseConfig) {
        let moves = match config.hue_advance {
            HueAdvance::Toggle => true,
            HueAdvance::Cycle => self.toggle,
        };
        if moves {
            self.hue = (self.hue + config.hue_increment % 360) % 360;
        }
        self.toggle = !self.toggle;
    }
}

/// Outcome of one light write, tagged with the light it was sent to
type WriteOutcome = (String, String, Result<()>);

/// One pulse activation: the lights snapshot plus the alternating state
///
/// Writes for a tick are spawned onto `in_flight`, one per reachable light,
/// so a slow light never delays the others or the next tick. Dropping the
/// driver aborts writes still in flight.
pub struct PulseDriver {
    bridge: Arc<dyn LightBridge>,
    lights: Vec<Light>,
    state: PulseState,
    period: Duration,
    config: PulseConfig,
    in_flight: JoinSet<WriteOutcome>,
}

impl PulseDriver {
    pub fn new(
        bridge: Arc<dyn LightBridge>,
        lights: Vec<Light>,
        period: Duration,
        config: PulseConfig,
    ) -> Self {
        Self {
            bridge,
            lights,
            state: PulseState::new(config.initial_hue),
            period,
            config,
            in_flight: JoinSet::new(),
        }
    }

    pub fn state(&self) -> PulseState {
        self.state
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Writes issued but not yet completed
    pub fn pending_writes(&self) -> usize {
        self.in_flight.len()
    }

    /// Send the current state to every reachable light, then advance
    ///
    /// Returns the number of writes issued. Must be called from within a
    /// tokio runtime.
    pub fn tick(&mut self) -> usize {
        let update = self.state.update(self.period, &self.config);
        let mut issued = 0;

        for light in self.lights.iter_mut().filter(|l| l.reachable) {
            light.apply(&update);
            let bridge = self.bridge.clone();
            let id = light.id.clone();
            let name = light.name.clone();
            let update = update.clone();
            self.in_flight.spawn(async move {
                let result = bridge.save_light(&id, &update).await;
                (id, name, result)
            });
            issued += 1;
        }

        self.state.advance(&self.config);
        issued
    }

    /// Wait for the next write to complete; `None` when nothing is in flight
    ///
    /// Failed writes are logged and reported as `Some(false)`.
    pub async fn next_write(&mut self) -> Option<bool> {
        let joined = self.in_flight.join_next().await?;
        Some(match joined {
            Ok((_, _, Ok(()))) => true,
            Ok((id, name, Err(e))) => {
                warn!(
                    light_id = %id,
                    status = ?e.status(),
                    "We couldn't update light {}: {}",
                    name,
                    e
                );
                false
            }
            Err(e) => {
                if e.is_panic() {
                    warn!("Light write task panicked: {}", e);
                }
                false
            }
        })
    }

    /// Wait for every in-flight write, returning how many succeeded
    pub async fn flush(&mut self) -> usize {
        let mut written = 0;
        while let Some(ok) = self.next_write().await {
            if ok {
                written += 1;
            }
        }
        written
    }
}

/// Owner of a running pulse activation
///
/// Dropping the handle without calling [`PulseHandle::cancel`] leaves the task
/// running until its parent token is cancelled.
#[derive(Debug)]
pub struct PulseHandle {
    track_id: String,
    period: Duration,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PulseHandle {
    /// Arm a pulse for `track_id`; the first tick is applied immediately
    pub fn spawn(
        track_id: String,
        driver: PulseDriver,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let period = driver.period;
        let mut interval = timer::interval(period)?;
        let token = parent.child_token();
        let task_token = token.clone();
        let task_track = track_id.clone();

        let task = tokio::spawn(async move {
            let mut driver = driver;
            loop {
                let has_writes = driver.pending_writes() > 0;
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {
                        let issued = driver.tick();
                        debug!(track_id = %task_track, issued, "Pulse tick");
                    }
                    Some(_) = driver.next_write(), if has_writes => {}
                }
            }
            debug!(
                track_id = %task_track,
                dropped_writes = driver.pending_writes(),
                "Pulse stopped"
            );
        });

        info!(
            track_id = %track_id,
            period_ms = period.as_millis() as u64,
            "Pulse armed"
        );

        Ok(Self {
            track_id,
            period,
            token,
            task,
        })
    }

    /// Track this pulse was armed for
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the pulse and wait for its task to exit
    ///
    /// In-flight bridge writes of this pulse are dropped.
    pub async fn cancel(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!(track_id = %self.track_id, "Pulse task panicked: {}", e);
            }
        }
        debug!(track_id = %self.track_id, "Pulse cancelled");
    }
}
