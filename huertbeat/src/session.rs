//! Poll session: detects track changes and re-arms the pulse
//!
//! [`Session`] owns everything that changes while the service runs: the last
//! playback observation, the single active [`PulseHandle`] and a few
//! counters. Network calls never run under that ownership in [`Session::run`]:
//! each poll tick spawns its own playback fetch, and each track change spawns
//! its own tempo/lights chain. Results come back tagged (a poll sequence
//! number, a change generation plus track id) and are discarded when newer
//! state has already been recorded, so a hung request stalls only its own
//! chain and never the poll ticks.
//!
//! [`Session::poll_once`] runs the same steps inline for one tick.

use huertbeat_common::config::PulseConfig;
use huertbeat_common::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{Light, Playback, Track};
use crate::pulse::{pulse_period, PulseDriver, PulseHandle};
use crate::services::{LightBridge, MusicService};
use crate::timer;

/// Step of a poll tick that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStage {
    /// Asking the music service what is playing
    CurrentTrack,
    /// Fetching or validating the track's tempo
    Analysis,
    /// Fetching lights from the bridge
    Lights,
}

impl fmt::Display for PollStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollStage::CurrentTrack => "current-track",
            PollStage::Analysis => "analysis",
            PollStage::Lights => "lights",
        };
        f.write_str(name)
    }
}

/// Result of one poll tick
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Same observation as last tick, nothing done
    Unchanged,
    /// New track detected and its pulse started
    Armed { track: Track, period: Duration },
    /// Playback stopped, pulse cancelled
    Stopped,
    /// A stage failed; the error has been logged
    Failed { stage: PollStage },
    /// Result belonged to an older poll or an older track change
    Stale,
}

/// Counters over the lifetime of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub polls: u64,
    pub track_changes: u64,
    pub pulses_armed: u64,
    pub pulses_cancelled: u64,
    pub failures: u64,
    /// Results dropped because newer state was already recorded
    pub discarded: u64,
}

/// Everything needed to arm a pulse for one track
#[derive(Debug)]
pub struct Activation {
    pub track: Track,
    pub period: Duration,
    pub lights: Vec<Light>,
}

type ActivationResult = std::result::Result<Activation, (PollStage, Error)>;

/// Fetch tempo, derive the period and snapshot the lights for `track_id`
async fn prepare_activation(
    music: Arc<dyn MusicService>,
    bridge: Arc<dyn LightBridge>,
    beats_per_pulse: f64,
    track_id: String,
) -> ActivationResult {
    let tempo = music
        .track_tempo(&track_id)
        .await
        .map_err(|e| (PollStage::Analysis, e))?;
    let period = pulse_period(tempo, beats_per_pulse).map_err(|e| (PollStage::Analysis, e))?;
    let lights = bridge.lights().await.map_err(|e| (PollStage::Lights, e))?;
    Ok(Activation {
        track: Track { id: track_id, tempo },
        period,
        lights,
    })
}

/// What a playback observation asks the caller to do next
enum Step {
    Done(PollOutcome),
    /// Prepare an activation for this change
    Activate { generation: u64, track_id: String },
}

/// Poll loop state
pub struct Session {
    music: Arc<dyn MusicService>,
    bridge: Arc<dyn LightBridge>,
    config: PulseConfig,
    current: Playback,
    pulse: Option<PulseHandle>,
    shutdown: CancellationToken,
    stats: SessionStats,
    /// Sequence number handed to the most recent poll
    issued_seq: u64,
    /// Sequence number of the newest observation applied
    applied_seq: u64,
    /// Bumped on every recorded change; tags activation chains
    generation: u64,
}

impl Session {
    pub fn new(
        music: Arc<dyn MusicService>,
        bridge: Arc<dyn LightBridge>,
        config: PulseConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            music,
            bridge,
            config,
            current: Playback::Idle,
            pulse: None,
            shutdown,
            stats: SessionStats::default(),
            issued_seq: 0,
            applied_seq: 0,
            generation: 0,
        }
    }

    /// Last playback observation
    pub fn current(&self) -> &Playback {
        &self.current
    }

    /// Track the active pulse belongs to, if one is running
    pub fn active_pulse_track(&self) -> Option<&str> {
        self.pulse.as_ref().map(|p| p.track_id())
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Start a poll: count it and hand out its sequence number
    fn begin_poll(&mut self) -> u64 {
        self.stats.polls += 1;
        self.issued_seq += 1;
        self.issued_seq
    }

    /// Run one poll tick to completion
    pub async fn poll_once(&mut self) -> PollOutcome {
        let seq = self.begin_poll();
        let observed = self.music.current_playback().await;
        match self.observe(seq, observed).await {
            Step::Done(outcome) => outcome,
            Step::Activate {
                generation,
                track_id,
            } => {
                let result = prepare_activation(
                    self.music.clone(),
                    self.bridge.clone(),
                    self.config.beats_per_pulse,
                    track_id.clone(),
                )
                .await;
                self.finish_activation(generation, &track_id, result)
            }
        }
    }

    /// Apply the playback observation of poll `seq`
    async fn observe(&mut self, seq: u64, observed: Result<Playback>) -> Step {
        if seq <= self.applied_seq {
            self.stats.discarded += 1;
            debug!(seq, applied = self.applied_seq, "Dropping late playback response");
            return Step::Done(PollOutcome::Stale);
        }

        let playback = match observed {
            Ok(playback) => playback,
            Err(e) => {
                return Step::Done(self.failed(
                    PollStage::CurrentTrack,
                    "We couldn't connect to the music service",
                    &e,
                ));
            }
        };
        self.applied_seq = seq;

        if playback == self.current {
            return Step::Done(PollOutcome::Unchanged);
        }

        self.stats.track_changes += 1;
        self.generation += 1;
        self.cancel_pulse().await;
        self.current = playback.clone();

        match playback {
            Playback::Idle => {
                info!("Playback stopped, pulse halted");
                Step::Done(PollOutcome::Stopped)
            }
            Playback::Playing { track_id } => {
                info!(track_id = %track_id, "New track detected");
                Step::Activate {
                    generation: self.generation,
                    track_id,
                }
            }
        }
    }

    /// Arm the pulse from a finished activation chain, unless it is stale
    fn finish_activation(
        &mut self,
        generation: u64,
        track_id: &str,
        result: ActivationResult,
    ) -> PollOutcome {
        if generation != self.generation || self.current.track_id() != Some(track_id) {
            self.stats.discarded += 1;
            debug!(track_id, "Dropping activation for a superseded track");
            return PollOutcome::Stale;
        }

        let activation = match result {
            Ok(activation) => activation,
            Err((PollStage::Lights, e)) => {
                return self.failed(PollStage::Lights, "We couldn't connect to the lights", &e)
            }
            Err((stage, e)) => return self.failed(stage, "We couldn't analyze the track", &e),
        };

        let Activation {
            track,
            period,
            lights,
        } = activation;
        let driver = PulseDriver::new(self.bridge.clone(), lights, period, self.config.clone());
        match PulseHandle::spawn(track.id.clone(), driver, &self.shutdown) {
            Ok(handle) => {
                self.pulse = Some(handle);
                self.stats.pulses_armed += 1;
                info!(
                    track_id = %track.id,
                    tempo = track.tempo,
                    period_ms = period.as_millis() as u64,
                    "Pulsing to the beat"
                );
                PollOutcome::Armed { track, period }
            }
            Err(e) => self.failed(PollStage::Analysis, "We couldn't start the pulse", &e),
        }
    }

    fn failed(&mut self, stage: PollStage, context: &str, e: &Error) -> PollOutcome {
        self.stats.failures += 1;
        error!(
            stage = %stage,
            status = ?e.status(),
            "{}: {}",
            context,
            e
        );
        PollOutcome::Failed { stage }
    }

    /// Cancel the active pulse, waiting for its task to exit
    async fn cancel_pulse(&mut self) {
        if let Some(pulse) = self.pulse.take() {
            pulse.cancel().await;
            self.stats.pulses_cancelled += 1;
        }
    }

    /// Poll every `poll_interval` until the shutdown token fires
    ///
    /// Ticks are never held back by outstanding requests: fetches and
    /// activation chains run as their own tasks and report back here.
    pub async fn run(mut self, poll_interval: Duration) -> Result<SessionStats> {
        let mut interval = timer::interval(poll_interval)?;
        let shutdown = self.shutdown.clone();
        let mut fetches: JoinSet<(u64, Result<Playback>)> = JoinSet::new();
        let mut activations: JoinSet<(u64, String, ActivationResult)> = JoinSet::new();

        info!(
            interval_ms = poll_interval.as_millis() as u64,
            "Polling for track changes"
        );

        loop {
            let has_fetches = !fetches.is_empty();
            let has_activations = !activations.is_empty();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = activations.join_next(), if has_activations => {
                    match joined {
                        Ok((generation, track_id, result)) => {
                            let outcome = self.finish_activation(generation, &track_id, result);
                            debug!(?outcome, "Activation finished");
                        }
                        Err(e) if e.is_panic() => warn!("Activation task panicked: {}", e),
                        Err(_) => {}
                    }
                }
                Some(joined) = fetches.join_next(), if has_fetches => {
                    let (seq, observed) = match joined {
                        Ok(fetched) => fetched,
                        Err(e) => {
                            if e.is_panic() {
                                warn!("Playback fetch task panicked: {}", e);
                            }
                            continue;
                        }
                    };
                    match self.observe(seq, observed).await {
                        Step::Done(outcome) => {
                            if outcome == PollOutcome::Stopped {
                                activations.abort_all();
                            }
                            debug!(?outcome, "Poll tick");
                        }
                        Step::Activate { generation, track_id } => {
                            activations.abort_all();
                            let music = self.music.clone();
                            let bridge = self.bridge.clone();
                            let beats = self.config.beats_per_pulse;
                            activations.spawn(async move {
                                let result =
                                    prepare_activation(music, bridge, beats, track_id.clone()).await;
                                (generation, track_id, result)
                            });
                        }
                    }
                }
                _ = interval.tick() => {
                    let seq = self.begin_poll();
                    let music = self.music.clone();
                    fetches.spawn(async move { (seq, music.current_playback().await) });
                }
            }
        }

        fetches.abort_all();
        activations.abort_all();
        self.cancel_pulse().await;
        info!(
            polls = self.stats.polls,
            track_changes = self.stats.track_changes,
            failures = self.stats.failures,
            "Session stopped"
        );
        Ok(self.stats)
    }
}
