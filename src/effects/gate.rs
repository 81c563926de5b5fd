//! Chunk-rate noise gate
//!
//! A five-state envelope machine driven by per-chunk RMS. The envelope
//! ramps in ATTACK/RELEASE at rates derived from the configured attack and
//! release times, holds open for a configurable window after the signal
//! falls below the hysteresis threshold, and scales every sample in the
//! chunk while it is below 1.

use crate::config::GateConfig;

/// Gate state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed,
    Attack,
    Open,
    Hold,
    Release,
}

/// RMS-driven noise gate operating on whole capture chunks.
#[derive(Debug, Clone)]
pub struct NoiseGate {
    state: GateState,
    envelope: f32,
    hold_counter: i64,
    attack_step: f32,
    release_step: f32,
    hold_samples: i64,
    threshold: f32,
    hysteresis: f32,
}

impl NoiseGate {
    pub fn new(config: &GateConfig, sample_rate: u32) -> Self {
        Self {
            state: GateState::Closed,
            envelope: 0.0,
            hold_counter: 0,
            attack_step: 1000.0 / (sample_rate as f32 * config.attack_ms),
            release_step: 1000.0 / (sample_rate as f32 * config.release_ms),
            hold_samples: (sample_rate as f32 * config.hold_ms / 1000.0) as i64,
            threshold: config.threshold_rms,
            hysteresis: config.hysteresis_rms(),
        }
    }

    /// Back to the initial closed state (session start).
    pub fn reset(&mut self) {
        self.state = GateState::Closed;
        self.envelope = 0.0;
        self.hold_counter = 0;
    }

    /// Snap the gate fully open. Called when the gate is disabled so that
    /// re-enabling does not fade in from silence.
    pub fn force_open(&mut self) {
        self.state = GateState::Open;
        self.envelope = 1.0;
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    /// Advance the state machine by one chunk and apply the envelope.
    pub fn process_chunk(&mut self, samples: &mut [i16]) {
        if samples.is_empty() {
            return;
        }
        let n = samples.len();
        let sum_squares: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
        let rms = (sum_squares / n as f64).sqrt() as f32;

        match self.state {
            GateState::Closed => {
                if rms > self.threshold {
                    self.state = GateState::Attack;
                }
            }
            GateState::Attack => {
                self.envelope += self.attack_step * n as f32;
                if self.envelope >= 1.0 {
                    self.envelope = 1.0;
                    self.state = GateState::Open;
                }
            }
            GateState::Open => {
                if rms < self.hysteresis {
                    self.hold_counter = self.hold_samples;
                    self.state = GateState::Hold;
                }
            }
            GateState::Hold => {
                self.hold_counter -= n as i64;
                if self.hold_counter <= 0 {
                    self.state = GateState::Release;
                }
                if rms > self.threshold {
                    self.state = GateState::Open;
                }
            }
            GateState::Release => {
                self.envelope -= self.release_step * n as f32;
                if self.envelope <= 0.0 {
                    self.envelope = 0.0;
                    self.state = GateState::Closed;
                }
                if rms > self.threshold {
                    self.state = GateState::Attack;
                }
            }
        }

        if self.envelope < 1.0 {
            for sample in samples.iter_mut() {
                *sample = (*sample as f32 * self.envelope) as i16;
            }
        }
    }
}
