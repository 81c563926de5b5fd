//! Real-time effect chain
//!
//! The deterministic per-sample pipeline shared by the capture worker and
//! the standalone monitor loop: gain boost → high-pass → low-pass applied
//! per sample, then the noise gate per chunk. Settings live in a shared
//! `EffectSettings` written by the host thread and picked up by the audio
//! thread at the next chunk boundary.

pub mod biquad;
pub mod gate;

pub use biquad::{Biquad, BiquadCoeffs, BUTTERWORTH_Q};
pub use gate::{GateState, NoiseGate};

use crate::config::{EffectConfig, GainBoost, GateConfig, HpfMode, LpfMode};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

fn gain_to_u8(gain: GainBoost) -> u8 {
    match gain {
        GainBoost::Off => 0,
        GainBoost::Db6 => 1,
        GainBoost::Db12 => 2,
    }
}

fn gain_from_u8(value: u8) -> GainBoost {
    match value {
        1 => GainBoost::Db6,
        2 => GainBoost::Db12,
        _ => GainBoost::Off,
    }
}

fn hpf_to_u8(mode: HpfMode) -> u8 {
    match mode {
        HpfMode::Off => 0,
        HpfMode::Hz80 => 1,
        HpfMode::Hz120 => 2,
    }
}

fn hpf_from_u8(value: u8) -> HpfMode {
    match value {
        1 => HpfMode::Hz80,
        2 => HpfMode::Hz120,
        _ => HpfMode::Off,
    }
}

fn lpf_to_u8(mode: LpfMode) -> u8 {
    match mode {
        LpfMode::Off => 0,
        LpfMode::Hz9500 => 1,
        LpfMode::Hz15000 => 2,
    }
}

fn lpf_from_u8(value: u8) -> LpfMode {
    match value {
        1 => LpfMode::Hz9500,
        2 => LpfMode::Hz15000,
        _ => LpfMode::Off,
    }
}

/// Effect switches shared between the host thread and the audio thread.
///
/// Writes are single atomic words with write-once-then-sticky semantics; a
/// change takes effect at the next chunk boundary.
#[derive(Debug, Default)]
pub struct EffectSettings {
    gain: AtomicU8,
    hpf: AtomicU8,
    lpf: AtomicU8,
    gate_enabled: AtomicBool,
}

impl EffectSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EffectConfig) -> Self {
        let settings = Self::new();
        settings.set_gain(config.gain);
        settings.set_hpf(config.hpf);
        settings.set_lpf(config.lpf);
        settings.set_gate_enabled(config.gate_enabled);
        settings
    }

    pub fn set_gain(&self, gain: GainBoost) {
        self.gain.store(gain_to_u8(gain), Ordering::Relaxed);
    }

    pub fn gain(&self) -> GainBoost {
        gain_from_u8(self.gain.load(Ordering::Relaxed))
    }

    pub fn set_hpf(&self, mode: HpfMode) {
        self.hpf.store(hpf_to_u8(mode), Ordering::Relaxed);
    }

    pub fn hpf(&self) -> HpfMode {
        hpf_from_u8(self.hpf.load(Ordering::Relaxed))
    }

    pub fn set_lpf(&self, mode: LpfMode) {
        self.lpf.store(lpf_to_u8(mode), Ordering::Relaxed);
    }

    pub fn lpf(&self) -> LpfMode {
        lpf_from_u8(self.lpf.load(Ordering::Relaxed))
    }

    pub fn set_gate_enabled(&self, enabled: bool) {
        self.gate_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn gate_enabled(&self) -> bool {
        self.gate_enabled.load(Ordering::Relaxed)
    }
}

/// The per-chunk effect pipeline owned by one audio thread.
pub struct EffectChain {
    sample_rate: u32,
    gain: GainBoost,
    hpf_mode: HpfMode,
    lpf_mode: LpfMode,
    hpf: Option<Biquad>,
    lpf: Option<Biquad>,
    gate: NoiseGate,
    gate_enabled: bool,
}

impl EffectChain {
    pub fn new(sample_rate: u32, gate_config: &GateConfig) -> Self {
        Self {
            sample_rate,
            gain: GainBoost::Off,
            hpf_mode: HpfMode::Off,
            lpf_mode: LpfMode::Off,
            hpf: None,
            lpf: None,
            gate: NoiseGate::new(gate_config, sample_rate),
            gate_enabled: false,
        }
    }

    /// Pick up setting changes. Called once per chunk; a filter whose mode
    /// changed is redesigned with fresh state.
    pub fn configure(&mut self, settings: &EffectSettings) {
        self.gain = settings.gain();

        let hpf_mode = settings.hpf();
        if hpf_mode != self.hpf_mode {
            self.hpf_mode = hpf_mode;
            self.hpf = hpf_mode.cutoff_hz().map(|fc| {
                Biquad::new(BiquadCoeffs::high_pass(
                    fc,
                    self.sample_rate as f64,
                    BUTTERWORTH_Q,
                ))
            });
        }

        let lpf_mode = settings.lpf();
        if lpf_mode != self.lpf_mode {
            self.lpf_mode = lpf_mode;
            self.lpf = lpf_mode.cutoff_hz().map(|fc| {
                Biquad::new(BiquadCoeffs::low_pass(
                    fc,
                    self.sample_rate as f64,
                    BUTTERWORTH_Q,
                ))
            });
        }

        let gate_enabled = settings.gate_enabled();
        if self.gate_enabled && !gate_enabled {
            self.gate.force_open();
        }
        self.gate_enabled = gate_enabled;
    }

    /// Clear all filter and gate state (session start).
    pub fn reset(&mut self) {
        if let Some(ref mut hpf) = self.hpf {
            hpf.reset();
        }
        if let Some(ref mut lpf) = self.lpf {
            lpf.reset();
        }
        self.gate.reset();
    }

    /// Run the chain over one chunk of interleaved samples in place.
    ///
    /// Returns the sum of absolute sample values after gain and filtering
    /// (before the gate), which feeds the amplitude visualization.
    pub fn process(&mut self, samples: &mut [i16]) -> u64 {
        let mult = self.gain.multiplier() as i32;
        let mut sum: u64 = 0;

        for sample in samples.iter_mut() {
            let mut value = *sample;

            if mult > 1 {
                let amplified = value as i32 * mult;
                value = amplified.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            }

            if let Some(ref mut hpf) = self.hpf {
                value = hpf.process_sample(value);
            }
            if let Some(ref mut lpf) = self.lpf {
                value = lpf.process_sample(value);
            }

            *sample = value;
            sum += value.unsigned_abs() as u64;
        }

        if self.gate_enabled {
            self.gate.process_chunk(samples);
        }

        sum
    }
}
