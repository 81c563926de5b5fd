//! Configuration types for fieldrec
//!
//! The core is configured programmatically: hosts build these structs and
//! hand them to the recorder. All types derive serde traits so a host can
//! persist settings however it likes; `Config::from_toml_str` parses a TOML
//! document for hosts that store one.

use crate::error::FieldrecError;
use serde::{Deserialize, Serialize};

/// Sample rates the capture engine accepts, in Hz.
pub const SUPPORTED_SAMPLE_RATES: [u32; 6] = [8000, 16000, 22050, 32000, 44100, 48000];

/// Bits per sample. The engine only produces 16-bit integer PCM.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Interval between progress callbacks during recording, in milliseconds.
pub const VISUALIZATION_INTERVAL_MS: u64 = 50;

/// PCM format of a capture session. Immutable once a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Bytes per interleaved frame (one 16-bit sample per channel).
    pub fn block_align(&self) -> u16 {
        self.channels * (BITS_PER_SAMPLE / 8)
    }

    /// Bytes per second of audio.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Check the format against the supported set.
    pub fn validate(&self) -> Result<(), FieldrecError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(FieldrecError::Config(format!(
                "Unsupported sample rate: {} Hz",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(FieldrecError::Config(format!(
                "Unsupported channel count: {} (must be 1 or 2)",
                self.channels
            )));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 1,
        }
    }
}

/// Input gain boost applied before the filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainBoost {
    #[default]
    Off,
    /// +6 dB (2x)
    Db6,
    /// +12 dB (4x)
    Db12,
}

impl GainBoost {
    /// Linear multiplier for this boost level.
    pub fn multiplier(self) -> f32 {
        match self {
            GainBoost::Off => 1.0,
            GainBoost::Db6 => 2.0,
            GainBoost::Db12 => 4.0,
        }
    }
}

/// High-pass filter mode (rumble / handling-noise removal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HpfMode {
    #[default]
    Off,
    Hz80,
    Hz120,
}

impl HpfMode {
    /// Cutoff frequency, or None when the filter is off.
    pub fn cutoff_hz(self) -> Option<f64> {
        match self {
            HpfMode::Off => None,
            HpfMode::Hz80 => Some(80.0),
            HpfMode::Hz120 => Some(120.0),
        }
    }
}

/// Low-pass filter mode (hiss removal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LpfMode {
    #[default]
    Off,
    Hz9500,
    Hz15000,
}

impl LpfMode {
    /// Cutoff frequency, or None when the filter is off.
    pub fn cutoff_hz(self) -> Option<f64> {
        match self {
            LpfMode::Off => None,
            LpfMode::Hz9500 => Some(9500.0),
            LpfMode::Hz15000 => Some(15000.0),
        }
    }
}

fn default_gate_threshold() -> f32 {
    400.0
}

fn default_gate_attack_ms() -> f32 {
    10.0
}

fn default_gate_release_ms() -> f32 {
    500.0
}

fn default_gate_hold_ms() -> f32 {
    300.0
}

/// Noise gate tuning. The hysteresis threshold is derived, not stored:
/// half the open threshold, to suppress chatter near the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Chunk RMS level above which the gate opens.
    #[serde(default = "default_gate_threshold")]
    pub threshold_rms: f32,
    #[serde(default = "default_gate_attack_ms")]
    pub attack_ms: f32,
    #[serde(default = "default_gate_release_ms")]
    pub release_ms: f32,
    #[serde(default = "default_gate_hold_ms")]
    pub hold_ms: f32,
}

impl GateConfig {
    /// Close threshold: the gate holds until RMS falls below this.
    pub fn hysteresis_rms(&self) -> f32 {
        self.threshold_rms * 0.5
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold_rms: default_gate_threshold(),
            attack_ms: default_gate_attack_ms(),
            release_ms: default_gate_release_ms(),
            hold_ms: default_gate_hold_ms(),
        }
    }
}

/// Real-time effect settings applied during capture and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EffectConfig {
    #[serde(default)]
    pub gain: GainBoost,
    #[serde(default)]
    pub hpf: HpfMode,
    #[serde(default)]
    pub lpf: LpfMode,
    #[serde(default)]
    pub gate_enabled: bool,
    #[serde(default)]
    pub gate: GateConfig,
}

fn default_volume() -> f32 {
    1.0
}

/// Live monitoring settings. Output routing preference is fixed policy
/// (Bluetooth, then wired, then speaker) and always excludes the selected
/// input device; see the device registry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Playback volume in [0, 1].
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            volume: default_volume(),
        }
    }
}

fn default_reduction_db() -> f32 {
    12.0
}

fn default_sensitivity() -> f32 {
    6.0
}

fn default_freq_smoothing() -> u32 {
    3
}

fn default_profile_seconds() -> f32 {
    1.0
}

/// Offline spectral noise reduction settings, applied at stop time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReductionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Reduction amount in dB, clamped to [0, 24].
    #[serde(default = "default_reduction_db")]
    pub reduction_db: f32,
    /// How aggressively bins are classified as noise, clamped to [0, 24].
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
    /// Neighboring bands averaged into each gain bin, clamped to [0, 6].
    #[serde(default = "default_freq_smoothing")]
    pub freq_smoothing_bands: u32,
    /// Length of the noise profile window, clamped to [0.5, 5.0] seconds.
    #[serde(default = "default_profile_seconds")]
    pub profile_seconds: f32,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reduction_db: default_reduction_db(),
            sensitivity: default_sensitivity(),
            freq_smoothing_bands: default_freq_smoothing(),
            profile_seconds: default_profile_seconds(),
        }
    }
}

impl ReductionConfig {
    /// Return a copy with every parameter clamped to its valid range.
    pub fn clamped(&self) -> Self {
        Self {
            enabled: self.enabled,
            reduction_db: self.reduction_db.clamp(0.0, 24.0),
            sensitivity: self.sensitivity.clamp(0.0, 24.0),
            freq_smoothing_bands: self.freq_smoothing_bands.min(6),
            profile_seconds: self.profile_seconds.clamp(0.5, 5.0),
        }
    }
}

/// Top-level configuration for the recording core.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub format: AudioFormat,
    #[serde(default)]
    pub effects: EffectConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub reduction: ReductionConfig,
}

impl Config {
    /// Parse a configuration from a TOML document. The library never reads
    /// files or environment variables itself; the host owns persistence.
    pub fn from_toml_str(s: &str) -> Result<Self, FieldrecError> {
        let config: Config =
            toml::from_str(s).map_err(|e| FieldrecError::Config(e.to_string()))?;
        config.format.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_is_valid() {
        let format = AudioFormat::default();
        assert!(format.validate().is_ok());
        assert_eq!(format.block_align(), 2);
        assert_eq!(format.byte_rate(), 88200);
    }

    #[test]
    fn test_stereo_block_align() {
        let format = AudioFormat::new(48000, 2);
        assert!(format.validate().is_ok());
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.byte_rate(), 192000);
    }

    #[test]
    fn test_invalid_sample_rate_rejected() {
        let format = AudioFormat::new(11025, 1);
        assert!(format.validate().is_err());
    }

    #[test]
    fn test_invalid_channel_count_rejected() {
        assert!(AudioFormat::new(44100, 0).validate().is_err());
        assert!(AudioFormat::new(44100, 3).validate().is_err());
    }

    #[test]
    fn test_gain_multipliers() {
        assert_eq!(GainBoost::Off.multiplier(), 1.0);
        assert_eq!(GainBoost::Db6.multiplier(), 2.0);
        assert_eq!(GainBoost::Db12.multiplier(), 4.0);
    }

    #[test]
    fn test_filter_cutoffs() {
        assert_eq!(HpfMode::Off.cutoff_hz(), None);
        assert_eq!(HpfMode::Hz120.cutoff_hz(), Some(120.0));
        assert_eq!(LpfMode::Hz9500.cutoff_hz(), Some(9500.0));
        assert_eq!(LpfMode::Hz15000.cutoff_hz(), Some(15000.0));
    }

    #[test]
    fn test_gate_hysteresis_is_half_threshold() {
        let gate = GateConfig::default();
        assert_eq!(gate.hysteresis_rms(), gate.threshold_rms * 0.5);
    }

    #[test]
    fn test_reduction_clamping() {
        let config = ReductionConfig {
            enabled: true,
            reduction_db: 90.0,
            sensitivity: -3.0,
            freq_smoothing_bands: 20,
            profile_seconds: 0.1,
        };
        let clamped = config.clamped();
        assert_eq!(clamped.reduction_db, 24.0);
        assert_eq!(clamped.sensitivity, 0.0);
        assert_eq!(clamped.freq_smoothing_bands, 6);
        assert_eq!(clamped.profile_seconds, 0.5);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [format]
            sample_rate = 48000
            channels = 2

            [effects]
            gain = "db6"
            hpf = "hz120"
            gate_enabled = true

            [monitor]
            enabled = true
            volume = 0.8

            [reduction]
            enabled = true
            reduction_db = 18.0
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.format.sample_rate, 48000);
        assert_eq!(config.format.channels, 2);
        assert_eq!(config.effects.gain, GainBoost::Db6);
        assert_eq!(config.effects.hpf, HpfMode::Hz120);
        assert!(config.effects.gate_enabled);
        assert!(config.monitor.enabled);
        assert_eq!(config.reduction.reduction_db, 18.0);
    }

    #[test]
    fn test_config_from_toml_rejects_bad_format() {
        let toml = r#"
            [format]
            sample_rate = 12345
            channels = 1
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }
}
