//! fieldrec: real-time audio capture core for a field-recording app
//!
//! This library provides the capture and processing engine a recording UI
//! sits on top of:
//! - Capturing 16-bit PCM from a selected input device (cpal)
//! - A deterministic per-sample effect chain: gain boost, Butterworth
//!   high-pass/low-pass biquads, RMS-driven noise gate
//! - Streaming the result into a canonical 44-byte RIFF/WAVE file
//! - Live monitoring through an output device, during capture and
//!   standalone, with glitch-free hand-off of the shared input device
//! - Offline FFT-based spectral noise reduction over the finished file
//!
//! # Architecture
//!
//! ```text
//!  input device ──▶ capture worker ──▶ [gain → HPF → LPF → gate] ──┬──▶ WAV writer
//!                                                                  └──▶ monitor sink
//!  on stop: tail trim → header finalize → noise reducer (optional, in place)
//! ```
//!
//! The capture worker is the single owner of the exclusive input device.
//! Outside capture, the standalone monitor loop owns it instead and runs
//! the same effect chain into the monitor sink.

pub mod app;
pub mod capture;
pub mod config;
pub mod device;
pub mod effects;
pub mod error;
pub mod monitor;
pub mod reduce;
pub mod state;
pub mod wav;

pub use app::RecorderApp;
pub use capture::{
    CaptureSession, Dispatcher, InlineDispatcher, Recorder, RecorderCallback, WavRecorder,
};
pub use config::{AudioFormat, Config, GainBoost, HpfMode, LpfMode, ReductionConfig};
pub use device::{DeviceInfo, DeviceKind, DeviceObserver, DeviceRegistry};
pub use error::{FieldrecError, RecorderError, Result};
pub use monitor::AudioMonitor;
pub use state::CaptureState;
