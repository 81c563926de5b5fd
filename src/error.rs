//! Error types for fieldrec
//!
//! Uses thiserror for ergonomic error definitions. Each subsystem has its
//! own error enum; `FieldrecError` is the top-level type hosts usually see.

use thiserror::Error;

/// Top-level error type for the fieldrec library
#[derive(Error, Debug)]
pub enum FieldrecError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("WAV error: {0}")]
    Wav(#[from] WavError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Noise reduction error: {0}")]
    Reduce(#[from] ReduceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the capture engine
#[derive(Error, Debug, Clone)]
pub enum RecorderError {
    /// The output file could not be opened for writing. The caller is
    /// expected to pre-create the file before starting a recording.
    #[error("Cannot open output file: {0}")]
    InvalidOutputFile(String),

    /// The input device could not be acquired at the requested format.
    #[error("Recorder initialization failed: {0}")]
    Init(String),

    /// A read or write failed mid-session. The session transitions to
    /// Stopping and the file is finalized best-effort.
    #[error("Recording failed: {0}")]
    Recording(String),
}

/// Errors related to RIFF/WAVE parsing and writing
#[derive(Error, Debug)]
pub enum WavError {
    /// File shorter than 44 bytes, or RIFF/WAVE magic missing.
    #[error("Malformed WAV header")]
    MalformedHeader,

    /// Anything other than 16-bit integer PCM.
    #[error("Unsupported WAV format: {0} bits per sample (only 16-bit PCM is supported)")]
    UnsupportedFormat(u16),

    #[error("WAV IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to audio device enumeration
#[derive(Error, Debug, Clone)]
pub enum DeviceError {
    #[error("Audio device not found: '{0}'")]
    NotFound(String),

    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Failed to open output device: {0}")]
    Output(String),
}

/// Errors raised by the offline noise reducer
#[derive(Error, Debug)]
pub enum ReduceError {
    /// The noise profile window holds fewer samples than one FFT frame.
    #[error("Noise profile too short: {have} samples, need at least {need}")]
    InsufficientProfile { have: usize, need: usize },

    #[error(transparent)]
    Wav(#[from] WavError),

    #[error(transparent)]
    Fft(#[from] FftError),

    #[error("Noise reduction IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the spectral FFT engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FftError {
    /// FFT length must be a power of two.
    #[error("FFT length must be a power of 2, got {0}")]
    InvalidLength(usize),
}

/// Result type alias using FieldrecError
pub type Result<T> = std::result::Result<T, FieldrecError>;
