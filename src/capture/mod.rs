//! Audio capture module
//!
//! The `Recorder` trait is the capability set hosts program against; the
//! WAV-producing engine lives in `recorder`. Callbacks are delivered
//! through an injectable dispatcher so hosts can marshal them onto a UI
//! thread — the core never knows what a UI thread is.

pub mod recorder;
pub mod source;

pub use recorder::WavRecorder;
pub use source::{CpalInputFactory, InputFactory, PcmSource};

use crate::config::{AudioFormat, GainBoost};
use crate::error::RecorderError;
use std::path::{Path, PathBuf};

/// Parameters of one capture session. The effect and monitoring switches
/// live on the recorder and may change mid-session; these fields are fixed
/// for the session's lifetime.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    /// Destination file. Must already exist and be writable; the caller
    /// pre-creates a zero-length file.
    pub output_path: PathBuf,
    pub format: AudioFormat,
    /// Input device id, or None for the default (built-in) microphone.
    pub input_device: Option<String>,
    pub gain: GainBoost,
}

impl CaptureSession {
    pub fn new(output_path: impl Into<PathBuf>, format: AudioFormat) -> Self {
        Self {
            output_path: output_path.into(),
            format,
            input_device: None,
            gain: GainBoost::Off,
        }
    }

    pub fn with_input_device(mut self, device: impl Into<String>) -> Self {
        self.input_device = Some(device.into());
        self
    }

    pub fn with_gain(mut self, gain: GainBoost) -> Self {
        self.gain = gain;
        self
    }
}

/// Capability set of a recording engine. Kept as a trait so container
/// encoders can be added later without touching callers.
pub trait Recorder: Send + Sync {
    fn start(&self, session: CaptureSession) -> Result<(), RecorderError>;
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    fn is_recording(&self) -> bool;
    fn is_paused(&self) -> bool;
}

/// Recording lifecycle and progress callbacks.
///
/// All methods have empty defaults so hosts implement only what they need.
/// Delivery happens through the recorder's `Dispatcher`.
pub trait RecorderCallback: Send + Sync {
    fn on_start_record(&self, _path: &Path) {}
    fn on_pause_record(&self) {}
    fn on_resume_record(&self) {}
    /// Emitted exactly once per session, after finalization and any noise
    /// reduction have completed.
    fn on_stop_record(&self, _final_path: &Path) {}
    /// Emitted roughly every 50 ms while recording.
    fn on_progress(&self, _duration_ms: u64, _amplitude: u32) {}
    fn on_error(&self, _error: RecorderError) {}

    fn on_noise_reduction_start(&self) {}
    fn on_noise_reduction_progress(&self, _percent: u8) {}
    fn on_noise_reduction_end(&self, _success: bool) {}
}

/// Executor for callback delivery. Hosts inject one that posts to their
/// main/UI dispatcher; the default runs callbacks on the calling thread.
pub trait Dispatcher: Send + Sync {
    fn post(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs callbacks inline on whichever thread emits them.
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn post(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_builder() {
        let session = CaptureSession::new("/tmp/rec.wav", AudioFormat::default())
            .with_input_device("usb-mic")
            .with_gain(GainBoost::Db6);
        assert_eq!(session.output_path, PathBuf::from("/tmp/rec.wav"));
        assert_eq!(session.input_device.as_deref(), Some("usb-mic"));
        assert_eq!(session.gain, GainBoost::Db6);
    }

    #[test]
    fn test_inline_dispatcher_runs_task() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        InlineDispatcher.post(Box::new(move || ran_clone.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }
}
