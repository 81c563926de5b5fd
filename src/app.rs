//! Top-level application context
//!
//! Owns the per-process pieces — device registry, monitor, recorder and the
//! shared effect settings — and wires the device hand-off between them.
//! Hosts construct one of these and drive everything through it.

use crate::capture::{
    CaptureSession, CpalInputFactory, Dispatcher, InlineDispatcher, InputFactory, Recorder,
    RecorderCallback, WavRecorder,
};
use crate::config::{Config, GainBoost, HpfMode, LpfMode, ReductionConfig};
use crate::device::DeviceRegistry;
use crate::effects::EffectSettings;
use crate::error::RecorderError;
use crate::monitor::{AudioMonitor, CpalSinkFactory, SinkFactory};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// The application context: recorder, monitor and registry as owned values
/// rather than process globals.
pub struct RecorderApp {
    config: Config,
    registry: Arc<DeviceRegistry>,
    settings: Arc<EffectSettings>,
    monitor: Arc<AudioMonitor>,
    recorder: Arc<WavRecorder>,
    input_device: Mutex<Option<String>>,
}

impl RecorderApp {
    /// Production wiring: cpal for devices, input and output.
    pub fn new(config: Config) -> Self {
        Self::with_components(
            config,
            Arc::new(DeviceRegistry::with_cpal()),
            Arc::new(CpalInputFactory),
            Box::new(CpalSinkFactory),
            Arc::new(InlineDispatcher),
        )
    }

    /// Wiring with injected components, used by hosts that marshal
    /// callbacks onto a UI thread and by tests.
    pub fn with_components(
        config: Config,
        registry: Arc<DeviceRegistry>,
        input_factory: Arc<dyn InputFactory>,
        sink_factory: Box<dyn SinkFactory>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let settings = Arc::new(EffectSettings::from_config(&config.effects));
        let monitor = Arc::new(AudioMonitor::new(
            sink_factory,
            Arc::clone(&input_factory),
            Some(Arc::clone(&registry)),
            Arc::clone(&settings),
            config.effects.gate,
        ));
        monitor.set_volume(config.monitor.volume);

        let recorder = Arc::new(WavRecorder::new(
            input_factory,
            Arc::clone(&monitor),
            Arc::clone(&settings),
            config.effects.gate,
            dispatcher,
        ));
        recorder.set_noise_reduction_config(config.reduction);
        recorder.set_monitoring_enabled(config.monitor.enabled);

        Self {
            config,
            registry,
            settings,
            monitor,
            recorder,
            input_device: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<AudioMonitor> {
        &self.monitor
    }

    pub fn recorder(&self) -> &Arc<WavRecorder> {
        &self.recorder
    }

    pub fn set_callback(&self, callback: Arc<dyn RecorderCallback>) {
        self.recorder.set_callback(callback);
    }

    /// Select the input device for subsequent sessions (None = built-in).
    pub fn select_input_device(&self, device: Option<String>) {
        *self.input_device.lock().unwrap() = device;
    }

    /// Start recording to `output_path` with the configured format and the
    /// currently selected input device.
    pub fn start_recording(&self, output_path: &Path) -> Result<(), RecorderError> {
        let mut session = CaptureSession::new(output_path, self.config.format)
            .with_gain(self.settings.gain());
        if let Some(device) = self.input_device.lock().unwrap().clone() {
            session = session.with_input_device(device);
        }
        self.recorder.start(session)
    }

    pub fn pause_recording(&self) {
        self.recorder.pause();
    }

    pub fn resume_recording(&self) {
        self.recorder.resume();
    }

    pub fn stop_recording(&self) {
        self.recorder.stop();
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn is_paused(&self) -> bool {
        self.recorder.is_paused()
    }

    /// Toggle live monitoring. During capture the recorder feeds the
    /// monitor; outside capture this starts or stops the standalone loop.
    pub fn set_monitoring_enabled(&self, enabled: bool) {
        self.recorder.set_monitoring_enabled(enabled);
        if !self.recorder.is_recording() {
            if enabled && !self.monitor.is_standalone() {
                let device = self.input_device.lock().unwrap().clone();
                self.monitor.start_standalone(self.config.format, device);
            } else if !enabled && self.monitor.is_standalone() {
                self.monitor.stop_standalone();
            }
        }
    }

    pub fn set_gain_boost_level(&self, gain: GainBoost) {
        self.settings.set_gain(gain);
    }

    pub fn set_hpf_mode(&self, mode: HpfMode) {
        self.settings.set_hpf(mode);
    }

    pub fn set_lpf_mode(&self, mode: LpfMode) {
        self.settings.set_lpf(mode);
    }

    pub fn set_noise_gate_enabled(&self, enabled: bool) {
        self.settings.set_gate_enabled(enabled);
    }

    pub fn set_noise_reduction_enabled(&self, enabled: bool) {
        self.recorder.set_noise_reduction_enabled(enabled);
    }

    pub fn set_noise_reduction_config(&self, config: ReductionConfig) {
        self.recorder.set_noise_reduction_config(config);
    }

    pub fn set_monitor_volume(&self, volume: f32) {
        self.monitor.set_volume(volume);
    }

    /// Whether enabling monitoring now would risk acoustic feedback.
    pub fn has_feedback_risk(&self) -> bool {
        let input = self.input_device.lock().unwrap().clone();
        self.registry.has_feedback_risk(input.as_deref())
    }

    /// Release every owned device.
    pub fn release(&self) {
        self.recorder.stop();
        self.monitor.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::PcmSource;
    use crate::config::AudioFormat;
    use crate::device::{DeviceEnumerator, DeviceInfo};
    use crate::error::DeviceError;
    use crate::monitor::OutputSink;
    use std::thread;
    use std::time::Duration;

    struct EmptyEnumerator;

    impl DeviceEnumerator for EmptyEnumerator {
        fn inputs(&self) -> Vec<DeviceInfo> {
            vec![]
        }
        fn outputs(&self) -> Vec<DeviceInfo> {
            vec![]
        }
    }

    struct SilentSource;

    impl PcmSource for SilentSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecorderError> {
            thread::sleep(Duration::from_millis(2));
            buf.fill(0);
            Ok(buf.len())
        }
        fn buffer_size(&self) -> usize {
            1024
        }
    }

    struct SilentFactory;

    impl InputFactory for SilentFactory {
        fn open(
            &self,
            _device: Option<&str>,
            _format: AudioFormat,
        ) -> Result<Box<dyn PcmSource>, RecorderError> {
            Ok(Box::new(SilentSource))
        }
    }

    struct NullSink;

    impl OutputSink for NullSink {
        fn write(&mut self, samples: &[i16]) -> usize {
            samples.len()
        }
        fn pause(&mut self) {}
        fn resume(&mut self) {}
        fn set_volume(&mut self, _volume: f32) {}
    }

    struct NullSinkFactory;

    impl SinkFactory for NullSinkFactory {
        fn open(
            &self,
            _device: Option<&str>,
            _format: AudioFormat,
        ) -> Result<Box<dyn OutputSink>, DeviceError> {
            Ok(Box::new(NullSink))
        }
    }

    fn app() -> RecorderApp {
        RecorderApp::with_components(
            Config::default(),
            Arc::new(DeviceRegistry::new(Box::new(EmptyEnumerator))),
            Arc::new(SilentFactory),
            Box::new(NullSinkFactory),
            Arc::new(InlineDispatcher),
        )
    }

    #[test]
    fn test_monitoring_toggle_outside_capture_uses_standalone() {
        let app = app();
        assert!(!app.monitor().is_standalone());

        app.set_monitoring_enabled(true);
        assert!(app.monitor().is_standalone());
        assert!(app.monitor().is_monitoring());

        app.set_monitoring_enabled(false);
        assert!(!app.monitor().is_standalone());
        assert!(!app.monitor().is_monitoring());
    }

    #[test]
    fn test_recording_takes_device_from_standalone() {
        let app = app();
        app.set_monitoring_enabled(true);
        assert!(app.monitor().is_standalone());

        let tmp = tempfile::NamedTempFile::new().unwrap();
        app.start_recording(tmp.path()).unwrap();
        // Capture start stops the standalone loop before acquiring.
        assert!(!app.monitor().is_standalone());
        assert!(app.is_recording());
        // Recording-fed monitoring took over.
        assert!(app.monitor().is_monitoring());

        thread::sleep(Duration::from_millis(100));
        app.stop_recording();
        assert!(!app.is_recording());
        // Finalization hands the device back to standalone monitoring.
        assert!(app.monitor().is_standalone());
        app.release();
    }

    #[test]
    fn test_feedback_risk_with_no_outputs() {
        let app = app();
        // No isolated output exists, built-in mic selected: risk.
        assert!(app.has_feedback_risk());
    }

    #[test]
    fn test_effect_setters_reach_shared_settings() {
        let app = app();
        app.set_gain_boost_level(GainBoost::Db12);
        app.set_hpf_mode(HpfMode::Hz80);
        app.set_lpf_mode(LpfMode::Hz15000);
        app.set_noise_gate_enabled(true);
        assert_eq!(app.settings.gain(), GainBoost::Db12);
        assert_eq!(app.settings.hpf(), HpfMode::Hz80);
        assert_eq!(app.settings.lpf(), LpfMode::Hz15000);
        assert!(app.settings.gate_enabled());
    }
}
