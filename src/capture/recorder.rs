//! WAV capture engine
//!
//! Owns one input device, the effect chain and the WAV file for the
//! lifetime of a session. The capture worker is a dedicated thread that
//! pulls chunks, runs gain → HPF → LPF → gate, fans post-effect PCM to the
//! monitor and appends it to the file. Pause, resume and stop are
//! cooperative: flags are checked at chunk boundaries, never mid-chunk.
//!
//! The worker is also the single owner of the exclusive input device: it
//! releases the device on pause (handing the monitor over to standalone
//! mode) and re-acquires it on resume, which makes overlapping acquisition
//! impossible by construction.

use super::source::{InputFactory, PcmSource};
use super::{CaptureSession, Dispatcher, Recorder, RecorderCallback};
use crate::config::{AudioFormat, GateConfig, ReductionConfig, VISUALIZATION_INTERVAL_MS};
use crate::effects::{EffectChain, EffectSettings};
use crate::error::RecorderError;
use crate::monitor::AudioMonitor;
use crate::reduce;
use crate::state::CaptureState;
use crate::wav::{self, WavWriter};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Bound on waiting for the worker to drain at stop.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

struct RecorderShared {
    state: Mutex<CaptureState>,
    running: AtomicBool,
    paused: AtomicBool,
    monitoring_enabled: AtomicBool,
    duration_ms: AtomicU64,
    last_amplitude: AtomicU32,
    finalized: AtomicBool,
    callback: Mutex<Option<Arc<dyn RecorderCallback>>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl RecorderShared {
    fn set_state(&self, state: CaptureState) {
        *self.state.lock().unwrap() = state;
    }

    fn emit(&self, f: impl FnOnce(Arc<dyn RecorderCallback>) + Send + 'static) {
        if let Some(callback) = self.callback.lock().unwrap().clone() {
            self.dispatcher.post(Box::new(move || f(callback)));
        }
    }
}

/// The 16-bit PCM WAV recorder.
pub struct WavRecorder {
    shared: Arc<RecorderShared>,
    input_factory: Arc<dyn InputFactory>,
    monitor: Arc<AudioMonitor>,
    settings: Arc<EffectSettings>,
    gate_config: GateConfig,
    reduction: Mutex<ReductionConfig>,
    session: Mutex<Option<CaptureSession>>,
    worker: Mutex<Option<(JoinHandle<()>, Receiver<()>)>>,
}

impl WavRecorder {
    pub fn new(
        input_factory: Arc<dyn InputFactory>,
        monitor: Arc<AudioMonitor>,
        settings: Arc<EffectSettings>,
        gate_config: GateConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            shared: Arc::new(RecorderShared {
                state: Mutex::new(CaptureState::Idle),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                monitoring_enabled: AtomicBool::new(false),
                duration_ms: AtomicU64::new(0),
                last_amplitude: AtomicU32::new(0),
                finalized: AtomicBool::new(false),
                callback: Mutex::new(None),
                dispatcher,
            }),
            input_factory,
            monitor,
            settings,
            gate_config,
            reduction: Mutex::new(ReductionConfig::default()),
            session: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn set_callback(&self, callback: Arc<dyn RecorderCallback>) {
        *self.shared.callback.lock().unwrap() = Some(callback);
    }

    pub fn state(&self) -> CaptureState {
        *self.shared.state.lock().unwrap()
    }

    /// Accumulated recording duration. Advances only at progress-callback
    /// boundaries so pause/resume cannot double-count.
    pub fn duration_ms(&self) -> u64 {
        self.shared.duration_ms.load(Ordering::Relaxed)
    }

    pub fn set_monitoring_enabled(&self, enabled: bool) {
        self.shared
            .monitoring_enabled
            .store(enabled, Ordering::Relaxed);
        let recording = self.is_recording();
        let paused = self.is_paused();
        if enabled && recording && !paused && !self.monitor.is_monitoring() {
            if let Some(session) = self.session.lock().unwrap().as_ref() {
                self.monitor.set_input_device(session.input_device.clone());
                self.monitor.initialize(session.format);
                self.monitor.start();
            }
        } else if !enabled && self.monitor.is_monitoring() && !self.monitor.is_standalone() {
            self.monitor.stop();
        }
    }

    pub fn is_monitoring_enabled(&self) -> bool {
        self.shared.monitoring_enabled.load(Ordering::Relaxed)
    }

    pub fn set_gain_boost_level(&self, gain: crate::config::GainBoost) {
        self.settings.set_gain(gain);
    }

    pub fn set_hpf_mode(&self, mode: crate::config::HpfMode) {
        self.settings.set_hpf(mode);
    }

    pub fn set_lpf_mode(&self, mode: crate::config::LpfMode) {
        self.settings.set_lpf(mode);
    }

    pub fn set_noise_gate_enabled(&self, enabled: bool) {
        self.settings.set_gate_enabled(enabled);
    }

    pub fn set_noise_reduction_enabled(&self, enabled: bool) {
        self.reduction.lock().unwrap().enabled = enabled;
    }

    pub fn set_noise_reduction_config(&self, config: ReductionConfig) {
        *self.reduction.lock().unwrap() = config;
    }

    /// Finalize the file directly. Used when the worker fails to drain
    /// within the stop timeout.
    fn finalize_file(&self, path: &Path, format: AudioFormat) {
        if self.shared.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = wav::trim_tail(path, format) {
            tracing::error!("Tail trim failed: {}", e);
        }
        if let Err(e) = wav::finalize_header(path, format) {
            tracing::error!("Header finalize failed: {}", e);
        }
    }
}

impl Recorder for WavRecorder {
    fn start(&self, session: CaptureSession) -> Result<(), RecorderError> {
        if !self.state().is_idle() {
            return Err(RecorderError::Init(format!(
                "recorder is not idle (state: {})",
                self.state()
            )));
        }
        session
            .format
            .validate()
            .map_err(|e| RecorderError::Init(e.to_string()))?;
        if !session.output_path.is_file() {
            return Err(RecorderError::InvalidOutputFile(
                session.output_path.display().to_string(),
            ));
        }

        // The input device is exclusive: take it back from standalone
        // monitoring before opening it for capture.
        if self.monitor.is_standalone() {
            self.monitor.stop_standalone();
        }

        self.settings.set_gain(session.gain);

        let source = self
            .input_factory
            .open(session.input_device.as_deref(), session.format)?;

        let writer = WavWriter::create(&session.output_path, session.format)
            .map_err(|e| RecorderError::InvalidOutputFile(e.to_string()))?;

        self.shared.duration_ms.store(0, Ordering::Relaxed);
        self.shared.last_amplitude.store(0, Ordering::Relaxed);
        self.shared.finalized.store(false, Ordering::Relaxed);
        self.shared.paused.store(false, Ordering::Relaxed);
        self.shared.running.store(true, Ordering::Relaxed);
        self.shared.set_state(CaptureState::Running);
        *self.session.lock().unwrap() = Some(session.clone());

        self.monitor.set_input_device(session.input_device.clone());
        if self.shared.monitoring_enabled.load(Ordering::Relaxed) {
            self.monitor.initialize(session.format);
            self.monitor.start();
        }

        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let monitor = Arc::clone(&self.monitor);
        let settings = Arc::clone(&self.settings);
        let input_factory = Arc::clone(&self.input_factory);
        let gate_config = self.gate_config;
        let worker_session = session.clone();
        let handle = thread::spawn(move || {
            run_capture_loop(
                shared,
                monitor,
                settings,
                input_factory,
                gate_config,
                worker_session,
                source,
                writer,
            );
            let _ = done_tx.send(());
        });
        *self.worker.lock().unwrap() = Some((handle, done_rx));

        tracing::info!(
            "Recording started: {:?} ({} Hz, {} ch)",
            session.output_path,
            session.format.sample_rate,
            session.format.channels
        );
        let path = session.output_path.clone();
        self.shared.emit(move |cb| cb.on_start_record(&path));
        Ok(())
    }

    fn pause(&self) {
        if self.is_recording() && !self.is_paused() {
            self.shared.paused.store(true, Ordering::Relaxed);
            self.shared.set_state(CaptureState::Paused);
            tracing::info!("Recording paused");
            self.shared.emit(|cb| cb.on_pause_record());
        }
    }

    fn resume(&self) {
        if self.is_recording() && self.is_paused() {
            self.shared.paused.store(false, Ordering::Relaxed);
            self.shared.set_state(CaptureState::Running);
            tracing::info!("Recording resumed");
            self.shared.emit(|cb| cb.on_resume_record());
        }
    }

    fn stop(&self) {
        let Some(session) = self.session.lock().unwrap().take() else {
            return; // idempotent: nothing running
        };
        self.shared.set_state(CaptureState::Stopping);
        self.shared.paused.store(false, Ordering::Relaxed);
        self.shared.running.store(false, Ordering::Relaxed);

        if let Some((handle, done_rx)) = self.worker.lock().unwrap().take() {
            match done_rx.recv_timeout(STOP_JOIN_TIMEOUT) {
                Ok(()) => {
                    let _ = handle.join();
                }
                Err(_) => {
                    // Worker stuck in a device call: finalize without it.
                    tracing::warn!("Capture worker did not drain in time, finalizing anyway");
                    self.finalize_file(&session.output_path, session.format);
                }
            }
        }
        self.shared.set_state(CaptureState::Finalizing);

        // Recording-fed monitoring is over; hand the device to standalone
        // mode so the user keeps hearing audio.
        if self.monitor.is_monitoring() && !self.monitor.is_standalone() {
            self.monitor.stop();
        }
        if self.shared.monitoring_enabled.load(Ordering::Relaxed) && !self.monitor.is_monitoring()
        {
            self.monitor
                .start_standalone(session.format, session.input_device.clone());
        }

        let reduction = self.reduction.lock().unwrap().clamped();
        let shared = Arc::clone(&self.shared);
        let path = session.output_path.clone();
        if reduction.enabled {
            tracing::debug!("Starting noise reduction on {:?}", path);
            shared.emit(|cb| cb.on_noise_reduction_start());
            thread::spawn(move || {
                let progress_shared = Arc::clone(&shared);
                let success = reduce::process(&path, &reduction, move |percent| {
                    progress_shared.emit(move |cb| cb.on_noise_reduction_progress(percent));
                });
                tracing::debug!(
                    "Noise reduction {} for {:?}",
                    if success { "completed" } else { "failed" },
                    path
                );
                shared.emit(move |cb| cb.on_noise_reduction_end(success));
                shared.set_state(CaptureState::Idle);
                shared.emit(move |cb| cb.on_stop_record(&path));
            });
        } else {
            shared.set_state(CaptureState::Idle);
            shared.emit(move |cb| cb.on_stop_record(&path));
        }
        tracing::info!("Recording stopped");
    }

    fn is_recording(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }
}

/// The capture worker. Single owner of the input device while recording;
/// exits when `running` clears, then finalizes the WAV file.
#[allow(clippy::too_many_arguments)]
fn run_capture_loop(
    shared: Arc<RecorderShared>,
    monitor: Arc<AudioMonitor>,
    settings: Arc<EffectSettings>,
    input_factory: Arc<dyn InputFactory>,
    gate_config: GateConfig,
    session: CaptureSession,
    source: Box<dyn PcmSource>,
    mut writer: WavWriter,
) {
    let format = session.format;
    let mut chain = EffectChain::new(format.sample_rate, &gate_config);
    chain.configure(&settings);
    chain.reset();

    let mut source = Some(source);
    let buffer_size = source.as_ref().map(|s| s.buffer_size()).unwrap_or(4096);
    let mut data = vec![0u8; buffer_size];
    let mut samples: Vec<i16> = Vec::with_capacity(buffer_size / 2);
    let mut tick = Instant::now();

    while shared.running.load(Ordering::Relaxed) {
        if shared.paused.load(Ordering::Relaxed) {
            // Release the device so standalone monitoring can take it.
            if source.take().is_some() {
                tracing::debug!("Input device released for pause");
                if shared.monitoring_enabled.load(Ordering::Relaxed) {
                    if monitor.is_monitoring() {
                        monitor.stop();
                    }
                    monitor.start_standalone(format, session.input_device.clone());
                }
            }
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        if source.is_none() {
            // Resuming: standalone monitoring must give the device back
            // before we reopen it.
            if monitor.is_standalone() {
                monitor.stop_standalone();
            }
            match input_factory.open(session.input_device.as_deref(), format) {
                Ok(reopened) => {
                    source = Some(reopened);
                    if shared.monitoring_enabled.load(Ordering::Relaxed) {
                        monitor.initialize(format);
                        monitor.start();
                    }
                    tick = Instant::now();
                }
                Err(e) => {
                    tracing::error!("Failed to re-acquire input device: {}", e);
                    shared.running.store(false, Ordering::Relaxed);
                    shared.set_state(CaptureState::Stopping);
                    let error = RecorderError::Recording(e.to_string());
                    shared.emit(move |cb| cb.on_error(error));
                }
            }
            continue;
        }

        let read = source.as_mut().unwrap().read(&mut data);
        match read {
            Ok(0) => {
                emit_progress(&shared, &mut tick);
            }
            Ok(n) => {
                // Whole 16-bit samples only.
                let n = n & !1;
                if n == 0 {
                    continue;
                }
                samples.clear();
                samples.extend(
                    data[..n]
                        .chunks_exact(2)
                        .map(|b| i16::from_le_bytes([b[0], b[1]])),
                );

                chain.configure(&settings);
                let sum = chain.process(&mut samples);
                let amplitude = (sum / std::cmp::max(1, (n / 16) as u64)) as u32;
                shared.last_amplitude.store(amplitude, Ordering::Relaxed);

                // The monitor gets its own copy after all effects, so what
                // the user hears is what lands in the file.
                if shared.monitoring_enabled.load(Ordering::Relaxed) && monitor.is_monitoring() {
                    monitor.feed(&samples);
                }

                for (i, sample) in samples.iter().enumerate() {
                    data[i * 2..i * 2 + 2].copy_from_slice(&sample.to_le_bytes());
                }
                if let Err(e) = writer.write_chunk(&data[..n]) {
                    tracing::error!("WAV write failed: {}", e);
                    shared.running.store(false, Ordering::Relaxed);
                    shared.set_state(CaptureState::Stopping);
                    let error = RecorderError::Recording(e.to_string());
                    shared.emit(move |cb| cb.on_error(error));
                    break;
                }

                emit_progress(&shared, &mut tick);
            }
            Err(e) => {
                // Device gone (hot-unplug) or stream failure.
                tracing::error!("Capture read failed: {}", e);
                shared.running.store(false, Ordering::Relaxed);
                shared.set_state(CaptureState::Stopping);
                shared.emit(move |cb| cb.on_error(e));
                break;
            }
        }
    }

    drop(source);

    if !shared.finalized.swap(true, Ordering::SeqCst) {
        if let Err(e) = writer.finalize() {
            tracing::error!("WAV finalize failed: {}", e);
        }
    }
    tracing::debug!("Capture worker exited");
}

/// Advance duration and emit a progress callback once per interval.
/// Duration is advanced here and only here.
fn emit_progress(shared: &Arc<RecorderShared>, tick: &mut Instant) {
    let elapsed = tick.elapsed();
    if elapsed.as_millis() as u64 >= VISUALIZATION_INTERVAL_MS {
        *tick = Instant::now();
        let total = shared
            .duration_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed)
            + elapsed.as_millis() as u64;
        let amplitude = shared.last_amplitude.load(Ordering::Relaxed);
        shared.emit(move |cb| cb.on_progress(total, amplitude));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::source::PcmSource;
    use crate::capture::InlineDispatcher;
    use crate::monitor::{OutputSink, SinkFactory};
    use crate::wav;
    use std::sync::atomic::AtomicUsize;
    use tempfile::NamedTempFile;

    /// Source producing constant-value chunks with light pacing.
    struct TestSource {
        value: i16,
        chunk_bytes: usize,
        live: Arc<AtomicUsize>,
    }

    impl PcmSource for TestSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecorderError> {
            thread::sleep(Duration::from_millis(2));
            let n = buf.len().min(self.chunk_bytes);
            for pair in buf[..n].chunks_exact_mut(2) {
                pair.copy_from_slice(&self.value.to_le_bytes());
            }
            Ok(n)
        }

        fn buffer_size(&self) -> usize {
            self.chunk_bytes
        }
    }

    impl Drop for TestSource {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct TestFactory {
        value: i16,
        live: Arc<AtomicUsize>,
        total_opens: Arc<AtomicUsize>,
    }

    impl InputFactory for TestFactory {
        fn open(
            &self,
            _device: Option<&str>,
            _format: AudioFormat,
        ) -> Result<Box<dyn PcmSource>, RecorderError> {
            let live = self.live.fetch_add(1, Ordering::SeqCst);
            assert_eq!(live, 0, "input device double-acquired");
            self.total_opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TestSource {
                value: self.value,
                chunk_bytes: 2048,
                live: Arc::clone(&self.live),
            }))
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
        ) -> Result<Box<dyn OutputSink>, crate::error::DeviceError> {
            Ok(Box::new(NullSink))
        }
    }

    #[derive(Default)]
    struct EventLog {
        events: Mutex<Vec<String>>,
    }

    impl RecorderCallback for EventLog {
        fn on_start_record(&self, _path: &std::path::Path) {
            self.events.lock().unwrap().push("start".to_string());
        }
        fn on_pause_record(&self) {
            self.events.lock().unwrap().push("pause".to_string());
        }
        fn on_resume_record(&self) {
            self.events.lock().unwrap().push("resume".to_string());
        }
        fn on_stop_record(&self, _final_path: &std::path::Path) {
            self.events.lock().unwrap().push("stop".to_string());
        }
        fn on_error(&self, _error: RecorderError) {
            self.events.lock().unwrap().push("error".to_string());
        }
    }

    fn build_recorder(value: i16) -> (WavRecorder, Arc<EventLog>, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let factory: Arc<dyn InputFactory> = Arc::new(TestFactory {
            value,
            live: Arc::clone(&live),
            total_opens: Arc::clone(&total),
        });
        let settings = Arc::new(EffectSettings::new());
        let monitor = Arc::new(AudioMonitor::new(
            Box::new(NullSinkFactory),
            Arc::clone(&factory),
            None,
            Arc::clone(&settings),
            GateConfig::default(),
        ));
        let recorder = WavRecorder::new(
            factory,
            monitor,
            settings,
            GateConfig::default(),
            Arc::new(InlineDispatcher),
        );
        let log = Arc::new(EventLog::default());
        recorder.set_callback(Arc::clone(&log) as Arc<dyn RecorderCallback>);
        (recorder, log, total)
    }

    #[test]
    fn test_start_requires_existing_file() {
        let (recorder, _, _) = build_recorder(0);
        let session = CaptureSession::new("/nonexistent/dir/rec.wav", AudioFormat::default());
        let err = recorder.start(session).unwrap_err();
        assert!(matches!(err, RecorderError::InvalidOutputFile(_)));
        assert!(recorder.state().is_idle());
    }

    #[test]
    fn test_start_rejects_bad_format() {
        let (recorder, _, _) = build_recorder(0);
        let tmp = NamedTempFile::new().unwrap();
        let session = CaptureSession::new(tmp.path(), AudioFormat::new(12345, 1));
        let err = recorder.start(session).unwrap_err();
        assert!(matches!(err, RecorderError::Init(_)));
    }

    #[test]
    fn test_record_produces_valid_wav() {
        let (recorder, log, _) = build_recorder(100);
        let tmp = NamedTempFile::new().unwrap();
        let session = CaptureSession::new(tmp.path(), AudioFormat::new(44100, 1));

        recorder.start(session).unwrap();
        assert!(recorder.is_recording());
        assert!(recorder.state().is_running());

        thread::sleep(Duration::from_millis(300));
        recorder.stop();

        assert!(!recorder.is_recording());
        assert!(recorder.state().is_idle());

        let spec = wav::read_spec(tmp.path()).unwrap();
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.data_size % spec.block_align(), 0);

        let events = log.events.lock().unwrap().clone();
        assert_eq!(events.iter().filter(|e| *e == "start").count(), 1);
        assert_eq!(events.iter().filter(|e| *e == "stop").count(), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (recorder, log, _) = build_recorder(0);
        recorder.stop();
        recorder.stop();
        assert!(log.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_start_while_running_fails() {
        let (recorder, _, _) = build_recorder(0);
        let tmp = NamedTempFile::new().unwrap();
        recorder
            .start(CaptureSession::new(tmp.path(), AudioFormat::default()))
            .unwrap();

        let tmp2 = NamedTempFile::new().unwrap();
        let err = recorder
            .start(CaptureSession::new(tmp2.path(), AudioFormat::default()))
            .unwrap_err();
        assert!(matches!(err, RecorderError::Init(_)));
        recorder.stop();
    }

    #[test]
    fn test_pause_releases_device_resume_reacquires() {
        let (recorder, log, total_opens) = build_recorder(50);
        let tmp = NamedTempFile::new().unwrap();
        recorder
            .start(CaptureSession::new(tmp.path(), AudioFormat::default()))
            .unwrap();
        thread::sleep(Duration::from_millis(100));

        recorder.pause();
        assert!(recorder.is_paused());
        assert!(recorder.state().is_paused());
        // Worker drops the source at the next chunk boundary.
        thread::sleep(Duration::from_millis(100));
        let opens_at_pause = total_opens.load(Ordering::SeqCst);

        recorder.resume();
        assert!(!recorder.is_paused());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(total_opens.load(Ordering::SeqCst), opens_at_pause + 1);

        recorder.stop();
        let events = log.events.lock().unwrap().clone();
        assert!(events.contains(&"pause".to_string()));
        assert!(events.contains(&"resume".to_string()));
    }

    #[test]
    fn test_recorded_samples_carry_gain() {
        let (recorder, _, _) = build_recorder(100);
        let tmp = NamedTempFile::new().unwrap();
        let session = CaptureSession::new(tmp.path(), AudioFormat::new(44100, 1))
            .with_gain(crate::config::GainBoost::Db6);
        recorder.start(session).unwrap();
        thread::sleep(Duration::from_millis(300));
        recorder.stop();

        let spec = wav::read_spec(tmp.path()).unwrap();
        assert!(spec.data_size > 0);
        let mono = wav::read_mono_samples(tmp.path(), &spec).unwrap();
        // 100 * 2 = 200 after +6 dB.
        let expected = 200.0 / 32768.0;
        assert!(mono.iter().all(|&s| (s - expected).abs() < 1e-6));
    }
}
