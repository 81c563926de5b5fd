//! Live audio monitoring
//!
//! Plays post-effect PCM through an output device so the user hears what is
//! being written. During capture the recording worker feeds the sink; when
//! no capture is active, a standalone loop owns its own input device and
//! runs the same effect chain. The input device is exclusive, so the two
//! feeders hand it back and forth — the capture engine always stops the
//! standalone loop before acquiring the device.

use crate::capture::{InputFactory, PcmSource};
use crate::config::{AudioFormat, GateConfig};
use crate::device::DeviceRegistry;
use crate::effects::{EffectChain, EffectSettings};
use crate::error::DeviceError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Non-blocking output sink for interleaved 16-bit PCM.
pub trait OutputSink: Send {
    /// Write as many samples as fit in the output buffer and drop the rest.
    /// Returns the number of samples accepted. Never blocks.
    fn write(&mut self, samples: &[i16]) -> usize;

    fn pause(&mut self);
    fn resume(&mut self);

    /// Playback volume, clamped to [0, 1].
    fn set_volume(&mut self, volume: f32);
}

/// Opens `OutputSink`s for a device at a given format.
pub trait SinkFactory: Send + Sync {
    fn open(
        &self,
        device: Option<&str>,
        format: AudioFormat,
    ) -> Result<Box<dyn OutputSink>, DeviceError>;
}

/// cpal-backed sink factory.
pub struct CpalSinkFactory;

impl SinkFactory for CpalSinkFactory {
    fn open(
        &self,
        device: Option<&str>,
        format: AudioFormat,
    ) -> Result<Box<dyn OutputSink>, DeviceError> {
        Ok(Box::new(CpalSink::open(device, format)?))
    }
}

/// Ring capacity in seconds of audio; the sink buffers at most this much.
const SINK_BUFFER_SECONDS: f64 = 0.1;

/// Bound on waiting for the standalone loop to drain at stop. The loop can
/// be stuck in a device read, and the capture hand-off must not hang on it.
const STANDALONE_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

struct SinkRing {
    queue: Mutex<VecDeque<i16>>,
    capacity: usize,
    paused: AtomicBool,
    volume: Mutex<f32>,
}

/// Output sink writing into a bounded ring drained by a cpal output stream.
/// The stream zero-fills on underflow; the sink itself never synthesises
/// audio, so silence is what an unfed monitor naturally produces.
pub struct CpalSink {
    ring: Arc<SinkRing>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    pub fn open(device_name: Option<&str>, format: AudioFormat) -> Result<Self, DeviceError> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| DeviceError::Enumeration(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| DeviceError::NotFound(name.to_string()))?,
            None => host
                .default_output_device()
                .ok_or_else(|| DeviceError::NotFound("default output".to_string()))?,
        };

        let device_label = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::info!("Opening monitor output device: {}", device_label);

        let capacity = (format.sample_rate as f64 * SINK_BUFFER_SECONDS) as usize
            * format.channels as usize;
        let ring = Arc::new(SinkRing {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            paused: AtomicBool::new(false),
            volume: Mutex::new(1.0),
        });

        let stream_config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let ring_thread = Arc::clone(&ring);

        let thread = thread::spawn(move || {
            use cpal::traits::{DeviceTrait, StreamTrait};

            let ring_cb = Arc::clone(&ring_thread);
            let stream = device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let volume = *ring_cb.volume.lock().unwrap();
                    if ring_cb.paused.load(Ordering::Relaxed) {
                        data.fill(0);
                        return;
                    }
                    let mut queue = ring_cb.queue.lock().unwrap();
                    for slot in data.iter_mut() {
                        *slot = match queue.pop_front() {
                            Some(sample) => (sample as f32 * volume) as i16,
                            None => 0,
                        };
                    }
                },
                |err| tracing::error!("Monitor output stream error: {}", err),
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while !stop_thread.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(20));
            }
            drop(stream);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(DeviceError::Output(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(DeviceError::Output("output stream thread died".to_string()));
            }
        }

        Ok(Self {
            ring,
            stop,
            thread: Some(thread),
        })
    }
}

impl OutputSink for CpalSink {
    fn write(&mut self, samples: &[i16]) -> usize {
        let mut queue = self.ring.queue.lock().unwrap();
        let space = self.ring.capacity.saturating_sub(queue.len());
        let n = space.min(samples.len());
        queue.extend(&samples[..n]);
        n
    }

    fn pause(&mut self) {
        self.ring.paused.store(true, Ordering::Relaxed);
    }

    fn resume(&mut self) {
        self.ring.paused.store(false, Ordering::Relaxed);
    }

    fn set_volume(&mut self, volume: f32) {
        *self.ring.volume.lock().unwrap() = volume.clamp(0.0, 1.0);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// State shared between the monitor facade, the standalone loop thread and
/// the capture worker feeding it.
struct MonitorShared {
    sink: Mutex<Option<Box<dyn OutputSink>>>,
    monitoring: AtomicBool,
    standalone: AtomicBool,
    paused: AtomicBool,
    feed_count: AtomicU32,
    write_count: AtomicU32,
}

impl MonitorShared {
    fn feed(&self, samples: &[i16]) {
        if !self.monitoring.load(Ordering::Relaxed) || self.paused.load(Ordering::Relaxed) {
            return;
        }
        self.feed_count.fetch_add(1, Ordering::Relaxed);
        if let Some(sink) = self.sink.lock().unwrap().as_mut() {
            if sink.write(samples) > 0 {
                self.write_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Real-time monitor: owns the output device and, in standalone mode, an
/// input device plus its own effect chain.
pub struct AudioMonitor {
    shared: Arc<MonitorShared>,
    sink_factory: Box<dyn SinkFactory>,
    input_factory: Arc<dyn InputFactory>,
    registry: Option<Arc<DeviceRegistry>>,
    settings: Arc<EffectSettings>,
    gate_config: GateConfig,
    format: Mutex<AudioFormat>,
    input_device: Mutex<Option<String>>,
    volume: Mutex<f32>,
    last_error: Mutex<Option<String>>,
    standalone_thread: Mutex<Option<(JoinHandle<()>, Receiver<()>)>>,
}

impl AudioMonitor {
    pub fn new(
        sink_factory: Box<dyn SinkFactory>,
        input_factory: Arc<dyn InputFactory>,
        registry: Option<Arc<DeviceRegistry>>,
        settings: Arc<EffectSettings>,
        gate_config: GateConfig,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                sink: Mutex::new(None),
                monitoring: AtomicBool::new(false),
                standalone: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                feed_count: AtomicU32::new(0),
                write_count: AtomicU32::new(0),
            }),
            sink_factory,
            input_factory,
            registry,
            settings,
            gate_config,
            format: Mutex::new(AudioFormat::default()),
            input_device: Mutex::new(None),
            volume: Mutex::new(1.0),
            last_error: Mutex::new(None),
            standalone_thread: Mutex::new(None),
        }
    }

    /// Adopt the capture format before `start`.
    pub fn initialize(&self, format: AudioFormat) {
        *self.format.lock().unwrap() = format;
        *self.last_error.lock().unwrap() = None;
        self.shared.feed_count.store(0, Ordering::Relaxed);
        self.shared.write_count.store(0, Ordering::Relaxed);
        tracing::debug!(
            "AudioMonitor initialized: {} Hz, {} ch",
            format.sample_rate,
            format.channels
        );
    }

    /// Record which input device is in use so output routing can exclude it.
    pub fn set_input_device(&self, device: Option<String>) {
        *self.input_device.lock().unwrap() = device;
    }

    /// Open the preferred output device and begin playback. On failure the
    /// error is recorded for `debug_status` and monitoring stays off.
    pub fn start(&self) {
        if self.shared.monitoring.load(Ordering::Relaxed) {
            tracing::warn!("AudioMonitor::start: already running");
            return;
        }

        let format = *self.format.lock().unwrap();
        let exclude = self.input_device.lock().unwrap().clone();
        let output = self
            .registry
            .as_ref()
            .and_then(|r| r.preferred_monitor_output(exclude.as_deref()));
        if let Some(ref device) = output {
            tracing::debug!("Monitor output routed to {} ({:?})", device.id, device.kind);
        }

        match self
            .sink_factory
            .open(output.as_ref().map(|d| d.id.as_str()), format)
        {
            Ok(mut sink) => {
                sink.set_volume(*self.volume.lock().unwrap());
                *self.shared.sink.lock().unwrap() = Some(sink);
                self.shared.paused.store(false, Ordering::Relaxed);
                self.shared.monitoring.store(true, Ordering::Relaxed);
                tracing::debug!(
                    "AudioMonitor started: {} Hz, {} ch",
                    format.sample_rate,
                    format.channels
                );
            }
            Err(e) => {
                tracing::error!("Failed to start AudioMonitor: {}", e);
                *self.last_error.lock().unwrap() = Some(e.to_string());
            }
        }
    }

    /// Stop playback and release the output device.
    pub fn stop(&self) {
        self.shared.monitoring.store(false, Ordering::Relaxed);
        self.shared.paused.store(false, Ordering::Relaxed);
        *self.shared.sink.lock().unwrap() = None;
        tracing::debug!(
            "AudioMonitor stopped. feeds={} writes={}",
            self.shared.feed_count.load(Ordering::Relaxed),
            self.shared.write_count.load(Ordering::Relaxed)
        );
    }

    pub fn pause(&self) {
        if self.shared.monitoring.load(Ordering::Relaxed) {
            self.shared.paused.store(true, Ordering::Relaxed);
            if let Some(sink) = self.shared.sink.lock().unwrap().as_mut() {
                sink.pause();
            }
        }
    }

    pub fn resume(&self) {
        if self.shared.monitoring.load(Ordering::Relaxed) {
            self.shared.paused.store(false, Ordering::Relaxed);
            if let Some(sink) = self.shared.sink.lock().unwrap().as_mut() {
                sink.resume();
            }
        }
    }

    /// Feed post-effect PCM from the capture worker. Non-blocking: when the
    /// output buffer is full the excess is dropped.
    pub fn feed(&self, samples: &[i16]) {
        self.shared.feed(samples);
    }

    pub fn set_volume(&self, volume: f32) {
        let v = volume.clamp(0.0, 1.0);
        *self.volume.lock().unwrap() = v;
        if let Some(sink) = self.shared.sink.lock().unwrap().as_mut() {
            sink.set_volume(v);
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.monitoring.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    pub fn is_standalone(&self) -> bool {
        self.shared.standalone.load(Ordering::Relaxed)
    }

    /// One-line status string for diagnostics UIs.
    pub fn debug_status(&self) -> String {
        let format = *self.format.lock().unwrap();
        let mut status = format!(
            "mon={} standalone={} sr={} ch={} f={} w={}",
            self.is_monitoring(),
            self.is_standalone(),
            format.sample_rate,
            format.channels,
            self.shared.feed_count.load(Ordering::Relaxed),
            self.shared.write_count.load(Ordering::Relaxed)
        );
        if let Some(ref err) = *self.last_error.lock().unwrap() {
            status.push_str(" ERR=");
            status.push_str(err);
        }
        status
    }

    /// Play a short 440 Hz tone through a fresh default-output sink, to
    /// verify playback works independently of monitoring state.
    pub fn play_test_tone(&self) -> Result<(), DeviceError> {
        const TONE_HZ: f64 = 440.0;
        const TONE_MS: usize = 500;

        let format = AudioFormat::new(44100, 1);
        let mut sink = self.sink_factory.open(None, format)?;
        sink.set_volume(*self.volume.lock().unwrap());

        let total = format.sample_rate as usize * TONE_MS / 1000;
        let samples: Vec<i16> = (0..total)
            .map(|i| {
                let t = i as f64 / format.sample_rate as f64;
                (i16::MAX as f64 * (2.0 * std::f64::consts::PI * TONE_HZ * t).sin()) as i16
            })
            .collect();

        // Pace slices in real time; the sink drops what does not fit.
        thread::spawn(move || {
            let slice = 1024;
            let slice_ms = slice as u64 * 1000 / 44100;
            for chunk in samples.chunks(slice) {
                sink.write(chunk);
                thread::sleep(Duration::from_millis(slice_ms));
            }
            thread::sleep(Duration::from_millis(100));
        });

        Ok(())
    }

    /// Start standalone monitoring: acquire an input device, run the shared
    /// effect settings through a private chain, feed the sink. Call
    /// `stop_standalone` before starting a capture.
    pub fn start_standalone(&self, format: AudioFormat, input_device: Option<String>) {
        if self.shared.monitoring.load(Ordering::Relaxed) {
            tracing::warn!("AudioMonitor::start_standalone: already monitoring");
            return;
        }

        self.set_input_device(input_device.clone());
        self.initialize(format);
        self.start();
        if !self.shared.monitoring.load(Ordering::Relaxed) {
            tracing::error!("start_standalone: output sink failed to start");
            return;
        }

        let mut source = match self
            .input_factory
            .open(input_device.as_deref(), format)
        {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("start_standalone: input open failed: {}", e);
                *self.last_error.lock().unwrap() = Some(e.to_string());
                self.stop();
                return;
            }
        };

        self.shared.standalone.store(true, Ordering::Relaxed);

        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let settings = Arc::clone(&self.settings);
        let gate_config = self.gate_config;
        let thread = thread::spawn(move || {
            let mut chain = EffectChain::new(format.sample_rate, &gate_config);
            let mut buf = vec![0u8; source.buffer_size()];
            let mut samples: Vec<i16> = Vec::with_capacity(buf.len() / 2);

            while shared.standalone.load(Ordering::Relaxed)
                && shared.monitoring.load(Ordering::Relaxed)
            {
                if shared.paused.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
                match source.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        let n = n & !1;
                        samples.clear();
                        samples.extend(
                            buf[..n]
                                .chunks_exact(2)
                                .map(|b| i16::from_le_bytes([b[0], b[1]])),
                        );
                        chain.configure(&settings);
                        chain.process(&mut samples);
                        shared.feed(&samples);
                    }
                    Err(e) => {
                        tracing::error!("Standalone monitor read failed: {}", e);
                        break;
                    }
                }
            }
            drop(source);
            tracing::debug!("Standalone monitor loop stopped");
            let _ = done_tx.send(());
        });

        *self.standalone_thread.lock().unwrap() = Some((thread, done_rx));
        tracing::debug!(
            "Standalone monitoring started: {} Hz, {} ch, device={}",
            format.sample_rate,
            format.channels,
            input_device.as_deref().unwrap_or("default")
        );
    }

    /// Stop standalone monitoring and release its input device. Must be
    /// called before any capture acquires the device. The join is bounded:
    /// a loop stuck in a device read is abandoned rather than allowed to
    /// stall the capture hand-off.
    pub fn stop_standalone(&self) {
        self.shared.standalone.store(false, Ordering::Relaxed);
        if let Some((thread, done_rx)) = self.standalone_thread.lock().unwrap().take() {
            match done_rx.recv_timeout(STANDALONE_JOIN_TIMEOUT) {
                Ok(()) => {
                    let _ = thread.join();
                }
                Err(_) => {
                    tracing::warn!(
                        "Standalone monitor loop did not drain in time, abandoning it"
                    );
                }
            }
        }
        self.stop();
        tracing::debug!("Standalone monitoring stopped");
    }

    /// Release everything.
    pub fn release(&self) {
        self.stop_standalone();
        self.stop();
    }
}
