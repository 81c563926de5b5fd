//! PCM input sources
//!
//! `PcmSource` is the pull-style read interface the capture worker and the
//! standalone monitor loop consume. The cpal implementation bridges the
//! push-style stream callback onto a channel: cpal::Stream is not Send, so
//! the stream lives on its own thread and the reader side blocks on the
//! channel with a bounded timeout.

use crate::config::AudioFormat;
use crate::error::RecorderError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long one read waits for the device before giving up the slice.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Target read granularity: 100 ms of audio.
const CHUNK_SECONDS: f64 = 0.1;

/// Blocking source of interleaved 16-bit little-endian PCM bytes.
///
/// Dropping the source releases the input device; the device is exclusive,
/// so at most one live source exists per device at any time.
pub trait PcmSource: Send {
    /// Read up to `buf.len()` bytes. Returns 0 when no data arrived within
    /// the read timeout; an error means the device is gone and the session
    /// should stop.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecorderError>;

    /// Preferred read size in bytes (whole frames).
    fn buffer_size(&self) -> usize;
}

/// Opens `PcmSource`s for a device at a given format. Production uses
/// `CpalInputFactory`; tests substitute synthetic sources.
pub trait InputFactory: Send + Sync {
    fn open(
        &self,
        device: Option<&str>,
        format: AudioFormat,
    ) -> Result<Box<dyn PcmSource>, RecorderError>;
}

/// cpal-backed input factory.
pub struct CpalInputFactory;

impl InputFactory for CpalInputFactory {
    fn open(
        &self,
        device: Option<&str>,
        format: AudioFormat,
    ) -> Result<Box<dyn PcmSource>, RecorderError> {
        Ok(Box::new(CpalSource::open(device, format)?))
    }
}

enum StreamEvent {
    Chunk(Vec<i16>),
    Error(String),
}

/// PCM source reading from a cpal input stream.
pub struct CpalSource {
    rx: Receiver<StreamEvent>,
    pending: VecDeque<u8>,
    buffer_size: usize,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSource {
    pub fn open(device_name: Option<&str>, format: AudioFormat) -> Result<Self, RecorderError> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| RecorderError::Init(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| RecorderError::Init(format!("input device '{}' not found", name)))?,
            None => host
                .default_input_device()
                .ok_or_else(|| RecorderError::Init("no default input device".to_string()))?,
        };

        let device_label = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::info!("Opening input device: {}", device_label);

        let stream_config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // Bounded channel: if the reader stalls, old chunks are dropped at
        // the sender rather than growing without limit.
        let (tx, rx) = mpsc::sync_channel::<StreamEvent>(32);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);

        let thread = thread::spawn(move || {
            use cpal::traits::{DeviceTrait, StreamTrait};

            let data_tx = tx.clone();
            let err_tx = tx.clone();
            let stream = device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    match data_tx.try_send(StreamEvent::Chunk(data.to_vec())) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Disconnected(_)) => {}
                    }
                },
                move |err| {
                    tracing::error!("Input stream error: {}", err);
                    let _ = err_tx.try_send(StreamEvent::Error(err.to_string()));
                },
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
                return Err(RecorderError::Init(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(RecorderError::Init("input stream thread died".to_string()));
            }
        }

        let buffer_size =
            (format.sample_rate as f64 * CHUNK_SECONDS) as usize * format.block_align() as usize;

        Ok(Self {
            rx,
            pending: VecDeque::new(),
            buffer_size,
            stop,
            thread: Some(thread),
        })
    }
}

impl PcmSource for CpalSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecorderError> {
        // Block for at most one chunk; drain whatever else is ready.
        if self.pending.is_empty() {
            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(StreamEvent::Chunk(samples)) => {
                    for sample in samples {
                        self.pending.extend(sample.to_le_bytes());
                    }
                }
                Ok(StreamEvent::Error(e)) => return Err(RecorderError::Recording(e)),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RecorderError::Recording("input stream closed".to_string()))
                }
            }
        }
        while self.pending.len() < buf.len() {
            match self.rx.try_recv() {
                Ok(StreamEvent::Chunk(samples)) => {
                    for sample in samples {
                        self.pending.extend(sample.to_le_bytes());
                    }
                }
                Ok(StreamEvent::Error(e)) => return Err(RecorderError::Recording(e)),
                Err(_) => break,
            }
        }

        let n = buf.len().min(self.pending.len());
        for byte in buf.iter_mut().take(n) {
            *byte = self.pending.pop_front().unwrap_or(0);
        }
        Ok(n)
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("Input device released");
    }
}
