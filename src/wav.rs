//! Canonical 44-byte RIFF/WAVE codec
//!
//! The capture engine streams 16-bit integer PCM into a file behind a
//! placeholder header, then rewrites the header with final sizes on close.
//! The reader side validates the magic and extracts the format fields the
//! noise reducer needs. Only the 44-byte `fmt ` + `data` subset is handled.

use crate::config::{AudioFormat, BITS_PER_SAMPLE};
use crate::error::WavError;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Size of the canonical RIFF/WAVE PCM header.
pub const HEADER_LEN: usize = 44;

/// Audio trimmed from the end of every finished capture, to remove the
/// stop transient.
const TAIL_TRIM_SECS: f64 = 0.2;

/// Format fields of a parsed WAV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

impl WavSpec {
    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> u32 {
        self.channels as u32 * (self.bits_per_sample as u32 / 8)
    }

    /// Number of whole frames in the data chunk.
    pub fn frame_count(&self) -> u32 {
        self.data_size / self.block_align()
    }
}

/// Encode the canonical 44-byte header for the given data size.
pub fn encode_header(data_size: u32, sample_rate: u32, channels: u16) -> [u8; HEADER_LEN] {
    let riff_size = data_size + 36;
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * block_align as u32;

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // integer PCM
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());
    header
}

/// Parse and validate the header of a WAV file.
///
/// Fails with `MalformedHeader` if the file is shorter than 44 bytes or the
/// RIFF/WAVE magic does not match, and `UnsupportedFormat` for anything
/// other than 16-bit samples.
pub fn read_spec(path: &Path) -> Result<WavSpec, WavError> {
    let mut file = File::open(path)?;
    let mut header = [0u8; HEADER_LEN];
    file.read_exact(&mut header)
        .map_err(|_| WavError::MalformedHeader)?;

    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(WavError::MalformedHeader);
    }

    let channels = u16::from_le_bytes([header[22], header[23]]);
    let sample_rate = u32::from_le_bytes([header[24], header[25], header[26], header[27]]);
    let bits_per_sample = u16::from_le_bytes([header[34], header[35]]);
    let data_size = u32::from_le_bytes([header[40], header[41], header[42], header[43]]);

    if bits_per_sample != BITS_PER_SAMPLE {
        return Err(WavError::UnsupportedFormat(bits_per_sample));
    }

    Ok(WavSpec {
        channels,
        sample_rate,
        bits_per_sample,
        data_size,
    })
}

/// Streaming WAV writer used by the capture worker.
///
/// Writes a zeroed placeholder header at open and appends PCM chunks;
/// `finalize` trims the stop transient and rewrites the header with final
/// sizes. The output file must already exist (callers pre-create it).
pub struct WavWriter {
    file: File,
    path: PathBuf,
    format: AudioFormat,
}

impl WavWriter {
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self, WavError> {
        let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
        file.write_all(&[0u8; HEADER_LEN])?;
        file.flush()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            format,
        })
    }

    /// Append a chunk of interleaved 16-bit little-endian PCM.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), WavError> {
        self.file.write_all(data)?;
        Ok(())
    }

    /// Trim the stop transient and rewrite the header with final sizes.
    pub fn finalize(mut self) -> Result<(), WavError> {
        self.file.flush()?;
        drop(self.file);
        trim_tail(&self.path, self.format)?;
        finalize_header(&self.path, self.format)?;
        Ok(())
    }
}

/// Truncate the last 200 ms of PCM to remove the stop transient. Skipped
/// when the remaining data length would drop to zero or below.
pub fn trim_tail(path: &Path, format: AudioFormat) -> Result<(), WavError> {
    let tail_bytes =
        (format.sample_rate as f64 * TAIL_TRIM_SECS) as u64 * format.block_align() as u64;
    let file_len = fs::metadata(path)?.len();
    let data_len = file_len.saturating_sub(HEADER_LEN as u64);
    if data_len > tail_bytes {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(file_len - tail_bytes)?;
        tracing::debug!("Trimmed {} tail bytes from {:?}", tail_bytes, path);
    }
    Ok(())
}

/// Rewrite the 44-byte header with sizes derived from the file length.
pub fn finalize_header(path: &Path, format: AudioFormat) -> Result<(), WavError> {
    let file_len = fs::metadata(path)?.len();
    let data_size = file_len.saturating_sub(HEADER_LEN as u64) as u32;
    let header = encode_header(data_size, format.sample_rate, format.channels);

    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    file.flush()?;
    Ok(())
}

/// Read all PCM frames, mixing interleaved channels down to mono `f64`
/// samples in [-1, 1] by averaging each frame.
pub fn read_mono_samples(path: &Path, spec: &WavSpec) -> Result<Vec<f64>, WavError> {
    let frame_bytes = spec.block_align() as usize;
    let total_frames = spec.frame_count() as usize;
    let mut mono = Vec::with_capacity(total_frames);

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(HEADER_LEN as u64))?;

    let mut buffer = vec![0u8; 65536 - (65536 % frame_bytes)];
    let mut pending: Vec<u8> = Vec::new();
    let mut remaining = spec.data_size as usize;

    while remaining > 0 && mono.len() < total_frames {
        let to_read = remaining.min(buffer.len());
        let read = file.read(&mut buffer[..to_read])?;
        if read == 0 {
            break;
        }
        remaining -= read;
        pending.extend_from_slice(&buffer[..read]);

        let whole = pending.len() - (pending.len() % frame_bytes);
        for frame in pending[..whole].chunks_exact(frame_bytes) {
            let mut sum = 0.0;
            for ch in 0..spec.channels as usize {
                let sample = i16::from_le_bytes([frame[ch * 2], frame[ch * 2 + 1]]);
                sum += sample as f64 / 32768.0;
            }
            mono.push(sum / spec.channels as f64);
            if mono.len() >= total_frames {
                break;
            }
        }
        pending.drain(..whole);
    }

    Ok(mono)
}

/// Write processed mono samples back into the data chunk in place, storing
/// the same 16-bit value in every channel of each frame. The header is left
/// untouched because the frame count is preserved.
pub fn write_mono_samples(path: &Path, spec: &WavSpec, mono: &[f64]) -> Result<(), WavError> {
    let frame_bytes = spec.block_align() as usize;
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    file.seek(SeekFrom::Start(HEADER_LEN as u64))?;

    let frames_per_flush = 65536 / frame_bytes;
    let mut buffer: Vec<u8> = Vec::with_capacity(frames_per_flush * frame_bytes);

    for &value in mono {
        let clamped = value.clamp(-1.0, 1.0);
        let sample = (clamped * 32767.0) as i16;
        for _ in 0..spec.channels {
            buffer.extend_from_slice(&sample.to_le_bytes());
        }
        if buffer.len() >= frames_per_flush * frame_bytes {
            file.write_all(&buffer)?;
            buffer.clear();
        }
    }
    if !buffer.is_empty() {
        file.write_all(&buffer)?;
    }
    file.flush()?;
    Ok(())
}
