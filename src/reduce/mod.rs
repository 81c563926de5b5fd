//! Offline spectral noise reduction
//!
//! Single-pass spectral gating over a finished WAV file, in the style of
//! Audacity's NoiseReduction effect:
//!
//! 1. Learn a per-bin noise profile (mean + std of magnitude) from the
//!    first N seconds of the recording
//! 2. For each 50%-overlapped Hann-windowed frame, build a soft gain mask
//!    from how far each bin rises above the noise threshold
//! 3. Smooth the mask across frequency and time, multiply it into the
//!    spectrum, inverse FFT, and overlap-add the result
//! 4. Write the processed audio back into the file in place
//!
//! The file's frame count is preserved, so the header is never touched.

pub mod fft;
pub mod window;

pub use fft::SpectralFft;
pub use window::HannWindow;

use crate::config::ReductionConfig;
use crate::error::ReduceError;
use crate::wav;
use rustfft::num_complex::Complex;
use std::path::Path;

/// FFT frame size. Must be a power of two.
pub const FFT_SIZE: usize = 2048;

/// Hop between frames: 50% overlap.
pub const HOP_SIZE: usize = FFT_SIZE / 2;

const NUM_BINS: usize = FFT_SIZE / 2 + 1;

// Temporal smoothing time constants.
const ATTACK_TIME_SEC: f64 = 0.02;
const RELEASE_TIME_SEC: f64 = 0.10;

/// Apply noise reduction to a WAV file in place, reporting progress as a
/// percentage. Returns false on any failure; the capture path treats a
/// failed reduction as non-fatal.
pub fn process(path: &Path, config: &ReductionConfig, progress: impl FnMut(u8)) -> bool {
    match try_process(path, config, progress) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Noise reduction failed for {:?}: {}", path, e);
            false
        }
    }
}

/// Fallible core of `process`.
pub fn try_process(
    path: &Path,
    config: &ReductionConfig,
    mut progress: impl FnMut(u8),
) -> Result<(), ReduceError> {
    let params = config.clamped();
    tracing::debug!(
        "Noise reduction: reduction={:.1}dB sensitivity={:.1} freq_smooth={} profile={:.1}s",
        params.reduction_db,
        params.sensitivity,
        params.freq_smoothing_bands,
        params.profile_seconds
    );

    let spec = wav::read_spec(path)?;
    let samples = wav::read_mono_samples(path, &spec)?;
    let total = samples.len();

    let profile_samples =
        ((params.profile_seconds as f64 * spec.sample_rate as f64) as usize).min(total);
    if profile_samples < FFT_SIZE {
        return Err(ReduceError::InsufficientProfile {
            have: profile_samples,
            need: FFT_SIZE,
        });
    }

    let fft = SpectralFft::new(FFT_SIZE)?;
    let window = HannWindow::new(FFT_SIZE);

    let (noise_mean, noise_std) = build_noise_profile(&samples[..profile_samples], &fft, &window)?;

    // Sensitivity 0 keeps a conservative mean + 3σ threshold; 24 collapses
    // it to the mean.
    let sensitivity_scale = (24.0 - params.sensitivity as f64) / 24.0 * 3.0;
    let threshold: Vec<f64> = noise_mean
        .iter()
        .zip(noise_std.iter())
        .map(|(m, s)| m + sensitivity_scale * s)
        .collect();

    // 6 dB subtracts half the threshold, 12 dB all of it, 24 dB twice it.
    let reduction_strength = params.reduction_db as f64 / 12.0;

    let hop_seconds = HOP_SIZE as f64 / spec.sample_rate as f64;
    let attack_coeff = (-hop_seconds / ATTACK_TIME_SEC).exp();
    let release_coeff = (-hop_seconds / RELEASE_TIME_SEC).exp();

    let mut output = vec![0.0f64; total];
    let mut window_sum = vec![0.0f64; total];
    let mut prev_gain = vec![1.0f64; NUM_BINS];
    let mut gain = vec![0.0f64; NUM_BINS];
    let mut buffer = vec![Complex::new(0.0f64, 0.0); FFT_SIZE];

    let num_frames = (total - FFT_SIZE) / HOP_SIZE + 1;
    let mut frame_count = 0usize;
    let mut pos = 0usize;

    while pos + FFT_SIZE <= total {
        for i in 0..FFT_SIZE {
            buffer[i] = Complex::new(samples[pos + i] * window.get(i), 0.0);
        }
        fft.forward(&mut buffer)?;

        // Spectral subtraction: gain is what survives after the scaled
        // noise floor is removed from each bin's magnitude.
        for (k, g) in gain.iter_mut().enumerate() {
            let magnitude = buffer[k].norm();
            let noise_estimate = threshold[k] * reduction_strength;
            let reduced = (magnitude - noise_estimate).max(0.0);
            *g = if magnitude > 1e-10 {
                reduced / magnitude
            } else {
                0.0
            };
        }

        if params.freq_smoothing_bands > 0 {
            gain = smooth_frequency(&gain, params.freq_smoothing_bands as usize);
        }

        for (g, prev) in gain.iter_mut().zip(prev_gain.iter_mut()) {
            if *g < *prev {
                *g = attack_coeff * *prev + (1.0 - attack_coeff) * *g;
            } else {
                *g = release_coeff * *prev + (1.0 - release_coeff) * *g;
            }
            *prev = *g;
        }

        for (k, &g) in gain.iter().enumerate() {
            buffer[k] *= g;
        }
        // Hermitian mirror so the inverse transform stays real.
        for k in 1..FFT_SIZE / 2 {
            buffer[FFT_SIZE - k] = buffer[k].conj();
        }
        fft.inverse(&mut buffer)?;

        for i in 0..FFT_SIZE {
            output[pos + i] += buffer[i].re * window.get(i);
            window_sum[pos + i] += window.get(i) * window.get(i);
        }

        frame_count += 1;
        if frame_count % 50 == 0 {
            progress((100.0 * frame_count as f64 / num_frames as f64) as u8);
        }
        pos += HOP_SIZE;
    }

    for (out, &w) in output.iter_mut().zip(window_sum.iter()) {
        if w > 1e-8 {
            *out /= w;
        }
    }
    progress(95);

    wav::write_mono_samples(path, &spec, &output)?;
    progress(100);

    tracing::debug!("Noise reduction complete: {} frames", frame_count);
    Ok(())
}

/// Per-bin mean and standard deviation of windowed magnitude over the
/// profile region.
fn build_noise_profile(
    profile: &[f64],
    fft: &SpectralFft,
    window: &HannWindow,
) -> Result<(Vec<f64>, Vec<f64>), ReduceError> {
    let mut sum = vec![0.0f64; NUM_BINS];
    let mut sum_sq = vec![0.0f64; NUM_BINS];
    let mut buffer = vec![Complex::new(0.0f64, 0.0); FFT_SIZE];
    let mut frames = 0usize;

    let mut pos = 0usize;
    while pos + FFT_SIZE <= profile.len() {
        for i in 0..FFT_SIZE {
            buffer[i] = Complex::new(profile[pos + i] * window.get(i), 0.0);
        }
        fft.forward(&mut buffer)?;
        for k in 0..NUM_BINS {
            let magnitude = buffer[k].norm();
            sum[k] += magnitude;
            sum_sq[k] += magnitude * magnitude;
        }
        frames += 1;
        pos += HOP_SIZE;
    }

    let mut mean = vec![0.0f64; NUM_BINS];
    let mut std = vec![0.0f64; NUM_BINS];
    if frames > 0 {
        for k in 0..NUM_BINS {
            mean[k] = sum[k] / frames as f64;
            let variance = sum_sq[k] / frames as f64 - mean[k] * mean[k];
            std[k] = variance.max(0.0).sqrt();
        }
    }
    tracing::debug!("Noise profile built from {} frames", frames);
    Ok((mean, std))
}

/// Average each gain bin with its neighbors within `bands` on either side.
fn smooth_frequency(mask: &[f64], bands: usize) -> Vec<f64> {
    let mut smoothed = vec![0.0f64; mask.len()];
    for (i, out) in smoothed.iter_mut().enumerate() {
        let lo = i.saturating_sub(bands);
        let hi = (i + bands).min(mask.len() - 1);
        let slice = &mask[lo..=hi];
        *out = slice.iter().sum::<f64>() / slice.len() as f64;
    }
    smoothed
}
