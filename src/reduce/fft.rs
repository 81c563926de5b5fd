//! Spectral FFT engine
//!
//! Double-precision FFT over power-of-two frames, backed by rustfft
//! planners. Inverse transforms are normalized by 1/N so that
//! `inverse(forward(x))` reproduces the input.

use crate::error::FftError;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Forward and inverse transforms planned once for a fixed frame length.
pub struct SpectralFft {
    forward_plan: Arc<dyn Fft<f64>>,
    inverse_plan: Arc<dyn Fft<f64>>,
    len: usize,
}

impl std::fmt::Debug for SpectralFft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralFft").field("len", &self.len).finish()
    }
}

impl SpectralFft {
    /// Plan transforms for frames of `len` samples. `len` must be a power
    /// of two.
    pub fn new(len: usize) -> Result<Self, FftError> {
        if len == 0 || !len.is_power_of_two() {
            return Err(FftError::InvalidLength(len));
        }
        let mut planner = FftPlanner::new();
        Ok(Self {
            forward_plan: planner.plan_fft_forward(len),
            inverse_plan: planner.plan_fft_inverse(len),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// In-place forward FFT.
    pub fn forward(&self, buffer: &mut [Complex<f64>]) -> Result<(), FftError> {
        if buffer.len() != self.len {
            return Err(FftError::InvalidLength(buffer.len()));
        }
        self.forward_plan.process(buffer);
        Ok(())
    }

    /// In-place inverse FFT, scaled by 1/N.
    pub fn inverse(&self, buffer: &mut [Complex<f64>]) -> Result<(), FftError> {
        if buffer.len() != self.len {
            return Err(FftError::InvalidLength(buffer.len()));
        }
        self.inverse_plan.process(buffer);
        let scale = 1.0 / self.len as f64;
        for value in buffer.iter_mut() {
            *value *= scale;
        }
        Ok(())
    }
}
