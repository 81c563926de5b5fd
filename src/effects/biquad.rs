//! Second-order Butterworth high-pass and low-pass filters
//!
//! Direct-form-I biquads with double-precision state, converted back to
//! 16-bit integers via a rounded clamp. Coefficients are designed once per
//! session from (cutoff, sample rate, Q = 1/sqrt(2)).

/// Butterworth Q factor.
pub const BUTTERWORTH_Q: f64 = 0.7071;

/// Normalized biquad coefficients (divided through by a0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// High-pass design from the RBJ audio EQ cookbook.
    pub fn high_pass(fc: f64, fs: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * fc / fs;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();
        let b0 = (1.0 + cos_w0) / 2.0;
        let b1 = -(1.0 + cos_w0);
        let b2 = (1.0 + cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Low-pass design from the RBJ audio EQ cookbook.
    pub fn low_pass(fc: f64, fs: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * fc / fs;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();
        let b0 = (1.0 - cos_w0) / 2.0;
        let b1 = 1.0 - cos_w0;
        let b2 = (1.0 - cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// A biquad filter with persistent state.
///
/// Multi-channel streams are filtered as one interleaved sequence with a
/// single shared state, matching the capture chain's behavior.
#[derive(Debug, Clone)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Clear the filter state (session start).
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    /// y[n] = b0·x[n] + b1·x[n-1] + b2·x[n-2] − a1·y[n-1] − a2·y[n-2]
    pub fn process(&mut self, x: f64) -> f64 {
        let c = &self.coeffs;
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    /// Filter a 16-bit sample, rounding and saturating the result.
    pub fn process_sample(&mut self, sample: i16) -> i16 {
        let y = self.process(sample as f64);
        y.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hpf_rejects_dc() {
        // Unit step: the high-pass output must decay below -40 dB of the
        // input within 2048 samples at 44.1 kHz.
        let coeffs = BiquadCoeffs::high_pass(80.0, 44100.0, BUTTERWORTH_Q);
        let mut filter = Biquad::new(coeffs);
        let mut last = 0.0f64;
        for _ in 0..2048 {
            last = filter.process(10000.0);
        }
        assert!(last.abs() < 100.0, "HPF output {} not below -40 dB", last);
    }

    #[test]
    fn test_hpf_120_on_dc_plateau() {
        // DC value +1000: output magnitude drops below 100 within 1000 samples.
        let coeffs = BiquadCoeffs::high_pass(120.0, 44100.0, BUTTERWORTH_Q);
        let mut filter = Biquad::new(coeffs);
        let mut out = 0i16;
        for _ in 0..1000 {
            out = filter.process_sample(1000);
        }
        assert!(out.abs() < 100, "HPF output {} too large", out);
    }

    #[test]
    fn test_lpf_passes_dc() {
        // Low-pass reaches unity DC gain within the settling window.
        let coeffs = BiquadCoeffs::low_pass(9500.0, 44100.0, BUTTERWORTH_Q);
        let mut filter = Biquad::new(coeffs);
        let mut last = 0.0f64;
        for _ in 0..2048 {
            last = filter.process(10000.0);
        }
        assert!((last - 10000.0).abs() < 1.0, "LPF DC gain off: {}", last);
    }

    #[test]
    fn test_lpf_attenuates_high_frequency() {
        let coeffs = BiquadCoeffs::low_pass(9500.0, 44100.0, BUTTERWORTH_Q);
        let mut filter = Biquad::new(coeffs);
        // 20 kHz tone, near Nyquist, well above the cutoff.
        let mut peak = 0.0f64;
        for i in 0..4410 {
            let x = 10000.0 * (2.0 * std::f64::consts::PI * 20000.0 * i as f64 / 44100.0).sin();
            let y = filter.process(x);
            if i > 2048 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 2500.0, "LPF leaked {} at 20 kHz", peak);
    }

    #[test]
    fn test_saturating_conversion() {
        // A filter with pass-through coefficients and large input saturates
        // rather than wrapping.
        let coeffs = BiquadCoeffs {
            b0: 4.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        };
        let mut filter = Biquad::new(coeffs);
        assert_eq!(filter.process_sample(20000), i16::MAX);
        let mut filter = Biquad::new(coeffs);
        assert_eq!(filter.process_sample(-20000), i16::MIN);
    }

    #[test]
    fn test_reset_clears_state() {
        let coeffs = BiquadCoeffs::high_pass(120.0, 44100.0, BUTTERWORTH_Q);
        let mut filter = Biquad::new(coeffs);
        let first = filter.process(5000.0);
        for _ in 0..100 {
            filter.process(5000.0);
        }
        filter.reset();
        assert_eq!(filter.process(5000.0), first);
    }
}
