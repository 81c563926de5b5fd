//! Precomputed Hann window for spectral analysis.

/// Hann window: w[i] = 0.5·(1 − cos(2π·i/(n−1))).
#[derive(Debug, Clone)]
pub struct HannWindow {
    coeffs: Vec<f64>,
}

impl HannWindow {
    pub fn new(size: usize) -> Self {
        let coeffs = (0..size)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (size - 1) as f64).cos())
            })
            .collect();
        Self { coeffs }
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn get(&self, index: usize) -> f64 {
        self.coeffs[index]
    }

    /// Multiply the window into the samples in place.
    pub fn apply(&self, samples: &mut [f64]) {
        for (sample, w) in samples.iter_mut().zip(self.coeffs.iter()) {
            *sample *= w;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_endpoints_and_peak() {
        let window = HannWindow::new(2048);
        assert!(window.get(0).abs() < 1e-12);
        assert!(window.get(2047).abs() < 1e-12);
        assert!((window.get(1023) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_overlapping_squares_are_positive() {
        // With 50% overlap the summed w² profile must be strictly positive
        // for every interior sample, so overlap-add normalization is defined.
        let n = 2048;
        let hop = n / 2;
        let window = HannWindow::new(n);
        let mut sum = vec![0.0f64; n + hop];
        for start in [0usize, hop] {
            for i in 0..n {
                sum[start + i] += window.get(i) * window.get(i);
            }
        }
        for (i, &s) in sum.iter().enumerate().take(n).skip(hop) {
            assert!(s > 1e-8, "w² sum not positive at {}: {}", i, s);
        }
    }

    #[test]
    fn test_apply_matches_get() {
        let window = HannWindow::new(64);
        let mut samples = vec![1.0f64; 64];
        window.apply(&mut samples);
        for (i, &s) in samples.iter().enumerate() {
            assert_eq!(s, window.get(i));
        }
    }
}
