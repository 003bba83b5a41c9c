//! Welch PSD estimation
//!
//! Power spectral density of a real voltage record via Welch's method:
//! overlapped, windowed, averaged periodograms, one-sided output scaled to
//! V²/Hz. The segment length defaults to the record length capped at
//! [`MAX_DEFAULT_SEGMENT`] samples, matching the behaviour the rest of the
//! pipeline was calibrated against.
//!
//! ## Example
//!
//! ```rust
//! use trapspec_core::welch::{welch_psd, WelchConfig};
//!
//! let fs = 1000.0;
//! let signal: Vec<f64> = (0..4096)
//!     .map(|i| (2.0 * std::f64::consts::PI * 100.0 * i as f64 / fs).sin())
//!     .collect();
//! let spectrum = welch_psd(&signal, fs, &WelchConfig::default()).unwrap();
//! let peak = spectrum.peak_frequency().unwrap();
//! assert!((peak - 100.0).abs() < 2.0);
//! ```

use crate::error::{AnalysisError, Result};
use crate::nearest::take_closest_index;
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Cap on the default Welch segment length.
pub const MAX_DEFAULT_SEGMENT: usize = 100_000;

/// Window function applied to each Welch segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunction {
    Hann,
    Hamming,
    Blackman,
    Rectangular,
}

/// Welch estimator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelchConfig {
    /// Segment length; `None` uses the signal length capped at
    /// [`MAX_DEFAULT_SEGMENT`].
    pub segment_len: Option<usize>,
    /// Overlap between consecutive segments (0.0 to 0.99).
    pub overlap_fraction: f64,
    /// Window function.
    pub window: WindowFunction,
}

impl Default for WelchConfig {
    fn default() -> Self {
        Self { segment_len: None, overlap_fraction: 0.5, window: WindowFunction::Hann }
    }
}

/// A one-sided power spectral density estimate.
///
/// Frequencies are strictly increasing and match the power sequence in
/// length; powers are in V²/Hz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerSpectrum {
    /// Frequency axis in Hz, sorted ascending.
    pub frequencies: Vec<f64>,
    /// PSD values in V²/Hz.
    pub powers: Vec<f64>,
}

impl PowerSpectrum {
    /// Number of frequency bins.
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    /// True if the spectrum holds no bins.
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Frequency of the highest PSD value.
    pub fn peak_frequency(&self) -> Result<f64> {
        let (idx, _) = self
            .powers
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or(AnalysisError::EmptyInput)?;
        Ok(self.frequencies[idx])
    }

    /// Sum of the PSD samples between two frequencies (bounds resolved to
    /// the nearest bins, upper bound exclusive).
    pub fn area(&self, lower_freq: f64, upper_freq: f64) -> Result<f64> {
        let lo = take_closest_index(&self.frequencies, lower_freq)?;
        let hi = take_closest_index(&self.frequencies, upper_freq)?;
        Ok(self.powers[lo..hi].iter().sum())
    }
}

/// Estimate the one-sided PSD of a real signal by Welch's method.
///
/// The raw estimator output is re-sorted so frequencies are guaranteed
/// ascending with powers carried along.
pub fn welch_psd(signal: &[f64], sample_freq: f64, config: &WelchConfig) -> Result<PowerSpectrum> {
    if signal.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    let n = config.segment_len.unwrap_or_else(|| signal.len().min(MAX_DEFAULT_SEGMENT));
    if n == 0 || n > signal.len() {
        return Err(AnalysisError::InvalidSegmentLength {
            segment_len: n,
            signal_len: signal.len(),
        });
    }

    let overlap = (n as f64 * config.overlap_fraction.clamp(0.0, 0.99)) as usize;
    let step = n - overlap;
    let num_segments = (signal.len() - n) / step + 1;

    let window = generate_window(config.window, n);
    let window_power: f64 = window.iter().map(|w| w * w).sum();

    let fft = FftPlanner::new().plan_fft_forward(n);
    let num_bins = n / 2 + 1;
    let mut accum = vec![0.0f64; num_bins];
    let mut buffer = vec![Complex64::new(0.0, 0.0); n];

    for seg in 0..num_segments {
        let offset = seg * step;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex64::new(signal[offset + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);
        for (k, acc) in accum.iter_mut().enumerate() {
            *acc += buffer[k].norm_sqr();
        }
    }

    let scale = 1.0 / (sample_freq * window_power * num_segments as f64);
    let mut powers: Vec<f64> = accum.iter().map(|&p| p * scale).collect();
    // One-sided spectrum: interior bins carry both halves.
    let last_doubled = if n % 2 == 0 { num_bins - 1 } else { num_bins };
    for p in powers[1..last_doubled].iter_mut() {
        *p *= 2.0;
    }
    let frequencies: Vec<f64> = (0..num_bins).map(|k| k as f64 * sample_freq / n as f64).collect();

    Ok(sort_together(frequencies, powers))
}

/// Sort frequency and power together by ascending frequency.
fn sort_together(frequencies: Vec<f64>, powers: Vec<f64>) -> PowerSpectrum {
    let mut order: Vec<usize> = (0..frequencies.len()).collect();
    order.sort_by(|&a, &b| {
        frequencies[a].partial_cmp(&frequencies[b]).unwrap_or(std::cmp::Ordering::Equal)
    });
    PowerSpectrum {
        frequencies: order.iter().map(|&i| frequencies[i]).collect(),
        powers: order.iter().map(|&i| powers[i]).collect(),
    }
}

/// Generate window coefficients.
fn generate_window(window: WindowFunction, size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| {
            let x = i as f64 / size as f64;
            match window {
                WindowFunction::Hann => 0.5 * (1.0 - (2.0 * PI * x).cos()),
                WindowFunction::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
                WindowFunction::Blackman => {
                    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                }
                WindowFunction::Rectangular => 1.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tone(n: usize, freq: f64, fs: f64) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / fs).sin()).collect()
    }

    #[test]
    fn test_frequencies_sorted_and_matched() {
        let signal = make_tone(2048, 50.0, 1000.0);
        let spectrum = welch_psd(&signal, 1000.0, &WelchConfig::default()).unwrap();
        assert_eq!(spectrum.frequencies.len(), spectrum.powers.len());
        for pair in spectrum.frequencies.windows(2) {
            assert!(pair[1] > pair[0], "frequencies must be strictly increasing");
        }
        for &p in &spectrum.powers {
            assert!(p >= 0.0);
        }
    }

    #[test]
    fn test_tone_peak_location() {
        let fs = 8000.0;
        let signal = make_tone(16384, 1250.0, fs);
        let config = WelchConfig { segment_len: Some(4096), ..WelchConfig::default() };
        let spectrum = welch_psd(&signal, fs, &config).unwrap();
        let peak = spectrum.peak_frequency().unwrap();
        assert!((peak - 1250.0).abs() < fs / 4096.0 * 1.5, "peak at {peak}");
    }

    #[test]
    fn test_parseval_tone_power() {
        // A unit sine has mean-square power 0.5; integrating the one-sided
        // PSD should recover it.
        let fs = 1000.0;
        let signal = make_tone(8192, 100.0, fs);
        let config = WelchConfig {
            segment_len: Some(1024),
            window: WindowFunction::Hann,
            ..WelchConfig::default()
        };
        let spectrum = welch_psd(&signal, fs, &config).unwrap();
        let df = fs / 1024.0;
        let total: f64 = spectrum.powers.iter().map(|p| p * df).sum();
        assert!((total - 0.5).abs() < 0.05, "integrated power {total}");
    }

    #[test]
    fn test_default_segment_uses_whole_short_signal() {
        let signal = make_tone(512, 60.0, 1000.0);
        let spectrum = welch_psd(&signal, 1000.0, &WelchConfig::default()).unwrap();
        assert_eq!(spectrum.len(), 512 / 2 + 1);
    }

    #[test]
    fn test_segment_longer_than_signal_rejected() {
        let signal = vec![0.0; 64];
        let config = WelchConfig { segment_len: Some(128), ..WelchConfig::default() };
        let err = welch_psd(&signal, 1000.0, &config).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidSegmentLength { .. }));
    }

    #[test]
    fn test_empty_signal_rejected() {
        let err = welch_psd(&[], 1000.0, &WelchConfig::default()).unwrap_err();
        assert_eq!(err, AnalysisError::EmptyInput);
    }

    #[test]
    fn test_area_sums_band() {
        let spectrum = PowerSpectrum {
            frequencies: vec![0.0, 1.0, 2.0, 3.0, 4.0],
            powers: vec![1.0, 2.0, 3.0, 4.0, 5.0],
        };
        let area = spectrum.area(1.0, 4.0).unwrap();
        assert!((area - 9.0).abs() < 1e-12); // bins 1, 2, 3
    }
}
