//! Resonance peak location
//!
//! Finds the true resonance peak inside a caller-supplied search window of a
//! [`PowerSpectrum`] and derives the initial guesses the fit engine starts
//! from: the peak height maps to an amplitude guess through a calibrated
//! scale factor, and the full width at half maximum seeds the damping guess.
//!
//! The initial centre frequency may sit off-peak, so the window is re-derived
//! once around the located maximum before the half-maximum crossings are
//! measured.

use crate::error::{AnalysisError, Result};
use crate::nearest::take_closest_index;
use crate::welch::PowerSpectrum;

/// Calibrated scale factor mapping a PSD peak height (V²/Hz) to an initial
/// amplitude guess for the fit. An instrument-specific calibration input,
/// not a derived quantity; override it through `FitConfig` when targeting a
/// different setup.
pub const AMPLITUDE_CALIBRATION: f64 = 1e16;

/// Located peak with derived initial guesses.
#[derive(Debug, Clone, Copy)]
pub struct PeakEstimate {
    /// Frequency of the maximum PSD value in the window, Hz.
    pub centre_freq: f64,
    /// PSD value at the peak, V²/Hz.
    pub height: f64,
    /// Full width at half maximum, Hz.
    pub fwhm: f64,
    /// Initial amplitude guess (`height` times the calibration factor).
    pub amplitude_guess: f64,
    /// Initial damping guess (`fwhm / 4`).
    pub damping_guess: f64,
}

/// Find the frequency of the maximum PSD value within `bandwidth` of an
/// approximate frequency. The coarse step used per axis by the multichannel
/// extractor.
pub fn refine_peak(spectrum: &PowerSpectrum, approx_freq: f64, bandwidth: f64) -> Result<f64> {
    let (lo, hi) = window_indices(spectrum, approx_freq - bandwidth / 2.0, approx_freq + bandwidth / 2.0)?;
    let idx = max_power_index(spectrum, lo, hi);
    Ok(spectrum.frequencies[idx])
}

/// Locate the peak between two frequencies and derive fit guesses from its
/// height and width.
pub fn locate_peak(
    spectrum: &PowerSpectrum,
    lower_freq: f64,
    upper_freq: f64,
    amplitude_calibration: f64,
) -> Result<PeakEstimate> {
    let (lo, hi) = window_indices(spectrum, lower_freq, upper_freq)?;
    let centre = max_power_index(spectrum, lo, hi);

    // The caller's window was centred on a guess; re-derive it around the
    // located maximum before measuring the width.
    let bandwidth = upper_freq - lower_freq;
    let centre_freq = spectrum.frequencies[centre];
    let (lo, hi) =
        window_indices(spectrum, centre_freq - bandwidth / 2.0, centre_freq + bandwidth / 2.0)?;
    let centre = max_power_index(spectrum, lo, hi);
    let centre_freq = spectrum.frequencies[centre];

    let height = spectrum.powers[centre];
    let floor = spectrum.powers[lo..hi]
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let half_max = floor + (height - floor) / 2.0;

    let left = closest_power_index(&spectrum.powers[lo..centre], half_max)
        .map(|i| lo + i)
        .ok_or(AnalysisError::WindowTooNarrow { lower: lower_freq, upper: upper_freq })?;
    let right = closest_power_index(&spectrum.powers[centre..hi], half_max)
        .map(|i| centre + i)
        .ok_or(AnalysisError::WindowTooNarrow { lower: lower_freq, upper: upper_freq })?;

    let fwhm = spectrum.frequencies[right] - spectrum.frequencies[left];
    Ok(PeakEstimate {
        centre_freq,
        height,
        fwhm,
        amplitude_guess: height * amplitude_calibration,
        damping_guess: fwhm / 4.0,
    })
}

/// Resolve a frequency window to bin indices, requiring at least two
/// distinct bins.
fn window_indices(spectrum: &PowerSpectrum, lower: f64, upper: f64) -> Result<(usize, usize)> {
    let lo = take_closest_index(&spectrum.frequencies, lower)?;
    let hi = take_closest_index(&spectrum.frequencies, upper)?;
    if hi <= lo + 1 {
        return Err(AnalysisError::WindowTooNarrow { lower, upper });
    }
    Ok((lo, hi))
}

/// Index of the maximum power in `[lo, hi)`.
fn max_power_index(spectrum: &PowerSpectrum, lo: usize, hi: usize) -> usize {
    let mut best = lo;
    for i in lo..hi {
        if spectrum.powers[i] > spectrum.powers[best] {
            best = i;
        }
    }
    best
}

/// Index of the element closest in value to `target`, or `None` for an
/// empty segment.
fn closest_power_index(segment: &[f64], target: f64) -> Option<usize> {
    segment
        .iter()
        .enumerate()
        .min_by(|a, b| {
            (a.1 - target)
                .abs()
                .partial_cmp(&(b.1 - target).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Triangular peak over a flat floor: floor 1.0, apex 9.0 at 50 Hz,
    /// rising/falling by 2.0 per bin over 45..55 Hz.
    fn make_triangle() -> PowerSpectrum {
        let frequencies: Vec<f64> = (0..101).map(|i| i as f64).collect();
        let powers: Vec<f64> = (0..101)
            .map(|i| {
                let d = (i as i64 - 50).unsigned_abs() as f64;
                if d <= 4.0 { 9.0 - 2.0 * d } else { 1.0 }
            })
            .collect();
        PowerSpectrum { frequencies, powers }
    }

    #[test]
    fn test_refine_finds_maximum() {
        let spectrum = make_triangle();
        // Off-centre guess still lands on the apex.
        let freq = refine_peak(&spectrum, 47.0, 10.0).unwrap();
        assert!((freq - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_locate_peak_height_and_fwhm() {
        let spectrum = make_triangle();
        let peak = locate_peak(&spectrum, 40.0, 60.0, 1e16).unwrap();
        assert!((peak.centre_freq - 50.0).abs() < 1e-12);
        assert!((peak.height - 9.0).abs() < 1e-12);
        // floor 1.0, apex 9.0 -> half-max 5.0, hit exactly at 48 and 52 Hz
        assert!((peak.fwhm - 4.0).abs() < 1e-12, "fwhm {}", peak.fwhm);
        assert!((peak.damping_guess - 1.0).abs() < 1e-12);
        assert!((peak.amplitude_guess - 9.0e16).abs() < 1e4);
    }

    #[test]
    fn test_recentring_recovers_off_peak_guess() {
        let spectrum = make_triangle();
        // Window [44, 54] is centred at 49, one bin left of the apex.
        let peak = locate_peak(&spectrum, 44.0, 54.0, 1e16).unwrap();
        assert!((peak.centre_freq - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_collapsed_window_reports_too_narrow() {
        let spectrum = make_triangle();
        let err = refine_peak(&spectrum, 50.0, 0.1).unwrap_err();
        assert!(matches!(err, AnalysisError::WindowTooNarrow { .. }));
    }
}
