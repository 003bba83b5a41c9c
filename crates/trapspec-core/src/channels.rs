//! Multichannel (z, x, y) motion extraction
//!
//! Separates the three motional channels superimposed on one detector
//! voltage. The three resonance frequencies are first refined by a
//! maximum-power search around the caller's approximate values, then each
//! axis is recovered by designing a bandpass filter around its resonance and
//! applying it zero-phase (forward-backward) or single-pass.
//!
//! Filtering runs on the optionally time-windowed, sub-sampled record. A
//! filter whose frequency response cannot be realized at the full sample
//! rate produces non-finite output; that is reported as a hard failure
//! telling the caller to raise the sub-sampling divisor. The FFT path
//! ([`extract_channels_fft`]) zeroes spectral bins outside each band
//! instead, trading time-localization control for immunity to filter
//! stability.

use crate::error::{AnalysisError, Result};
use crate::iir::{design_bandpass, filtfilt, lfilter, FilterSpec};
use crate::peak::refine_peak;
use crate::time_series::TimeSeries;
use crate::welch::PowerSpectrum;
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

/// How a designed filter is applied to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterMode {
    /// Forward-backward application, zero phase.
    #[default]
    ZeroPhase,
    /// Single forward pass, frequency-dependent phase delay.
    SinglePass,
}

/// Per-extraction configuration. Widths and transitions are ordered
/// (z, x, y).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Passband width of each axis filter, Hz.
    pub peak_widths: [f64; 3],
    /// Transition width of each axis filter, Hz.
    pub transition_widths: [f64; 3],
    /// Sub-sampling divisor applied before filtering.
    pub subsample_divisor: usize,
    /// Filter application mode.
    pub mode: FilterMode,
    /// Optional (start, end) time window in seconds.
    pub time_window: Option<(f64, f64)>,
    /// Stopband attenuation of the axis filters, dB.
    pub stopband_atten_db: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            peak_widths: [10_000.0, 5_000.0, 5_000.0],
            transition_widths: [10_000.0, 5_000.0, 5_000.0],
            subsample_divisor: 1,
            mode: FilterMode::ZeroPhase,
            time_window: None,
            stopband_atten_db: 100.0,
        }
    }
}

/// The three separated channels on their shared time base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSet {
    pub z: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Time axis of the (windowed, sub-sampled) record the channels were
    /// extracted from.
    pub time: Vec<f64>,
    /// Effective sample frequency of the channels.
    pub sample_freq: f64,
}

/// Refine three approximate resonance frequencies to the exact PSD maxima
/// within `bandwidth` of each.
pub fn refine_frequencies(
    spectrum: &PowerSpectrum,
    approx_freqs: [f64; 3],
    bandwidth: f64,
) -> Result<[f64; 3]> {
    Ok([
        refine_peak(spectrum, approx_freqs[0], bandwidth)?,
        refine_peak(spectrum, approx_freqs[1], bandwidth)?,
        refine_peak(spectrum, approx_freqs[2], bandwidth)?,
    ])
}

/// Extract the z, x and y channels by per-axis bandpass filtering.
///
/// The resonance frequencies are refined against `spectrum` first, then the
/// record is windowed and sub-sampled per `config` and each axis filter is
/// designed at the effective sample rate. Non-finite filter output fails
/// with [`AnalysisError::UnstableFilter`].
pub fn extract_channels(
    series: &TimeSeries,
    spectrum: &PowerSpectrum,
    approx_freqs: [f64; 3],
    search_bandwidth: f64,
    config: &ChannelConfig,
) -> Result<ChannelSet> {
    let freqs = refine_frequencies(spectrum, approx_freqs, search_bandwidth)?;

    let windowed;
    let base = match config.time_window {
        Some((start, end)) => {
            windowed = series.window(start, end)?;
            &windowed
        }
        None => series,
    };
    let base = base.subsample(config.subsample_divisor);

    let mut channels: [Vec<f64>; 3] = Default::default();
    for (i, axis) in ['z', 'x', 'y'].into_iter().enumerate() {
        let mut spec =
            FilterSpec::new(freqs[i], config.peak_widths[i], config.transition_widths[i]);
        spec.stopband_atten_db = config.stopband_atten_db;
        let coeffs = design_bandpass(&spec, base.sample_freq())?;
        let filtered = match config.mode {
            FilterMode::ZeroPhase => filtfilt(&coeffs, base.voltage()),
            FilterMode::SinglePass => lfilter(&coeffs, base.voltage()),
        };
        if filtered.iter().any(|v| !v.is_finite()) {
            return Err(AnalysisError::UnstableFilter { axis });
        }
        channels[i] = filtered;
    }

    let [z, x, y] = channels;
    Ok(ChannelSet { z, x, y, time: base.time().to_vec(), sample_freq: base.sample_freq() })
}

/// Extract the z, x and y channels by frequency-domain band cuts.
///
/// Transforms the whole (optionally time-windowed) record, zeroes every bin
/// outside `[f − width/2, f + width/2]` per axis, inverts, and keeps twice
/// the real part. No sub-sampling is involved.
pub fn extract_channels_fft(
    series: &TimeSeries,
    freqs: [f64; 3],
    widths: [f64; 3],
    time_window: Option<(f64, f64)>,
) -> Result<ChannelSet> {
    let windowed;
    let base = match time_window {
        Some((start, end)) => {
            windowed = series.window(start, end)?;
            &windowed
        }
        None => series,
    };

    let z = band_cut(base.voltage(), base.sample_freq(), freqs[0], widths[0]);
    let x = band_cut(base.voltage(), base.sample_freq(), freqs[1], widths[1]);
    let y = band_cut(base.voltage(), base.sample_freq(), freqs[2], widths[2]);

    Ok(ChannelSet { z, x, y, time: base.time().to_vec(), sample_freq: base.sample_freq() })
}

/// Keep only the spectral bins inside `[centre − width/2, centre + width/2]`
/// and invert, taking twice the real part. Negative-frequency bins fall
/// outside any positive band and are zeroed, which is what makes the ×2
/// reconstruction exact for a real input.
fn band_cut(signal: &[f64], sample_freq: f64, centre: f64, width: f64) -> Vec<f64> {
    let n = signal.len();
    let mut planner = FftPlanner::new();
    let mut buffer: Vec<Complex64> =
        signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buffer);

    let lower = centre - width / 2.0;
    let upper = centre + width / 2.0;
    for (i, bin) in buffer.iter_mut().enumerate() {
        let freq = if i <= n / 2 {
            i as f64 * sample_freq / n as f64
        } else {
            (i as f64 - n as f64) * sample_freq / n as f64
        };
        if freq < lower || freq > upper {
            *bin = Complex64::new(0.0, 0.0);
        }
    }

    planner.plan_fft_inverse(n).process(&mut buffer);
    let scale = 2.0 / n as f64;
    buffer.iter().map(|c| c.re * scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::welch::{welch_psd, WelchConfig};
    use std::f64::consts::PI;

    const FS: f64 = 1.0e6;
    const F_Z: f64 = 50_000.0;
    const F_X: f64 = 80_000.0;
    const F_Y: f64 = 120_000.0;

    /// Three tones plus deterministic wideband jitter.
    fn make_series(n: usize) -> TimeSeries {
        let voltage: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 / FS;
                let noise = ((i as f64 * 1.618033).sin() * 43758.5453).fract() * 0.05;
                (2.0 * PI * F_Z * t).sin()
                    + 0.8 * (2.0 * PI * F_X * t).sin()
                    + 0.6 * (2.0 * PI * F_Y * t).sin()
                    + noise
            })
            .collect();
        TimeSeries::from_start(0.0, 1.0 / FS, voltage).unwrap()
    }

    fn spectrum_of(series: &TimeSeries) -> PowerSpectrum {
        let config = WelchConfig { segment_len: Some(8192), ..WelchConfig::default() };
        welch_psd(series.voltage(), series.sample_freq(), &config).unwrap()
    }

    #[test]
    fn test_refine_frequencies_recovers_tones() {
        let series = make_series(32_768);
        let spectrum = spectrum_of(&series);
        let freqs =
            refine_frequencies(&spectrum, [49_000.0, 81_000.0, 119_000.0], 5_000.0).unwrap();
        let resolution = FS / 8192.0;
        assert!((freqs[0] - F_Z).abs() < resolution, "z at {}", freqs[0]);
        assert!((freqs[1] - F_X).abs() < resolution, "x at {}", freqs[1]);
        assert!((freqs[2] - F_Y).abs() < resolution, "y at {}", freqs[2]);
    }

    #[test]
    fn test_extracted_channels_peak_at_their_tones() {
        let series = make_series(32_768);
        let spectrum = spectrum_of(&series);
        let channels = extract_channels(
            &series,
            &spectrum,
            [49_000.0, 81_000.0, 119_000.0],
            5_000.0,
            &ChannelConfig::default(),
        )
        .unwrap();

        assert_eq!(channels.z.len(), channels.time.len());
        assert_eq!(channels.x.len(), channels.time.len());
        assert_eq!(channels.y.len(), channels.time.len());

        let config = WelchConfig { segment_len: Some(8192), ..WelchConfig::default() };
        let resolution = FS / 8192.0;
        for (channel, expected) in
            [(&channels.z, F_Z), (&channels.x, F_X), (&channels.y, F_Y)]
        {
            let psd = welch_psd(channel, channels.sample_freq, &config).unwrap();
            let peak = psd.peak_frequency().unwrap();
            assert!((peak - expected).abs() < resolution, "peak {peak} vs {expected}");
        }
    }

    #[test]
    fn test_zero_phase_keeps_tone_alignment() {
        let series = make_series(16_384);
        let spectrum = spectrum_of(&make_series(32_768));
        let channels = extract_channels(
            &series,
            &spectrum,
            [49_000.0, 81_000.0, 119_000.0],
            5_000.0,
            &ChannelConfig::default(),
        )
        .unwrap();

        // The z channel should line up with the pure z tone.
        let tone: Vec<f64> =
            series.time().iter().map(|&t| (2.0 * PI * F_Z * t).sin()).collect();
        let mid = 8_192;
        let dot: f64 = (mid - 2000..mid + 2000).map(|i| tone[i] * channels.z[i]).sum();
        let norm: f64 = (mid - 2000..mid + 2000).map(|i| tone[i] * tone[i]).sum();
        assert!(dot / norm > 0.7, "correlation {}", dot / norm);
    }

    #[test]
    fn test_subsampling_divides_rate() {
        let series = make_series(32_768);
        let spectrum = spectrum_of(&series);
        let config = ChannelConfig { subsample_divisor: 2, ..ChannelConfig::default() };
        let channels = extract_channels(
            &series,
            &spectrum,
            [49_000.0, 81_000.0, 119_000.0],
            5_000.0,
            &config,
        )
        .unwrap();
        assert!((channels.sample_freq - FS / 2.0).abs() < 1.0);
        assert_eq!(channels.z.len(), 16_384);
    }

    #[test]
    fn test_fft_path_recovers_tones() {
        let series = make_series(16_384);
        let channels = extract_channels_fft(
            &series,
            [F_Z, F_X, F_Y],
            [10_000.0, 5_000.0, 5_000.0],
            None,
        )
        .unwrap();

        let config = WelchConfig { segment_len: Some(4096), ..WelchConfig::default() };
        let resolution = FS / 4096.0;
        for (channel, expected) in
            [(&channels.z, F_Z), (&channels.x, F_X), (&channels.y, F_Y)]
        {
            let psd = welch_psd(channel, channels.sample_freq, &config).unwrap();
            let peak = psd.peak_frequency().unwrap();
            assert!((peak - expected).abs() < resolution, "peak {peak} vs {expected}");
        }

        // Band cut preserves the in-band tone amplitude and phase.
        let tone: Vec<f64> =
            series.time().iter().map(|&t| (2.0 * PI * F_Z * t).sin()).collect();
        let dot: f64 = (4096..12_288).map(|i| tone[i] * channels.z[i]).sum();
        let norm: f64 = (4096..12_288).map(|i| tone[i] * tone[i]).sum();
        assert!((dot / norm - 1.0).abs() < 0.1, "correlation {}", dot / norm);
    }

    #[test]
    fn test_time_window_restricts_record() {
        let series = make_series(32_768);
        let spectrum = spectrum_of(&series);
        let config = ChannelConfig {
            time_window: Some((0.004, 0.012)),
            ..ChannelConfig::default()
        };
        let channels = extract_channels(
            &series,
            &spectrum,
            [49_000.0, 81_000.0, 119_000.0],
            5_000.0,
            &config,
        )
        .unwrap();
        assert!(channels.time[0] >= 0.004 - 1.0 / FS);
        assert!(*channels.time.last().unwrap() <= 0.012 + 1.0 / FS);
        assert_eq!(channels.z.len(), channels.time.len());
    }
}
