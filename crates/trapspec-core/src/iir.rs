//! IIR bandpass filter design and application
//!
//! Designs a bandpass filter from a passband/stopband specification (centre
//! frequency, passband width, transition width, stopband attenuation) and
//! applies it either single-pass or forward-backward (zero phase).
//!
//! The design is a Chebyshev Type I lowpass/highpass cascade: the order of
//! each half comes from the analog attenuation formula evaluated on the
//! prewarped transition ratio, the analog prototype poles go through the
//! bilinear transform, and the result is realized as cascaded biquad
//! sections. The cascade form keeps high-order designs numerically stable;
//! the expanded feed-forward/feedback polynomial sequences remain available
//! for inspection and interop.
//!
//! ## Example
//!
//! ```rust
//! use trapspec_core::iir::{design_bandpass, filtfilt, FilterSpec};
//!
//! let spec = FilterSpec::new(50_000.0, 10_000.0, 10_000.0);
//! let coeffs = design_bandpass(&spec, 1.0e6).unwrap();
//! let tone: Vec<f64> = (0..4000)
//!     .map(|i| (2.0 * std::f64::consts::PI * 50_000.0 * i as f64 / 1.0e6).sin())
//!     .collect();
//! let filtered = filtfilt(&coeffs, &tone);
//! assert_eq!(filtered.len(), tone.len());
//! ```

use crate::error::{AnalysisError, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Cap on the order of each cascade half.
const MAX_HALF_ORDER: usize = 20;

/// Bandpass filter specification.
///
/// Valid only when the passband plus transition band lies strictly inside
/// (0, Nyquist): `centre + passband/2 + transition ≤ sample_freq/2` and
/// `centre − passband/2 − transition > 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Centre frequency of the passband, Hz.
    pub centre_freq: f64,
    /// Width of the passband, Hz.
    pub passband_width: f64,
    /// Width of the transition band on each side, Hz.
    pub transition_width: f64,
    /// Target stopband attenuation, dB.
    pub stopband_atten_db: f64,
    /// Target passband ripple, dB.
    pub passband_ripple_db: f64,
}

impl FilterSpec {
    /// Spec with the default 40 dB stopband attenuation and 0.01 dB
    /// passband ripple.
    pub fn new(centre_freq: f64, passband_width: f64, transition_width: f64) -> Self {
        Self {
            centre_freq,
            passband_width,
            transition_width,
            stopband_atten_db: 40.0,
            passband_ripple_db: 0.01,
        }
    }
}

/// A single second-order section, Direct Form II Transposed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Biquad {
    /// Numerator coefficients [b0, b1, b2].
    b: [f64; 3],
    /// Denominator coefficients [a1, a2] (a0 normalized to 1).
    a: [f64; 2],
}

impl Biquad {
    fn new(b: [f64; 3], a: [f64; 2]) -> Self {
        Self { b, a }
    }

    /// Run the section over a signal with fresh state.
    fn apply(&self, signal: &mut [f64]) {
        let mut s0 = 0.0;
        let mut s1 = 0.0;
        for x in signal.iter_mut() {
            let input = *x;
            let y = self.b[0] * input + s0;
            s0 = self.b[1] * input - self.a[0] * y + s1;
            s1 = self.b[2] * input - self.a[1] * y;
            *x = y;
        }
    }

    /// Poles inside the unit circle.
    fn is_stable(&self) -> bool {
        self.a[1].abs() < 1.0 && self.a[0].abs() < 1.0 + self.a[1]
    }

    fn response_at(&self, z_inv: Complex64) -> Complex64 {
        let z_inv2 = z_inv * z_inv;
        let num = self.b[0] + self.b[1] * z_inv + self.b[2] * z_inv2;
        let den = 1.0 + self.a[0] * z_inv + self.a[1] * z_inv2;
        num / den
    }
}

/// Designed bandpass filter coefficients: a cascade of biquad sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCoefficients {
    sections: Vec<Biquad>,
}

impl FilterCoefficients {
    /// Filter order (two per section).
    pub fn order(&self) -> usize {
        2 * self.sections.len()
    }

    /// All cascade sections stable.
    pub fn is_stable(&self) -> bool {
        self.sections.iter().all(Biquad::is_stable)
    }

    /// Expanded feed-forward polynomial (coefficients multiplying current
    /// and past inputs).
    pub fn feedforward(&self) -> Vec<f64> {
        self.sections
            .iter()
            .fold(vec![1.0], |acc, s| convolve(&acc, &s.b))
    }

    /// Expanded feedback polynomial (coefficients multiplying past outputs,
    /// leading 1).
    pub fn feedback(&self) -> Vec<f64> {
        self.sections
            .iter()
            .fold(vec![1.0], |acc, s| convolve(&acc, &[1.0, s.a[0], s.a[1]]))
    }

    /// Complex response at a frequency.
    pub fn response_at(&self, freq: f64, sample_freq: f64) -> Complex64 {
        let omega = 2.0 * PI * freq / sample_freq;
        let z_inv = Complex64::new(omega.cos(), -omega.sin());
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response_at(z_inv))
    }

    /// Gain in dB at a frequency.
    pub fn magnitude_db(&self, freq: f64, sample_freq: f64) -> f64 {
        20.0 * self.response_at(freq, sample_freq).norm().log10()
    }

    /// Sampled gain and unwrapped phase response, `num_points` frequencies
    /// from 0 to Nyquist (or the full sample rate when `whole`).
    pub fn frequency_response(
        &self,
        num_points: usize,
        sample_freq: f64,
        whole: bool,
    ) -> FrequencyResponse {
        let span = if whole { sample_freq } else { sample_freq / 2.0 };
        let mut frequencies = Vec::with_capacity(num_points);
        let mut gain_db = Vec::with_capacity(num_points);
        let mut phase = Vec::with_capacity(num_points);
        let mut prev_raw = 0.0f64;
        let mut offset = 0.0f64;
        for i in 0..num_points {
            let f = span * i as f64 / num_points as f64;
            let h = self.response_at(f, sample_freq);
            let raw = h.im.atan2(h.re);
            if i > 0 {
                let mut d = raw - prev_raw;
                while d > PI {
                    d -= 2.0 * PI;
                }
                while d < -PI {
                    d += 2.0 * PI;
                }
                offset += d;
            } else {
                offset = raw;
            }
            prev_raw = raw;
            frequencies.push(f);
            gain_db.push(20.0 * h.norm().log10());
            phase.push(offset);
        }
        FrequencyResponse { frequencies, gain_db, phase }
    }
}

/// Sampled frequency and phase response of a designed filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyResponse {
    /// Frequencies in Hz.
    pub frequencies: Vec<f64>,
    /// Gain in dB.
    pub gain_db: Vec<f64>,
    /// Unwrapped phase in radians.
    pub phase: Vec<f64>,
}

/// Design a bandpass filter meeting the given spec at a sample rate.
///
/// Fails with [`AnalysisError::FilterSpecOutOfRange`] when the passband
/// plus transition band does not fit inside (0, Nyquist).
pub fn design_bandpass(spec: &FilterSpec, sample_freq: f64) -> Result<FilterCoefficients> {
    let nyquist = sample_freq / 2.0;
    let pass_lo = spec.centre_freq - spec.passband_width / 2.0;
    let pass_hi = spec.centre_freq + spec.passband_width / 2.0;
    if spec.passband_width <= 0.0
        || spec.transition_width <= 0.0
        || pass_hi + spec.transition_width > nyquist
        || pass_lo - spec.transition_width <= 0.0
    {
        return Err(AnalysisError::FilterSpecOutOfRange { centre: spec.centre_freq, nyquist });
    }

    // Prewarped transition ratios for each cascade half.
    let warp = |f: f64| (PI * f / sample_freq).tan();
    let lp_ratio = warp(pass_hi + spec.transition_width) / warp(pass_hi);
    let hp_ratio = warp(pass_lo) / warp(pass_lo - spec.transition_width);

    let lp_order = chebyshev_order(lp_ratio, spec.passband_ripple_db, spec.stopband_atten_db);
    let hp_order = chebyshev_order(hp_ratio, spec.passband_ripple_db, spec.stopband_atten_db);
    tracing::debug!(
        "bandpass design around {:.1} Hz: lowpass order {lp_order}, highpass order {hp_order}",
        spec.centre_freq
    );

    let mut sections =
        design_chebyshev1(lp_order, spec.passband_ripple_db, pass_hi, sample_freq, Band::Lowpass);
    sections.extend(design_chebyshev1(
        hp_order,
        spec.passband_ripple_db,
        pass_lo,
        sample_freq,
        Band::Highpass,
    ));
    Ok(FilterCoefficients { sections })
}

/// Single-pass application (Direct Form II Transposed cascade). Output has
/// the filter's frequency-dependent phase delay.
pub fn lfilter(coeffs: &FilterCoefficients, signal: &[f64]) -> Vec<f64> {
    let mut out = signal.to_vec();
    for section in &coeffs.sections {
        section.apply(&mut out);
    }
    out
}

/// Zero-phase forward-backward application with odd-extension padding at
/// both ends to suppress edge transients.
pub fn filtfilt(coeffs: &FilterCoefficients, signal: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    let pad = (3 * (coeffs.order() + 1)).min(signal.len() - 1);
    let n = signal.len();

    let mut extended = Vec::with_capacity(n + 2 * pad);
    for i in (1..=pad).rev() {
        extended.push(2.0 * signal[0] - signal[i]);
    }
    extended.extend_from_slice(signal);
    for i in 1..=pad {
        extended.push(2.0 * signal[n - 1] - signal[n - 1 - i]);
    }

    let mut forward = lfilter(coeffs, &extended);
    forward.reverse();
    let mut backward = lfilter(coeffs, &forward);
    backward.reverse();

    backward[pad..pad + n].to_vec()
}

#[derive(Clone, Copy, PartialEq)]
enum Band {
    Lowpass,
    Highpass,
}

/// Minimum Chebyshev Type I order meeting `atten_db` of stopband
/// attenuation at `ratio` times the passband edge, capped at
/// [`MAX_HALF_ORDER`].
fn chebyshev_order(ratio: f64, ripple_db: f64, atten_db: f64) -> usize {
    if ratio <= 1.0 {
        return MAX_HALF_ORDER;
    }
    let num = ((10f64.powf(atten_db / 10.0) - 1.0) / (10f64.powf(ripple_db / 10.0) - 1.0))
        .sqrt()
        .acosh();
    let order = (num / ratio.acosh()).ceil() as usize;
    order.clamp(1, MAX_HALF_ORDER)
}

/// Design one Chebyshev Type I half (lowpass or highpass) as biquad
/// sections via prewarp and bilinear transform.
///
/// One second-order section per conjugate pole pair (the upper-half pole
/// carries the pair), plus a first-order section for the real pole of odd
/// orders.
fn design_chebyshev1(
    order: usize,
    ripple_db: f64,
    cutoff_hz: f64,
    sample_freq: f64,
    band: Band,
) -> Vec<Biquad> {
    let epsilon = (10f64.powf(ripple_db / 10.0) - 1.0).sqrt();
    let a = (1.0 / epsilon + (1.0 / (epsilon * epsilon) + 1.0).sqrt()).ln() / order as f64;

    let wc = 2.0 * sample_freq * (PI * cutoff_hz / sample_freq).tan();
    let k = 2.0 * sample_freq;

    let mut sections = Vec::new();
    for pair in 0..order / 2 {
        let theta = PI * (2 * pair + 1) as f64 / (2 * order) as f64;
        let pole = Complex64::new(-a.sinh() * theta.sin(), a.cosh() * theta.cos());
        sections.push(bilinear_2pole(pole * wc, k, band));
    }
    if order % 2 == 1 {
        sections.push(bilinear_1pole(-a.sinh() * wc, k, band));
    }
    sections
}

/// Bilinear transform of a single real pole.
fn bilinear_1pole(p: f64, k: f64, band: Band) -> Biquad {
    let alpha = k - p;
    let beta = k + p;
    match band {
        Band::Lowpass => Biquad::new([-p / alpha, -p / alpha, 0.0], [-beta / alpha, 0.0]),
        Band::Highpass => Biquad::new([k / alpha, -k / alpha, 0.0], [-beta / alpha, 0.0]),
    }
}

/// Bilinear transform of a complex-conjugate pole pair.
fn bilinear_2pole(p: Complex64, k: f64, band: Band) -> Biquad {
    let mag_sq = p.norm_sqr();
    let k2 = k * k;
    let d = k2 - 2.0 * k * p.re + mag_sq;
    let a1 = 2.0 * (mag_sq - k2) / d;
    let a2 = (k2 + 2.0 * k * p.re + mag_sq) / d;
    match band {
        Band::Lowpass => {
            Biquad::new([mag_sq / d, 2.0 * mag_sq / d, mag_sq / d], [a1, a2])
        }
        Band::Highpass => Biquad::new([k2 / d, -2.0 * k2 / d, k2 / d], [a1, a2]),
    }
}

/// Polynomial product.
fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            out[i + j] += ai * bj;
        }
    }
    out
}
