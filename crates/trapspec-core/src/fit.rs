//! Nonlinear PSD peak fitting
//!
//! Fits the damped-harmonic-oscillator PSD model to a windowed, optionally
//! smoothed segment of a power spectrum. The model is fitted in the
//! log-power domain,
//!
//! ```text
//! 10·log10( A / ((Ω²ₜᵣₐₚ − ω²)² + (ω·Γ)²) )
//! ```
//!
//! with ω the angular frequency. Parameters are found by a damped
//! (Levenberg-Marquardt) least-squares iteration with a numerical Jacobian;
//! standard errors come from the parameter covariance at the solution.
//!
//! [`fit_psd`] is the raw engine and fails hard on non-convergence.
//! [`fit_psd_from_peak`] seeds the engine from a located peak and returns a
//! NaN-valued sentinel on recoverable failures so batch pipelines keep
//! running. [`fit_psd_auto`] scans a descending ladder of window widths and
//! keeps the fit with the smallest combined relative error.

use crate::error::{AnalysisError, Result};
use crate::measurement::Measurement;
use crate::nearest::take_closest_index;
use crate::peak::{locate_peak, AMPLITUDE_CALIBRATION};
use crate::smoothing::moving_average;
use crate::welch::PowerSpectrum;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Penalty returned by the log-power model when any parameter has gone
/// negative, steering the optimizer away from unphysical regions without
/// constraining the parameter space.
pub const MODEL_PENALTY_DB: f64 = 1e9;

/// Relative step used for the forward-difference Jacobian.
const JACOBIAN_STEP: f64 = 1e-4;

/// The PSD model in linear power, `A / ((Ω² − ω²)² + (ω·Γ)²)`.
pub fn psd_model(amplitude: f64, omega_trap: f64, gamma: f64, omega: f64) -> f64 {
    let detuning = omega_trap * omega_trap - omega * omega;
    amplitude / (detuning * detuning + (omega * gamma).powi(2))
}

/// The fit target: the model in dB, with the negative-parameter guard.
pub fn psd_model_db(amplitude: f64, omega_trap: f64, gamma: f64, omega: f64) -> f64 {
    if amplitude < 0.0 || omega_trap < 0.0 || gamma < 0.0 {
        return MODEL_PENALTY_DB;
    }
    10.0 * psd_model(amplitude, omega_trap, gamma, omega).log10()
}

/// Initial amplitude and damping values for a fit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitGuesses {
    /// Initial amplitude parameter.
    pub amplitude: f64,
    /// Initial damping parameter.
    pub damping: f64,
}

impl Default for FitGuesses {
    fn default() -> Self {
        Self { amplitude: 0.1e10, damping: 400.0 }
    }
}

/// Fit engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Points of trailing moving average applied to the PSD and its
    /// frequency axis before fitting; 1 means no smoothing.
    pub smoothing_points: usize,
    /// Iteration cap for the optimizer.
    pub max_iterations: usize,
    /// Convergence threshold on the relative parameter step.
    pub tolerance: f64,
    /// Peak-height-to-amplitude calibration used when seeding from a
    /// located peak. See [`AMPLITUDE_CALIBRATION`].
    pub amplitude_calibration: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            smoothing_points: 1,
            max_iterations: 100,
            tolerance: 1e-10,
            amplitude_calibration: AMPLITUDE_CALIBRATION,
        }
    }
}

/// Width ladder for [`fit_psd_auto`]: candidate window widths descend from
/// `max_width` to `min_width` in steps of `width_step` (all in Hz).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoWidthConfig {
    pub max_width: f64,
    pub min_width: f64,
    pub width_step: f64,
}

impl Default for AutoWidthConfig {
    fn default() -> Self {
        Self { max_width: 15_000.0, min_width: 500.0, width_step: 500.0 }
    }
}

/// A completed PSD fit.
///
/// The trap frequency is in angular units (rad/s). `fit_frequencies` and
/// `fit_log_psd` are the windowed, smoothed angular axis and log-power
/// series the optimizer actually saw, kept so callers can overlay the
/// initial-guess and fitted curves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsdFit {
    pub amplitude: Measurement,
    pub trap_freq: Measurement,
    pub damping: Measurement,
    /// Initial parameter vector `[A, Ω_trap, Γ]`.
    pub initial_guess: [f64; 3],
    /// Angular frequencies of the fitted window, rad/s.
    pub fit_frequencies: Vec<f64>,
    /// Smoothed log-power values of the fitted window, dB.
    pub fit_log_psd: Vec<f64>,
}

impl PsdFit {
    /// NaN sentinel for recoverable failures.
    pub fn nan() -> Self {
        Self {
            amplitude: Measurement::nan(),
            trap_freq: Measurement::nan(),
            damping: Measurement::nan(),
            initial_guess: [f64::NAN; 3],
            fit_frequencies: Vec::new(),
            fit_log_psd: Vec::new(),
        }
    }

    /// True if this fit is the NaN sentinel.
    pub fn is_nan(&self) -> bool {
        self.amplitude.is_nan() || self.trap_freq.is_nan() || self.damping.is_nan()
    }

    /// Evaluate the fitted model in dB at an angular frequency.
    pub fn model_db(&self, omega: f64) -> f64 {
        psd_model_db(self.amplitude.value, self.trap_freq.value, self.damping.value, omega)
    }

    /// Combined badness score: the sum of squared relative standard errors
    /// of the three parameters. NaN for a sentinel fit.
    pub fn badness(&self) -> f64 {
        self.amplitude.relative_err().powi(2)
            + self.damping.relative_err().powi(2)
            + self.trap_freq.relative_err().powi(2)
    }
}

/// Fit the oscillator model to the PSD peak nearest `trap_freq_guess`.
///
/// `trap_freq_guess` and `bandwidth` are in Hz; fitting happens in angular
/// frequency. The window is re-centred once on the located maximum. Fails
/// with [`AnalysisError::WindowTooNarrow`] when the window holds too few
/// points and [`AnalysisError::FitDidNotConverge`] when the optimizer runs
/// out of iterations.
pub fn fit_psd(
    spectrum: &PowerSpectrum,
    trap_freq_guess: f64,
    bandwidth: f64,
    guesses: &FitGuesses,
    config: &FitConfig,
) -> Result<PsdFit> {
    if spectrum.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    let ang_freqs: Vec<f64> = spectrum.frequencies.iter().map(|f| 2.0 * PI * f).collect();
    let ang_bandwidth = 2.0 * PI * bandwidth;
    let ang_guess = 2.0 * PI * trap_freq_guess;

    // Locate the window around the guess, then re-centre it on the true
    // maximum; the guess may sit off-peak.
    let (lo, hi) = angular_window(&ang_freqs, ang_guess, ang_bandwidth)?;
    let peak_idx = max_index(&spectrum.powers[lo..hi]) + lo;
    let omega_trap_guess = ang_freqs[peak_idx];
    let (lo, hi) = angular_window(&ang_freqs, omega_trap_guess, ang_bandwidth)?;

    // Smooth the PSD and the axis together so the two stay aligned, then
    // re-resolve the window on the smoothed axis.
    let smoothed_psd = moving_average(&spectrum.powers, config.smoothing_points);
    let smoothed_freqs = moving_average(&ang_freqs, config.smoothing_points);
    let (lo, hi) = if config.smoothing_points > 1 {
        angular_window(&smoothed_freqs, omega_trap_guess, ang_bandwidth)?
    } else {
        (lo, hi)
    };

    let datax = &smoothed_freqs[lo..hi];
    let datay: Vec<f64> = smoothed_psd[lo..hi].iter().map(|p| 10.0 * p.log10()).collect();
    if datax.len() <= 3 {
        return Err(AnalysisError::WindowTooNarrow {
            lower: (omega_trap_guess - ang_bandwidth / 2.0) / (2.0 * PI),
            upper: (omega_trap_guess + ang_bandwidth / 2.0) / (2.0 * PI),
        });
    }

    let p0 = [guesses.amplitude, omega_trap_guess, guesses.damping];
    let (params, errors) = levenberg_marquardt(datax, &datay, p0, config)?;

    Ok(PsdFit {
        amplitude: Measurement::new(params[0], errors[0]),
        trap_freq: Measurement::new(params[1], errors[1]),
        damping: Measurement::new(params[2], errors[2]),
        initial_guess: p0,
        fit_frequencies: datax.to_vec(),
        fit_log_psd: datay,
    })
}

/// Locate the peak between `lower_freq` and `upper_freq`, seed the fit from
/// its height and width, and fit over half the window width.
///
/// Recoverable failures (window too narrow, non-convergence) are logged and
/// returned as the NaN sentinel so batch pipelines keep running.
pub fn fit_psd_from_peak(
    spectrum: &PowerSpectrum,
    lower_freq: f64,
    upper_freq: f64,
    config: &FitConfig,
) -> Result<PsdFit> {
    let peak = match locate_peak(spectrum, lower_freq, upper_freq, config.amplitude_calibration) {
        Ok(peak) => peak,
        Err(err) if err.is_recoverable() => {
            tracing::warn!("peak search in [{lower_freq}, {upper_freq}] Hz failed: {err}");
            return Ok(PsdFit::nan());
        }
        Err(err) => return Err(err),
    };

    let guesses = FitGuesses { amplitude: peak.amplitude_guess, damping: peak.damping_guess };
    let bandwidth = (upper_freq - lower_freq) / 2.0;
    match fit_psd(spectrum, peak.centre_freq, bandwidth, &guesses, config) {
        Ok(fit) => Ok(fit),
        Err(err) if err.is_recoverable() => {
            tracing::warn!("fit around {:.1} Hz failed: {err}", peak.centre_freq);
            Ok(PsdFit::nan())
        }
        Err(err) => Err(err),
    }
}

/// Fit over a descending ladder of window widths and return the fit with
/// the smallest combined relative error.
///
/// Candidate widths whose fit fails are excluded; if every width fails the
/// search fails hard with [`AnalysisError::NoViableFit`]. The winning width
/// is refitted once to produce the returned result.
pub fn fit_psd_auto(
    spectrum: &PowerSpectrum,
    centre_freq: f64,
    widths: &AutoWidthConfig,
    config: &FitConfig,
) -> Result<PsdFit> {
    let mut best_width = None;
    let mut best_badness = f64::INFINITY;

    let mut width = widths.max_width;
    while width >= widths.min_width {
        let fit =
            fit_psd_from_peak(spectrum, centre_freq - width / 2.0, centre_freq + width / 2.0, config)?;
        let badness = fit.badness();
        // NaN badness (sentinel or NaN errors) never compares below best.
        if badness < best_badness {
            best_badness = badness;
            best_width = Some(width);
        }
        width -= widths.width_step;
    }

    let Some(width) = best_width else {
        return Err(AnalysisError::NoViableFit {
            min_width: widths.min_width,
            max_width: widths.max_width,
        });
    };
    tracing::debug!("auto-width search selected {width:.0} Hz (badness {best_badness:.3e})");
    fit_psd_from_peak(spectrum, centre_freq - width / 2.0, centre_freq + width / 2.0, config)
}

/// Resolve `centre ± bandwidth/2` on a sorted angular axis, requiring at
/// least two distinct bins.
fn angular_window(ang_freqs: &[f64], centre: f64, bandwidth: f64) -> Result<(usize, usize)> {
    let lo = take_closest_index(ang_freqs, centre - bandwidth / 2.0)?;
    let hi = take_closest_index(ang_freqs, centre + bandwidth / 2.0)?;
    if hi <= lo + 1 {
        return Err(AnalysisError::WindowTooNarrow {
            lower: (centre - bandwidth / 2.0) / (2.0 * PI),
            upper: (centre + bandwidth / 2.0) / (2.0 * PI),
        });
    }
    Ok((lo, hi))
}

fn max_index(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Sum of squared residuals of the model against the data.
fn sum_squared_residuals(params: &[f64; 3], datax: &[f64], datay: &[f64]) -> f64 {
    datax
        .iter()
        .zip(datay)
        .map(|(&x, &y)| {
            let r = psd_model_db(params[0], params[1], params[2], x) - y;
            r * r
        })
        .sum()
}

/// Damped least-squares iteration over the three model parameters.
///
/// Returns the fitted parameters and their standard errors (square roots of
/// the covariance diagonal, `cov = (JᵀJ)⁻¹·SSR/(n−3)`); a non-finite
/// diagonal entry yields a NaN error for that parameter only.
fn levenberg_marquardt(
    datax: &[f64],
    datay: &[f64],
    p0: [f64; 3],
    config: &FitConfig,
) -> Result<([f64; 3], [f64; 3])> {
    let n = datax.len();
    let mut params = p0;
    let mut ssr = sum_squared_residuals(&params, datax, datay);
    let mut lambda = 1e-3;
    let mut converged = false;

    for _ in 0..config.max_iterations {
        let (jtj, jtr) = normal_equations(&params, datax, datay);

        // Marquardt scaling: damp each diagonal entry relative to itself so
        // the wildly different parameter magnitudes stay balanced.
        let mut damped = jtj;
        for j in 0..3 {
            damped[j][j] += lambda * jtj[j][j].max(f64::MIN_POSITIVE);
        }
        let Some(delta) = solve3(damped, [-jtr[0], -jtr[1], -jtr[2]]) else {
            lambda *= 10.0;
            if lambda > 1e12 {
                converged = true;
                break;
            }
            continue;
        };

        let trial = [params[0] + delta[0], params[1] + delta[1], params[2] + delta[2]];
        let trial_ssr = sum_squared_residuals(&trial, datax, datay);

        if trial_ssr < ssr {
            let step: f64 = (0..3)
                .map(|j| (delta[j] / params[j].abs().max(f64::MIN_POSITIVE)).powi(2))
                .sum::<f64>()
                .sqrt();
            let improvement = (ssr - trial_ssr) / ssr.max(f64::MIN_POSITIVE);
            params = trial;
            ssr = trial_ssr;
            lambda = (lambda / 10.0).max(1e-12);
            if step < config.tolerance || improvement < config.tolerance {
                converged = true;
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                // Even a near-gradient step at maximum damping cannot
                // improve the residual: we are at a local minimum.
                converged = true;
                break;
            }
        }
    }

    if !converged {
        return Err(AnalysisError::FitDidNotConverge {
            iterations: config.max_iterations,
            residual: ssr,
        });
    }

    // Covariance from the undamped normal matrix at the solution.
    let (jtj, _) = normal_equations(&params, datax, datay);
    let variance = ssr / (n - 3) as f64;
    let cov_diag = invert3_diagonal(jtj).map(|d| d.map(|v| v * variance));
    let errors = match cov_diag {
        Some(diag) => diag.map(|v| if v.is_finite() && v >= 0.0 { v.sqrt() } else { f64::NAN }),
        None => [f64::NAN; 3],
    };

    Ok((params, errors))
}

/// Build `JᵀJ` and `Jᵀr` with a forward-difference Jacobian.
fn normal_equations(params: &[f64; 3], datax: &[f64], datay: &[f64]) -> ([[f64; 3]; 3], [f64; 3]) {
    let mut jtj = [[0.0f64; 3]; 3];
    let mut jtr = [0.0f64; 3];

    let mut steps = [0.0f64; 3];
    let mut stepped = [*params; 3];
    for j in 0..3 {
        steps[j] = params[j].abs().max(1e-12) * JACOBIAN_STEP;
        stepped[j][j] += steps[j];
    }

    for (&x, &y) in datax.iter().zip(datay) {
        let base = psd_model_db(params[0], params[1], params[2], x);
        let r = base - y;
        let mut row = [0.0f64; 3];
        for j in 0..3 {
            let shifted = psd_model_db(stepped[j][0], stepped[j][1], stepped[j][2], x);
            row[j] = (shifted - base) / steps[j];
        }
        for a in 0..3 {
            for b in 0..3 {
                jtj[a][b] += row[a] * row[b];
            }
            jtr[a] += row[a] * r;
        }
    }
    (jtj, jtr)
}

/// Solve a 3×3 linear system by Gaussian elimination with partial pivoting.
fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| {
            a[i][col].abs().partial_cmp(&a[j][col].abs()).unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in (col + 1)..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0f64; 3];
    for row in (0..3).rev() {
        let mut sum = b[row];
        for k in (row + 1)..3 {
            sum -= a[row][k] * x[k];
        }
        x[row] = sum / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Diagonal of the inverse of a symmetric 3×3 matrix, or `None` when
/// singular.
fn invert3_diagonal(a: [[f64; 3]; 3]) -> Option<[f64; 3]> {
    let mut diag = [0.0f64; 3];
    for j in 0..3 {
        let mut e = [0.0f64; 3];
        e[j] = 1.0;
        let col = solve3(a, e)?;
        diag[j] = col[j];
    }
    Some(diag)
}
