//! Collision detection via an FM discriminator
//!
//! A gas-molecule collision shows up as a sudden phase jump in the
//! otherwise steady oscillation of a single-frequency channel. The channel
//! is converted to its analytic (complex) representation, the phase advance
//! between consecutive samples becomes the discriminator sequence,
//!
//! ```text
//! d[n] = arg( s[n+1] · conj(s[n]) )
//! ```
//!
//! and samples whose discriminator value strays from the sequence mean by
//! more than a percentage tolerance are flagged as "during a collision".
//! Rising edges of the flag sequence are the discrete collision events.
//!
//! ## Example
//!
//! ```rust
//! use trapspec_core::collision::{find_collisions, count_collisions};
//!
//! let fs = 100_000.0;
//! let signal: Vec<f64> = (0..2000)
//!     .map(|i| (2.0 * std::f64::consts::PI * 5_000.0 * i as f64 / fs).sin())
//!     .collect();
//! let flags = find_collisions(&signal, 50.0).unwrap();
//! let record = count_collisions(&flags);
//! // A clean tone has a steady phase advance: no events away from the edges.
//! assert_eq!(record.count, record.indices.len());
//! ```

use crate::error::{AnalysisError, Result};
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

/// Collision events found in one channel: the event count and the sample
/// index of each onset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionRecord {
    /// Number of distinct events.
    pub count: usize,
    /// Discriminator-sample index where each event begins.
    pub indices: Vec<usize>,
}

/// Analytic (complex) representation of a real signal.
///
/// FFT based: positive-frequency bins doubled, negative-frequency bins
/// zeroed, DC and Nyquist kept, inverse transformed.
pub fn analytic_signal(signal: &[f64]) -> Result<Vec<Complex64>> {
    let n = signal.len();
    if n == 0 {
        return Err(AnalysisError::EmptyInput);
    }
    let mut planner = FftPlanner::new();
    let mut buffer: Vec<Complex64> = signal.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buffer);

    let half = n / 2;
    for (i, bin) in buffer.iter_mut().enumerate() {
        if i == 0 || (n % 2 == 0 && i == half) {
            // DC and (even-length) Nyquist stay as they are.
        } else if i < half || (n % 2 == 1 && i == half) {
            *bin *= 2.0;
        } else {
            *bin = Complex64::new(0.0, 0.0);
        }
    }

    planner.plan_fft_inverse(n).process(&mut buffer);
    let scale = 1.0 / n as f64;
    Ok(buffer.into_iter().map(|c| c * scale).collect())
}

/// The FM discriminator of a real signal: the phase angle of each analytic
/// sample times the conjugate of its predecessor. One sample shorter than
/// the input.
pub fn fm_discriminator(signal: &[f64]) -> Result<Vec<f64>> {
    let analytic = analytic_signal(signal)?;
    Ok(analytic
        .windows(2)
        .map(|pair| (pair[1] * pair[0].conj()).arg())
        .collect())
}

/// Flag each discriminator sample that deviates from the discriminator mean
/// by more than `tolerance_pct` percent of the mean.
///
/// The output is one sample shorter than the input signal, matching the
/// discriminator length.
pub fn find_collisions(signal: &[f64], tolerance_pct: f64) -> Result<Vec<bool>> {
    let discriminator = fm_discriminator(signal)?;
    if discriminator.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }
    let mean = discriminator.iter().sum::<f64>() / discriminator.len() as f64;
    Ok(discriminator
        .iter()
        .map(|&value| (mean - value).abs() / mean * 100.0 >= tolerance_pct)
        .collect())
}

/// Collapse a collision-flag sequence into discrete events.
///
/// Each false→true transition opens a new event at that index; consecutive
/// true samples belong to the same event, and a run starting at index 0 is
/// treated as carry-over rather than a fresh onset.
pub fn count_collisions(flags: &[bool]) -> CollisionRecord {
    let mut count = 0;
    let mut indices = Vec::new();
    let mut last = true;
    for (i, &flag) in flags.iter().enumerate() {
        if flag && !last {
            indices.push(i);
            count += 1;
        }
        last = flag;
    }
    CollisionRecord { count, indices }
}
