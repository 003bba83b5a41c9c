//! Sampled voltage time series
//!
//! A [`TimeSeries`] is the decoded output of an oscilloscope record: a
//! uniformly sampled time axis (seconds) and the matching voltage samples
//! (volts). Construction validates the invariants once; the series is
//! immutable afterwards and every derived operation returns new arrays.
//!
//! ## Example
//!
//! ```rust
//! use trapspec_core::time_series::TimeSeries;
//!
//! let ts = TimeSeries::from_start(0.0, 1e-6, vec![0.0; 1000]).unwrap();
//! assert!((ts.sample_freq() - 1e6).abs() < 1.0);
//! let sub = ts.subsample(4);
//! assert_eq!(sub.len(), 250);
//! assert!((sub.sample_freq() - 2.5e5).abs() < 1.0);
//! ```

use crate::error::{AnalysisError, Result};
use crate::nearest::take_closest_index;
use crate::welch::{welch_psd, PowerSpectrum, WelchConfig};

/// Relative tolerance on sample-interval uniformity.
const INTERVAL_TOLERANCE: f64 = 1e-6;

/// An immutable, uniformly sampled voltage record.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    time: Vec<f64>,
    voltage: Vec<f64>,
    sample_freq: f64,
}

impl TimeSeries {
    /// Build a series from matching time and voltage sequences.
    ///
    /// Validates equal lengths, at least two samples, and a strictly
    /// increasing, uniform time base.
    pub fn from_samples(time: Vec<f64>, voltage: Vec<f64>) -> Result<Self> {
        if time.is_empty() || voltage.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        if time.len() != voltage.len() {
            return Err(AnalysisError::InvalidSeries(format!(
                "time has {} samples but voltage has {}",
                time.len(),
                voltage.len()
            )));
        }
        if time.len() < 2 {
            return Err(AnalysisError::InvalidSeries(
                "need at least two samples to define a sample interval".into(),
            ));
        }
        let dt = time[1] - time[0];
        if dt <= 0.0 {
            return Err(AnalysisError::InvalidSeries(
                "time base must be strictly increasing".into(),
            ));
        }
        for (i, pair) in time.windows(2).enumerate() {
            let step = pair[1] - pair[0];
            if step <= 0.0 || ((step - dt) / dt).abs() > INTERVAL_TOLERANCE {
                return Err(AnalysisError::InvalidSeries(format!(
                    "non-uniform sample interval at index {}: {:.3e} vs {:.3e}",
                    i + 1,
                    step,
                    dt
                )));
            }
        }
        Ok(Self { time, voltage, sample_freq: 1.0 / dt })
    }

    /// Build a series from a start time, sample interval and voltage samples.
    pub fn from_start(t0: f64, dt: f64, voltage: Vec<f64>) -> Result<Self> {
        if voltage.len() < 2 {
            return Err(AnalysisError::InvalidSeries(
                "need at least two samples to define a sample interval".into(),
            ));
        }
        if dt <= 0.0 {
            return Err(AnalysisError::InvalidSeries(
                "sample interval must be positive".into(),
            ));
        }
        let time = (0..voltage.len()).map(|i| t0 + i as f64 * dt).collect();
        Ok(Self { time, voltage, sample_freq: 1.0 / dt })
    }

    /// Time axis in seconds.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Voltage samples in volts.
    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    /// Sample frequency in Hz (1 / sample interval).
    pub fn sample_freq(&self) -> f64 {
        self.sample_freq
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    /// True if the series holds no samples (unreachable after construction).
    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    /// Extract the sub-series between two times, bounds resolved to the
    /// nearest samples. The end bound is exclusive.
    pub fn window(&self, start: f64, end: f64) -> Result<Self> {
        let lo = take_closest_index(&self.time, start)?;
        let hi = take_closest_index(&self.time, end)?;
        if hi.saturating_sub(lo) < 2 {
            return Err(AnalysisError::InvalidSeries(format!(
                "time window [{start}, {end}] selects fewer than two samples"
            )));
        }
        Ok(Self {
            time: self.time[lo..hi].to_vec(),
            voltage: self.voltage[lo..hi].to_vec(),
            sample_freq: self.sample_freq,
        })
    }

    /// Keep every `divisor`-th sample, dividing the effective sample rate.
    ///
    /// A divisor of 0 is treated as 1 (no sub-sampling).
    pub fn subsample(&self, divisor: usize) -> Self {
        let divisor = divisor.max(1);
        Self {
            time: self.time.iter().copied().step_by(divisor).collect(),
            voltage: self.voltage.iter().copied().step_by(divisor).collect(),
            sample_freq: self.sample_freq / divisor as f64,
        }
    }

    /// Estimate the power spectral density of this record.
    pub fn psd(&self, config: &WelchConfig) -> Result<PowerSpectrum> {
        welch_psd(&self.voltage, self.sample_freq, config)
    }
}
