//! # Trapped-Particle Spectral Analysis
//!
//! Core algorithms for extracting the physical parameters of a trapped,
//! freely fluctuating particle from a sampled voltage record. The crate
//! turns a decoded oscilloscope trace into fitted resonance parameters,
//! particle radius/mass and a volts-to-metres conversion factor, separates
//! the composite signal into its three motional channels, and detects
//! gas-collision phase jumps.
//!
//! ## Pipeline
//!
//! ```text
//! TimeSeries ─ welch ─▶ PowerSpectrum ─ peak ─▶ guesses ─ fit ─▶ PsdFit
//!                                                                 │
//!                                   physics::extract_parameters ◀─┘
//!
//! TimeSeries ─ channels ─▶ ChannelSet (z, x, y) ─ collision ─▶ CollisionRecord
//! ```
//!
//! Decoding the instrument's binary waveform format, locating files, and
//! looking up per-run pressure values are the caller's concern: the crate
//! consumes an already-validated [`TimeSeries`](time_series::TimeSeries)
//! and a plain (pressure, relative error) pair.
//!
//! ## Example
//!
//! ```rust
//! use trapspec_core::prelude::*;
//!
//! // A synthetic record with one resonance line at 50 kHz.
//! let fs = 1.0e6;
//! let voltage: Vec<f64> = (0..16384)
//!     .map(|i| (2.0 * std::f64::consts::PI * 50_000.0 * i as f64 / fs).sin())
//!     .collect();
//! let series = TimeSeries::from_start(0.0, 1.0 / fs, voltage).unwrap();
//!
//! let spectrum = series.psd(&WelchConfig::default()).unwrap();
//! let peak = spectrum.peak_frequency().unwrap();
//! assert!((peak - 50_000.0).abs() < 100.0);
//! ```
//!
//! All operations are synchronous and pure: inputs are immutable, results
//! are explicit values. Recoverable failures (a too-narrow search window, a
//! single non-converging fit) come back as NaN-valued sentinels so batch
//! pipelines keep running; failures with no meaningful fallback (invalid
//! filter specs, exhausted auto-width searches) are hard errors. See
//! [`error::AnalysisError`].

pub mod batch;
pub mod channels;
pub mod collision;
pub mod error;
pub mod fit;
pub mod iir;
pub mod measurement;
pub mod nearest;
pub mod peak;
pub mod physics;
pub mod smoothing;
pub mod time_series;
pub mod welch;

pub use channels::{extract_channels, extract_channels_fft, ChannelConfig, ChannelSet, FilterMode};
pub use collision::{count_collisions, find_collisions, fm_discriminator, CollisionRecord};
pub use error::{AnalysisError, Result};
pub use fit::{
    fit_psd, fit_psd_auto, fit_psd_from_peak, AutoWidthConfig, FitConfig, FitGuesses, PsdFit,
};
pub use iir::{design_bandpass, filtfilt, lfilter, FilterCoefficients, FilterSpec};
pub use measurement::Measurement;
pub use physics::{extract_parameters, PhysicalConstants, PhysicalParameters};
pub use time_series::TimeSeries;
pub use welch::{welch_psd, PowerSpectrum, WelchConfig, WindowFunction};

/// Common imports for typical analysis sessions.
pub mod prelude {
    pub use crate::channels::{extract_channels, extract_channels_fft, ChannelConfig, ChannelSet};
    pub use crate::collision::{count_collisions, find_collisions, CollisionRecord};
    pub use crate::error::{AnalysisError, Result};
    pub use crate::fit::{fit_psd_auto, fit_psd_from_peak, AutoWidthConfig, FitConfig, PsdFit};
    pub use crate::iir::{design_bandpass, FilterSpec};
    pub use crate::measurement::Measurement;
    pub use crate::physics::{extract_parameters, PhysicalConstants, PhysicalParameters};
    pub use crate::time_series::TimeSeries;
    pub use crate::welch::{welch_psd, PowerSpectrum, WelchConfig};
}
