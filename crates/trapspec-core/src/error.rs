//! Analysis error types

use thiserror::Error;

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors that can occur while turning a time series into fitted parameters
/// and separated channels.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// An input sequence was empty where at least one element is required.
    #[error("input sequence is empty")]
    EmptyInput,

    /// Time and voltage sequences disagree, or the time base is not
    /// uniformly and strictly increasing.
    #[error("invalid time series: {0}")]
    InvalidSeries(String),

    /// Welch segment length is zero or exceeds the signal length.
    #[error("invalid segment length {segment_len} for signal of {signal_len} samples")]
    InvalidSegmentLength { segment_len: usize, signal_len: usize },

    /// The search bandwidth is too small to contain a resolvable peak or a
    /// half-maximum crossing.
    #[error("search window [{lower:.1} Hz, {upper:.1} Hz] too narrow to resolve a peak")]
    WindowTooNarrow { lower: f64, upper: f64 },

    /// The optimizer did not converge within its iteration limit.
    #[error("fit did not converge after {iterations} iterations (residual={residual:.3e})")]
    FitDidNotConverge { iterations: usize, residual: f64 },

    /// Every candidate width in an auto-width search failed to fit.
    #[error("no candidate width between {min_width:.0} and {max_width:.0} Hz produced a viable fit")]
    NoViableFit { min_width: f64, max_width: f64 },

    /// The requested passband plus transition band falls outside
    /// (0, Nyquist).
    #[error(
        "filter spec out of range: passband plus transition band around \
         {centre:.1} Hz must lie inside (0 Hz, {nyquist:.1} Hz); pick a narrower \
         spec or a higher sample rate"
    )]
    FilterSpecOutOfRange { centre: f64, nyquist: f64 },

    /// Filtering produced non-finite samples. The designed filter was not
    /// numerically stable at this sample rate; increase the sub-sampling
    /// divisor so the filter is designed at a lower rate.
    #[error(
        "filter output for the {axis} axis contains non-finite samples; \
         increase the sub-sampling divisor"
    )]
    UnstableFilter { axis: char },
}

impl AnalysisError {
    /// Whether a NaN-valued sentinel result is a meaningful substitute for
    /// this error in a batch pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AnalysisError::WindowTooNarrow { .. } | AnalysisError::FitDidNotConverge { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_remedy() {
        let err = AnalysisError::UnstableFilter { axis: 'z' };
        let msg = err.to_string();
        assert!(msg.contains('z'));
        assert!(msg.contains("sub-sampling"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(AnalysisError::WindowTooNarrow { lower: 0.0, upper: 1.0 }.is_recoverable());
        assert!(AnalysisError::FitDidNotConverge { iterations: 100, residual: 1.0 }
            .is_recoverable());
        assert!(!AnalysisError::NoViableFit { min_width: 500.0, max_width: 15000.0 }
            .is_recoverable());
        assert!(!AnalysisError::FilterSpecOutOfRange { centre: 1e6, nyquist: 5e5 }
            .is_recoverable());
    }
}
