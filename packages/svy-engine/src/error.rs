// src/error.rs

use thiserror::Error;

/// Errors raised by the weighting and variance engine.
///
/// Structural problems (malformed designs, singular systems, impossible
/// pairings) are always fatal. Raking non-convergence and extreme
/// calibration factors are *not* errors; they are reported through
/// [`crate::weighting::ConvergenceReport`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurveyError {
    #[error("Invalid design: {0}")]
    DesignSpec(String),

    #[error("Degenerate cell {cell}: {reason}")]
    DegenerateCell { cell: String, reason: String },

    #[error("Singular calibration system: pivot {pivot:.3e} at auxiliary {column} ({name}); drop a redundant auxiliary variable")]
    SingularCalibration { column: usize, name: String, pivot: f64 },

    #[error("BRR requires 2 clusters per stratum, stratum {stratum} has {clusters}")]
    UnbalancedDesign { stratum: String, clusters: usize },

    #[error("Unsupported estimator: {0}")]
    UnsupportedEstimator(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Unknown variable: {0}")]
    MissingVariable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SurveyError {
    pub(crate) fn degenerate(cell: impl ToString, reason: impl Into<String>) -> Self {
        SurveyError::DegenerateCell { cell: cell.to_string(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, SurveyError>;

/// Check that a per-unit array has one entry per unit.
pub(crate) fn check_len(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(SurveyError::DimensionMismatch { expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = SurveyError::UnbalancedDesign { stratum: "north".into(), clusters: 3 };
        assert_eq!(err.to_string(), "BRR requires 2 clusters per stratum, stratum north has 3");

        let err = SurveyError::degenerate(4, "no respondents");
        assert_eq!(err.to_string(), "Degenerate cell 4: no respondents");
    }

    #[test]
    fn test_check_len() {
        assert!(check_len(3, 3).is_ok());
        assert_eq!(check_len(3, 2), Err(SurveyError::DimensionMismatch { expected: 3, got: 2 }));
    }
}
