//! Core types for electrode compensation
//!
//! This module defines the error taxonomy shared by every block in the
//! library, the common result alias, and the validation helpers applied to
//! trace pairs before any estimation or compensation runs.
//!
//! ## Trace conventions
//!
//! A trace is a plain `&[f64]` of samples taken at a fixed sampling interval
//! `dt` (seconds). Current and voltage traces passed to the same operation
//! must have identical length and identical `dt`. The library never sees
//! NaN or Inf values: callers strip or reject them before invocation.
//!
//! ## Error taxonomy
//!
//! - [`AecError::InvalidInput`]: the caller handed over data that cannot be
//!   processed at all (mismatched lengths, empty traces, out-of-range
//!   kernel sizes or configuration values).
//! - [`AecError::IllConditioned`]: the data is structurally valid but the
//!   resulting linear system is numerically singular, e.g. a current trace
//!   with near-zero variance. This is surfaced, never regularized away
//!   silently.
//! - [`AecError::ConvergenceFailure`]: an iterative fit ran out of its
//!   iteration budget before reaching the requested tolerance.

/// A floating point sample (all traces and kernels are real-valued).
pub type Sample = f64;

/// Result type for compensation operations.
pub type AecResult<T> = Result<T, AecError>;

/// Errors that can occur during kernel estimation, decomposition or
/// compensation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AecError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ill-conditioned linear system: {0}")]
    IllConditioned(String),

    #[error("fit did not converge after {iterations} iterations (residual {residual:.6e})")]
    ConvergenceFailure { iterations: usize, residual: f64 },
}

/// Validate a current/voltage trace pair and sampling interval.
///
/// Checks that both traces are non-empty, have the same length, and that
/// `dt` is strictly positive and finite.
pub(crate) fn check_trace_pair(current: &[f64], voltage: &[f64], dt: f64) -> AecResult<()> {
    if current.is_empty() || voltage.is_empty() {
        return Err(AecError::InvalidInput("empty trace".into()));
    }
    if current.len() != voltage.len() {
        return Err(AecError::InvalidInput(format!(
            "trace length mismatch: current has {} samples, voltage has {}",
            current.len(),
            voltage.len()
        )));
    }
    if !(dt.is_finite() && dt > 0.0) {
        return Err(AecError::InvalidInput(format!(
            "sampling interval must be positive and finite, got {}",
            dt
        )));
    }
    Ok(())
}

/// Validate a current/voltage pair where no sampling interval is involved.
pub(crate) fn check_equal_traces(current: &[f64], voltage: &[f64]) -> AecResult<()> {
    check_trace_pair(current, voltage, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_matching_traces() {
        let i = vec![0.0; 64];
        let v = vec![0.0; 64];
        assert!(check_trace_pair(&i, &v, 1e-4).is_ok());
    }

    #[test]
    fn test_rejects_empty_trace() {
        let err = check_trace_pair(&[], &[1.0], 1e-4).unwrap_err();
        assert!(matches!(err, AecError::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let err = check_trace_pair(&[1.0, 2.0], &[1.0], 1e-4).unwrap_err();
        match err {
            AecError::InvalidInput(msg) => {
                assert!(msg.contains("2"));
                assert!(msg.contains("1"));
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_dt() {
        assert!(check_trace_pair(&[1.0], &[1.0], 0.0).is_err());
        assert!(check_trace_pair(&[1.0], &[1.0], -1e-4).is_err());
        assert!(check_trace_pair(&[1.0], &[1.0], f64::NAN).is_err());
    }

    #[test]
    fn test_error_display() {
        let e = AecError::ConvergenceFailure {
            iterations: 500,
            residual: 0.25,
        };
        let s = format!("{}", e);
        assert!(s.contains("500"));
        assert!(s.contains("converge"));

        let e = AecError::IllConditioned("pivot 1.0e-20 at row 3".into());
        assert!(format!("{}", e).contains("row 3"));
    }
}
