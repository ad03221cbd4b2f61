//! Dense linear-algebra kernel for least-squares estimation
//!
//! Kernel identification reduces to solving the normal equations
//! `A x = b`, where `A` is the symmetric positive-semi-definite matrix of
//! lagged current products and `b` the current/voltage cross products. The
//! autocorrelation of a short or non-white current trace can make `A`
//! nearly singular, so the solver must either return a bounded-error
//! solution or report the failure; it never returns a silently biased
//! vector.
//!
//! ## Algorithm
//!
//! Cholesky factorization `A = L L^T` with an optional relative ridge
//! (Tikhonov) term added to the diagonal beforehand:
//!
//! ```text
//! A' = A + ridge * max(diag(A)) * I
//! ```
//!
//! A pivot below `1e-12 * max(diag(A))` aborts the factorization with
//! [`AecError::IllConditioned`].
//!
//! ## Example
//!
//! ```rust
//! use aec_core::linalg::solve_normal_equations;
//!
//! // A = [[4, 2], [2, 3]], b = [10, 8] -> x = [1.75, 1.5]
//! let a = vec![vec![4.0, 2.0], vec![2.0, 3.0]];
//! let x = solve_normal_equations(&a, &[10.0, 8.0], 0.0).unwrap();
//! assert!((x[0] - 1.75).abs() < 1e-12);
//! assert!((x[1] - 1.5).abs() < 1e-12);
//! ```

use crate::types::{AecError, AecResult};

/// Relative pivot threshold below which the system is declared singular.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Solve the symmetric positive-definite system `A x = b` by Cholesky
/// factorization with optional ridge regularization.
///
/// # Arguments
/// * `a` - Symmetric matrix, `n` rows of `n` values (only the lower
///   triangle is read)
/// * `b` - Right-hand side of length `n`
/// * `ridge` - Relative Tikhonov factor; `ridge * max(diag(a))` is added to
///   every diagonal entry before factorizing. Pass `0.0` for a plain solve.
///
/// # Errors
/// [`AecError::InvalidInput`] if the dimensions are inconsistent;
/// [`AecError::IllConditioned`] if a pivot falls below the relative
/// tolerance, naming the pivot value and row.
pub fn solve_normal_equations(a: &[Vec<f64>], b: &[f64], ridge: f64) -> AecResult<Vec<f64>> {
    let n = a.len();
    if n == 0 || b.len() != n || a.iter().any(|row| row.len() != n) {
        return Err(AecError::InvalidInput(format!(
            "normal equations dimension mismatch: {}x? matrix, rhs of length {}",
            n,
            b.len()
        )));
    }

    let max_diag = (0..n).map(|j| a[j][j].abs()).fold(0.0_f64, f64::max);
    if max_diag == 0.0 {
        return Err(AecError::IllConditioned(
            "zero diagonal: the input has no energy".into(),
        ));
    }
    let loading = ridge.max(0.0) * max_diag;
    let pivot_floor = PIVOT_TOLERANCE * max_diag;

    // Lower-triangular factor, row by row.
    let mut l = vec![vec![0.0_f64; n]; n];
    for j in 0..n {
        for i in j..n {
            let mut sum = a[i][j];
            if i == j {
                sum += loading;
            }
            for k in 0..j {
                sum -= l[i][k] * l[j][k];
            }
            if i == j {
                if sum <= pivot_floor {
                    return Err(AecError::IllConditioned(format!(
                        "pivot {:.3e} at row {} (threshold {:.3e})",
                        sum, j, pivot_floor
                    )));
                }
                l[j][j] = sum.sqrt();
            } else {
                l[i][j] = sum / l[j][j];
            }
        }
    }

    // Forward substitution: L y = b.
    let mut y = vec![0.0_f64; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[i][k] * y[k];
        }
        y[i] = sum / l[i][i];
    }

    // Back substitution: L^T x = y.
    let mut x = vec![0.0_f64; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[k][i] * x[k];
        }
        x[i] = sum / l[i][i];
    }

    Ok(x)
}
