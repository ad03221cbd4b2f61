//! Nelder-Mead downhill-simplex minimizer
//!
//! General derivative-free minimizer for low-dimensional nonlinear fits.
//! The Lp compensation loss is non-quadratic (and non-smooth at zero
//! residual for p < 1), so gradient-based least-squares iterations do not
//! apply; the downhill simplex only needs function values.
//!
//! ## Algorithm
//!
//! Standard reflection / expansion / contraction / shrink moves with
//! coefficients 1, 2, 0.5, 0.5. The initial simplex is built around the
//! starting point by stepping each coordinate by `initial_step` times its
//! magnitude (or by `initial_step` itself for zero coordinates).
//! Convergence is declared when both the spread of function values and the
//! simplex diameter fall below `tolerance` (relative to the best vertex).
//!
//! ## Example
//!
//! ```rust
//! use aec_core::simplex::NelderMead;
//!
//! // Minimize a shifted quadratic bowl.
//! let nm = NelderMead::default();
//! let fit = nm
//!     .minimize(|x| (x[0] - 3.0).powi(2) + (x[1] + 1.0).powi(2), &[0.0, 0.0])
//!     .unwrap();
//! assert!((fit.x[0] - 3.0).abs() < 1e-4);
//! assert!((fit.x[1] + 1.0).abs() < 1e-4);
//! ```

use crate::types::{AecError, AecResult};

/// Result of a successful simplex minimization.
#[derive(Debug, Clone)]
pub struct SimplexFit {
    /// Best parameter vector found.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub value: f64,
    /// Number of iterations used.
    pub iterations: usize,
}

/// Nelder-Mead minimizer with configurable iteration and tolerance budget.
#[derive(Debug, Clone)]
pub struct NelderMead {
    /// Maximum iterations before the fit is declared failed (default 2000).
    pub max_iterations: usize,
    /// Relative convergence tolerance on value spread and simplex diameter
    /// (default 1e-9).
    pub tolerance: f64,
    /// Relative step used to build the initial simplex (default 0.1).
    pub initial_step: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            tolerance: 1e-9,
            initial_step: 0.1,
        }
    }
}

impl NelderMead {
    /// Create a minimizer with an explicit iteration and tolerance budget.
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            ..Self::default()
        }
    }

    /// Minimize `f` starting from `x0`.
    ///
    /// Objective values that are NaN are treated as `+inf`, so the simplex
    /// walks away from invalid parameter regions instead of comparing NaN.
    ///
    /// # Errors
    /// [`AecError::InvalidInput`] if `x0` is empty;
    /// [`AecError::ConvergenceFailure`] if the tolerance is not reached
    /// within `max_iterations`, carrying the best objective value seen.
    pub fn minimize<F>(&self, f: F, x0: &[f64]) -> AecResult<SimplexFit>
    where
        F: Fn(&[f64]) -> f64,
    {
        let dim = x0.len();
        if dim == 0 {
            return Err(AecError::InvalidInput(
                "simplex starting point must not be empty".into(),
            ));
        }

        let eval = |x: &[f64]| -> f64 {
            let v = f(x);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };

        // Initial simplex: x0 plus one perturbed vertex per dimension.
        let mut vertices: Vec<Vec<f64>> = Vec::with_capacity(dim + 1);
        vertices.push(x0.to_vec());
        for d in 0..dim {
            let mut v = x0.to_vec();
            let step = if v[d] != 0.0 {
                self.initial_step * v[d].abs()
            } else {
                self.initial_step
            };
            v[d] += step;
            vertices.push(v);
        }
        let mut values: Vec<f64> = vertices.iter().map(|v| eval(v)).collect();

        for iter in 0..self.max_iterations {
            // Order the simplex: best first, worst last.
            let mut order: Vec<usize> = (0..=dim).collect();
            order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
            let best = order[0];
            let worst = order[dim];
            let second_worst = order[dim - 1];

            // Convergence test: value spread and simplex diameter.
            let scale = 1.0_f64.max(values[best].abs());
            let spread = (values[worst] - values[best]).abs();
            let diameter = (0..dim)
                .map(|d| {
                    vertices
                        .iter()
                        .map(|v| (v[d] - vertices[best][d]).abs())
                        .fold(0.0_f64, f64::max)
                })
                .fold(0.0_f64, f64::max);
            let xscale = 1.0_f64.max(
                vertices[best]
                    .iter()
                    .map(|c| c.abs())
                    .fold(0.0_f64, f64::max),
            );
            if spread <= self.tolerance * scale && diameter <= self.tolerance.sqrt() * xscale {
                return Ok(SimplexFit {
                    x: vertices[best].clone(),
                    value: values[best],
                    iterations: iter,
                });
            }

            // Centroid of all vertices except the worst.
            let mut centroid = vec![0.0_f64; dim];
            for (vi, v) in vertices.iter().enumerate() {
                if vi == worst {
                    continue;
                }
                for d in 0..dim {
                    centroid[d] += v[d];
                }
            }
            for c in centroid.iter_mut() {
                *c /= dim as f64;
            }

            let lerp = |from: &[f64], coeff: f64| -> Vec<f64> {
                (0..dim)
                    .map(|d| centroid[d] + coeff * (centroid[d] - from[d]))
                    .collect()
            };

            // Reflection.
            let reflected = lerp(&vertices[worst], 1.0);
            let f_reflected = eval(&reflected);

            if f_reflected < values[best] {
                // Expansion.
                let expanded = lerp(&vertices[worst], 2.0);
                let f_expanded = eval(&expanded);
                if f_expanded < f_reflected {
                    vertices[worst] = expanded;
                    values[worst] = f_expanded;
                } else {
                    vertices[worst] = reflected;
                    values[worst] = f_reflected;
                }
                continue;
            }

            if f_reflected < values[second_worst] {
                vertices[worst] = reflected;
                values[worst] = f_reflected;
                continue;
            }

            // Contraction (outside if the reflection improved on the worst,
            // inside otherwise).
            let contracted = if f_reflected < values[worst] {
                lerp(&vertices[worst], 0.5)
            } else {
                lerp(&vertices[worst], -0.5)
            };
            let f_contracted = eval(&contracted);
            if f_contracted < values[worst].min(f_reflected) {
                vertices[worst] = contracted;
                values[worst] = f_contracted;
                continue;
            }

            // Shrink towards the best vertex.
            let best_vertex = vertices[best].clone();
            for (vi, v) in vertices.iter_mut().enumerate() {
                if vi == best {
                    continue;
                }
                for d in 0..dim {
                    v[d] = best_vertex[d] + 0.5 * (v[d] - best_vertex[d]);
                }
                values[vi] = eval(v);
            }
        }

        let best = values
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        Err(AecError::ConvergenceFailure {
            iterations: self.max_iterations,
            residual: best,
        })
    }
}
