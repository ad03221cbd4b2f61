//! Full-kernel identification from current-clamp recordings
//!
//! Estimates the impulse response (kernel) relating injected current to
//! recorded voltage, treating the electrode-plus-neuron system as linear
//! and time-invariant over the recording. Two entry points:
//!
//! - [`KernelEstimator::full_kernel`]: least-squares deconvolution from a
//!   fluctuating (white-noise-like) current. This is the primary method.
//! - [`KernelEstimator::full_kernel_from_step`]: recovery from a step
//!   current via the discrete derivative of the step response. A fallback
//!   for recordings where no broadband current was injected; less accurate
//!   on noisy data.
//!
//! ## Algorithm
//!
//! For the fluctuating-current case the model is
//!
//! ```text
//! v[n] = v0 + sum_{j=0..ksize-1} k[j] * i[n-j]
//! ```
//!
//! Every output sample with a complete lag window (`n >= ksize - 1`)
//! contributes one row to a least-squares system in the `ksize` kernel
//! coefficients plus the resting offset `v0`. The normal equations are
//! accumulated explicitly and solved by the regularized Cholesky solver in
//! [`crate::linalg`]. Estimation is unbiased when the injected current is
//! statistically close to white noise; the estimator documents but does not
//! validate that assumption.
//!
//! ## Example
//!
//! ```rust
//! use aec_core::kernel_estimation::KernelEstimator;
//!
//! // Known 3-tap kernel driven by a deterministic broadband current.
//! let k_true = [5.0, 2.0, 1.0];
//! let i: Vec<f64> = (0..512).map(|n| ((n * n + 7) as f64 * 0.61).sin()).collect();
//! let v: Vec<f64> = (0..512)
//!     .map(|n| {
//!         (0..3)
//!             .filter(|&j| n >= j)
//!             .map(|j| k_true[j] * i[n - j])
//!             .sum::<f64>()
//!     })
//!     .collect();
//!
//! let estimator = KernelEstimator::new(3);
//! let k = estimator.full_kernel(&v, &i).unwrap();
//! assert!((k[0] - 5.0).abs() < 1e-8);
//! assert!((k[1] - 2.0).abs() < 1e-8);
//! assert!((k[2] - 1.0).abs() < 1e-8);
//! ```

use tracing::debug;

use crate::linalg::solve_normal_equations;
use crate::types::{check_equal_traces, AecError, AecResult};

/// Least-squares kernel estimator.
///
/// `ksize` is the kernel length in samples. `ridge` is the relative
/// Tikhonov factor forwarded to the linear solver; the default of `0.0`
/// reports ill-conditioning instead of masking it, which is the right
/// behavior for well-designed white-noise protocols.
#[derive(Debug, Clone)]
pub struct KernelEstimator {
    /// Kernel length in samples.
    pub ksize: usize,
    /// Relative ridge regularization (default 0.0).
    pub ridge: f64,
}

impl KernelEstimator {
    /// Create an estimator for a kernel of `ksize` samples.
    pub fn new(ksize: usize) -> Self {
        Self { ksize, ridge: 0.0 }
    }

    /// Estimate the full kernel from a fluctuating-current recording.
    ///
    /// # Arguments
    /// * `v` - Recorded voltage trace
    /// * `i` - Injected current trace (white-noise-like)
    ///
    /// # Errors
    /// `InvalidInput` if the traces mismatch, are empty, or are shorter
    /// than `ksize`; `IllConditioned` if the current cannot determine the
    /// kernel (e.g. constant or near-zero-variance current).
    pub fn full_kernel(&self, v: &[f64], i: &[f64]) -> AecResult<Vec<f64>> {
        self.full_kernel_with_offset(v, i).map(|(k, _)| k)
    }

    /// Estimate the full kernel and the resting potential `v0` jointly.
    ///
    /// The offset column absorbs the resting potential so the kernel
    /// coefficients are not biased by a nonzero baseline.
    pub fn full_kernel_with_offset(&self, v: &[f64], i: &[f64]) -> AecResult<(Vec<f64>, f64)> {
        check_equal_traces(i, v)?;
        let ksize = self.ksize;
        if ksize == 0 {
            return Err(AecError::InvalidInput("ksize must be at least 1".into()));
        }
        if v.len() < ksize {
            return Err(AecError::InvalidInput(format!(
                "trace of {} samples is shorter than ksize {}",
                v.len(),
                ksize
            )));
        }

        // Augmented system: ksize lag columns plus one intercept column.
        let dim = ksize + 1;
        let mut a = vec![vec![0.0_f64; dim]; dim];
        let mut b = vec![0.0_f64; dim];

        for n in (ksize - 1)..v.len() {
            // Row regressors: i[n], i[n-1], .., i[n-ksize+1], 1.
            for r in 0..ksize {
                let xr = i[n - r];
                b[r] += xr * v[n];
                for c in 0..=r {
                    a[r][c] += xr * i[n - c];
                }
                a[ksize][r] += xr;
            }
            b[ksize] += v[n];
            a[ksize][ksize] += 1.0;
        }
        // Mirror the accumulated lower triangle.
        for r in 0..dim {
            for c in (r + 1)..dim {
                a[r][c] = a[c][r];
            }
        }

        let x = solve_normal_equations(&a, &b, self.ridge)?;
        let v0 = x[ksize];
        let k = x[..ksize].to_vec();
        debug!(
            ksize,
            rows = v.len() - ksize + 1,
            v0,
            "estimated full kernel by least-squares deconvolution"
        );
        Ok((k, v0))
    }

    /// Estimate the full kernel from a step-current recording.
    ///
    /// Deconvolving a near-constant current directly is singular, so the
    /// kernel is recovered as the discrete derivative of the step response
    /// instead. Convention: the first sample is pre-step rest, the step
    /// turns on at sample 1, and the step amplitude is taken as the mean of
    /// the last half of `i` (the settled plateau).
    ///
    /// This method is a fallback for recordings without a broadband
    /// current; on real noisy data it is markedly less accurate than
    /// [`full_kernel`](Self::full_kernel).
    ///
    /// # Errors
    /// `InvalidInput` if the traces mismatch or hold fewer than
    /// `ksize + 1` samples; `IllConditioned` if the plateau amplitude is
    /// numerically zero.
    pub fn full_kernel_from_step(&self, v: &[f64], i: &[f64]) -> AecResult<Vec<f64>> {
        check_equal_traces(i, v)?;
        let ksize = self.ksize;
        if ksize == 0 {
            return Err(AecError::InvalidInput("ksize must be at least 1".into()));
        }
        if v.len() < ksize + 1 {
            return Err(AecError::InvalidInput(format!(
                "step recovery needs at least ksize + 1 = {} samples, got {}",
                ksize + 1,
                v.len()
            )));
        }

        let plateau = &i[i.len() / 2..];
        let amplitude = plateau.iter().sum::<f64>() / plateau.len() as f64;
        let peak = i.iter().fold(0.0_f64, |m, &x| m.max(x.abs()));
        if amplitude.abs() <= 1e-12 * peak.max(1e-300) || amplitude == 0.0 {
            return Err(AecError::IllConditioned(format!(
                "step amplitude {:.3e} is numerically zero",
                amplitude
            )));
        }

        let k: Vec<f64> = (0..ksize).map(|j| (v[j + 1] - v[j]) / amplitude).collect();
        debug!(ksize, amplitude, "recovered full kernel from step response");
        Ok(k)
    }
}
