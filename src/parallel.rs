//! Parallel slice fitting
//!
//! The per-slice fits of the Lp compensator are independent: no state
//! crosses a slice boundary. This module fans them out with rayon and
//! reassembles the results in slice order. Enable with the `parallel`
//! feature flag:
//!
//! ```toml
//! [dependencies]
//! aec-core = { version = "0.1", features = ["parallel"] }
//! ```
//!
//! Parallelization pays off when a recording spans many slices; for a
//! single slice the sequential [`lp_compensate`](crate::lp_compensation::lp_compensate)
//! is equivalent and avoids the thread-pool overhead.

use rayon::prelude::*;

use crate::lp_compensation::{fit_slice, slice_bounds, validate_config, LpCompensation, LpConfig};
use crate::types::AecResult;

/// Parallel variant of [`lp_compensate`](crate::lp_compensation::lp_compensate).
///
/// Identical contract and output: slices are fitted concurrently and
/// collected back into temporal order, so the result is byte-for-byte the
/// same as the sequential path. With the `Abort` failure policy the error
/// surfaced is the first failing slice in temporal order.
pub fn lp_compensate_parallel(
    i: &[f64],
    v: &[f64],
    dt: f64,
    config: &LpConfig,
) -> AecResult<LpCompensation> {
    validate_config(i, v, dt, config)?;
    let bounds = slice_bounds(v.len(), config.slice_duration, dt);

    let fitted: Vec<_> = bounds
        .par_iter()
        .map(|&(start, end)| fit_slice(&i[start..end], &v[start..end], dt, config, start))
        .collect();

    let mut compensated = Vec::with_capacity(v.len());
    let mut slices = Vec::with_capacity(bounds.len());
    for result in fitted {
        let (fit, slice_out) = result?;
        compensated.extend(slice_out);
        slices.push(fit);
    }

    Ok(LpCompensation {
        compensated,
        slices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lp_compensation::{lp_compensate, CircuitParameters, SliceFailurePolicy};

    fn white_noise(n: usize, seed: u64) -> Vec<f64> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f64) / (u32::MAX as f64) * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn test_matches_sequential() {
        let dt = 1e-3;
        let n = 300;
        let truth = CircuitParameters {
            r: 5e7,
            tau: 0.02,
            vr: -0.07,
            re: 2e7,
            taue: 2e-3,
        };
        let i: Vec<f64> = white_noise(n, 17).iter().map(|x| 1e-10 * x).collect();
        let v = truth.response(&i, dt);

        let config = LpConfig {
            slice_duration: 0.1,
            on_failure: SliceFailurePolicy::KeepRaw,
            ..LpConfig::default()
        };
        let sequential = lp_compensate(&i, &v, dt, &config).unwrap();
        let parallel = lp_compensate_parallel(&i, &v, dt, &config).unwrap();

        assert_eq!(parallel.compensated, sequential.compensated);
        assert_eq!(parallel.slices.len(), sequential.slices.len());
        for (p, s) in parallel.slices.iter().zip(sequential.slices.iter()) {
            assert_eq!(p.start, s.start);
            assert_eq!(p.len, s.len);
            assert_eq!(p.converged, s.converged);
            assert_eq!(p.params, s.params);
        }
    }

    #[test]
    fn test_invalid_input_still_rejected() {
        let config = LpConfig::default();
        assert!(lp_compensate_parallel(&[], &[], 1e-4, &config).is_err());
    }
}
