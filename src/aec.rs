//! Linear electrode compensation (AEC)
//!
//! Applies an electrode kernel to the injected current to predict the
//! voltage drop across the electrode, then subtracts that prediction from
//! the raw recording. What remains is the membrane potential.
//!
//! ```text
//! ve[n] = sum_{j=0..len(ke)-1, j<=n} ke[j] * i[n-j]
//! vm[n] = v[n] - ve[n]
//! ```
//!
//! The convolution is causal: only past and present current samples
//! contribute to each output sample. Boundary policy: current before the
//! first recorded sample is taken as zero, so the first `len(ke) - 1`
//! output samples use a shortened window and the output has exactly one
//! sample per input sample. Both functions are pure; nothing is retained
//! between calls.
//!
//! ## Example
//!
//! ```rust
//! use aec_core::aec::aec_compensate;
//!
//! let ke = [2.0, 1.0, 0.5];
//! let i = [0.0, 1.0, 0.0, 0.0, -1.0, 0.0];
//! // Recording = membrane potential (-70 everywhere) + electrode artefact.
//! let vm_true = [-70.0; 6];
//! let v: Vec<f64> = (0..6)
//!     .map(|n| {
//!         let mut ve = 0.0;
//!         for j in 0..3 {
//!             if n >= j {
//!                 ve += ke[j] * i[n - j];
//!             }
//!         }
//!         vm_true[n] + ve
//!     })
//!     .collect();
//!
//! let vm = aec_compensate(&v, &i, &ke).unwrap();
//! for m in &vm {
//!     assert!((m + 70.0).abs() < 1e-12);
//! }
//! ```

use crate::types::{check_equal_traces, AecError, AecResult};

/// Predict the electrode voltage as the causal convolution of the injected
/// current with the electrode kernel.
///
/// Samples before the start of the trace are treated as zero current.
/// The output length equals the input length.
pub fn predict_electrode_voltage(i: &[f64], ke: &[f64]) -> Vec<f64> {
    (0..i.len())
        .map(|n| {
            let mut acc = 0.0;
            for (j, &kj) in ke.iter().enumerate() {
                if n >= j {
                    acc += kj * i[n - j];
                }
            }
            acc
        })
        .collect()
}

/// Remove the electrode contribution from a raw recording.
///
/// # Arguments
/// * `v` - Raw recorded voltage
/// * `i` - Injected current, same length as `v`
/// * `ke` - Electrode kernel, at most as long as the traces
///
/// # Returns
/// The compensated membrane potential, one sample per input sample.
///
/// # Errors
/// `InvalidInput` if the traces mismatch, the kernel is empty, or the
/// kernel is longer than the traces.
pub fn aec_compensate(v: &[f64], i: &[f64], ke: &[f64]) -> AecResult<Vec<f64>> {
    check_equal_traces(i, v)?;
    if ke.is_empty() {
        return Err(AecError::InvalidInput("empty electrode kernel".into()));
    }
    if ke.len() > v.len() {
        return Err(AecError::InvalidInput(format!(
            "electrode kernel of {} samples is longer than the trace ({})",
            ke.len(),
            v.len()
        )));
    }

    let ve = predict_electrode_voltage(i, ke);
    Ok(v.iter().zip(ve.iter()).map(|(&vn, &en)| vn - en).collect())
}
