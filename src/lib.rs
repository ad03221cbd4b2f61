//! # Active Electrode Compensation Core Library
//!
//! This crate provides the signal-processing core for removing the voltage
//! contribution of a recording electrode from single-electrode
//! current-clamp intracellular recordings, leaving the neuron's true
//! membrane potential.
//!
//! ## Overview
//!
//! A sharp microelectrode sits electrically in series with the neuron it
//! records from, so every injected current pulse produces a voltage drop
//! across the electrode on top of the membrane response. This library
//! implements the offline compensation pipeline:
//!
//! - **Kernel estimation**: identify the full impulse response relating
//!   injected current to recorded voltage, from a broadband recording
//!   (least-squares deconvolution) or from a step response (fallback).
//! - **Kernel decomposition**: split the full kernel into a fast electrode
//!   kernel and a slow neuronal kernel, for somatic or dendritic
//!   recordings.
//! - **Linear compensation (AEC)**: convolve the injected current with the
//!   electrode kernel and subtract the predicted electrode voltage.
//! - **Lp model fitting**: alternatively, fit a two-compartment RC circuit
//!   per time slice under a robust sub-quadratic error norm and subtract
//!   the fitted electrode component. Robust to spikes and other
//!   large-amplitude excursions the passive model does not capture.
//!
//! ## Signal Flow
//!
//! ```text
//! (i, v) -> KernelEstimator -> full kernel -> KernelDecomposer -> Ke
//!                                                                  |
//!                      v - conv(i, Ke)  <-  aec_compensate  <------+
//!
//! (i, v) -> lp_compensate -> compensated trace + per-slice parameters
//! ```
//!
//! The two compensation paths are alternatives, not stages of one
//! pipeline. All operations are pure batch computations over plain `f64`
//! slices with a fixed sampling interval; acquisition, file I/O, units and
//! plotting live in collaborating crates.
//!
//! ## Example
//!
//! ```rust
//! use aec_core::aec::aec_compensate;
//! use aec_core::kernel_decomposition::KernelDecomposer;
//! use aec_core::kernel_estimation::KernelEstimator;
//!
//! let ksize = 32;
//! let start_tail = 8;
//!
//! // Synthetic ground truth: fast electrode kernel, slow membrane kernel.
//! let ke_true: Vec<f64> = (0..start_tail).map(|t| 2.0 * (-(t as f64) / 1.5).exp()).collect();
//! let km: Vec<f64> = (0..ksize).map(|t| 0.3 * (-(t as f64) / 20.0).exp()).collect();
//! let k_full: Vec<f64> = (0..ksize)
//!     .map(|t| if t < start_tail { ke_true[t] + km[t] } else { km[t] })
//!     .collect();
//!
//! // White-noise current and the voltage it produces through the kernel.
//! let mut state = 99_u64;
//! let i: Vec<f64> = (0..3000)
//!     .map(|_| {
//!         state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
//!         ((state >> 33) as f64) / (u32::MAX as f64) * 2.0 - 1.0
//!     })
//!     .collect();
//! let conv = |kernel: &[f64]| -> Vec<f64> {
//!     (0..i.len())
//!         .map(|n| {
//!             kernel
//!                 .iter()
//!                 .enumerate()
//!                 .filter(|&(j, _)| n >= j)
//!                 .map(|(j, &kj)| kj * i[n - j])
//!                 .sum::<f64>()
//!         })
//!         .collect()
//! };
//! let v0 = -70.0;
//! let v: Vec<f64> = conv(&k_full).iter().map(|x| x + v0).collect();
//!
//! // Estimate, decompose, compensate.
//! let k_est = KernelEstimator::new(ksize).full_kernel(&v, &i).unwrap();
//! let ke = KernelDecomposer::default()
//!     .electrode_kernel_soma(&k_est, start_tail)
//!     .unwrap();
//! let compensated = aec_compensate(&v, &i, &ke).unwrap();
//!
//! // What remains is the membrane response plus the resting potential.
//! let vm: Vec<f64> = conv(&km).iter().map(|x| x + v0).collect();
//! for (c, m) in compensated.iter().zip(vm.iter()) {
//!     assert!((c - m).abs() < 1e-3);
//! }
//! ```
//!
//! ## Errors
//!
//! Every fallible operation returns [`types::AecResult`]. Estimation and
//! decomposition failures abort the whole call; per-slice fitting failures
//! follow the explicit [`lp_compensation::SliceFailurePolicy`].

pub mod aec;
pub mod kernel_decomposition;
pub mod kernel_estimation;
pub mod linalg;
pub mod lp_compensation;
pub mod observe;
pub mod simplex;
pub mod types;

#[cfg(feature = "parallel")]
pub mod parallel;

pub use aec::{aec_compensate, predict_electrode_voltage};
pub use kernel_decomposition::{KernelDecomposer, KernelDecomposition};
pub use kernel_estimation::KernelEstimator;
pub use lp_compensation::{
    lp_compensate, CircuitParameters, LpCompensation, LpConfig, SliceFailurePolicy, SliceFit,
};
pub use types::{AecError, AecResult, Sample};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aec::{aec_compensate, predict_electrode_voltage};
    pub use crate::kernel_decomposition::KernelDecomposer;
    pub use crate::kernel_estimation::KernelEstimator;
    pub use crate::lp_compensation::{lp_compensate, CircuitParameters, LpConfig};
    pub use crate::types::{AecError, AecResult};
    #[cfg(feature = "parallel")]
    pub use crate::parallel::lp_compensate_parallel;
}
