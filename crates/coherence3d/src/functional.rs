//! Driving field and free-energy functional.
//!
//! The functional the dynamics climbs is
//!
//! ```text
//! F[rho] = L[rho] + S[rho] / beta
//! L[rho] = integral rho(x) (C rho)(x) dx
//! S[rho] = -integral rho ln rho dx
//! ```
//!
//! whose functional derivative is the driving field
//! `mu = 2 (C rho) - (1/beta)(ln rho + 1)`. The coherence coefficient is
//! [`COHERENCE_COUPLING`]; see `constants` for the sign convention.

use serde::{Deserialize, Serialize};

use crate::constants::{COHERENCE_COUPLING, LOG_EPSILON};
use crate::grid::DensityField;

/// Per-cell driving field `mu` for the integrators.
///
/// `coherence` must be the coherence of `density` (same length); `beta` is
/// the entropy weight and must be positive.
pub fn evaluate(density: &DensityField, coherence: &[f64], beta: f64, out: &mut Vec<f64>) {
    assert_eq!(density.len(), coherence.len(), "density/coherence length mismatch");
    debug_assert!(beta > 0.0, "beta must be positive");
    let temperature = 1.0 / beta;

    out.clear();
    out.extend(density.values().iter().zip(coherence).map(|(&rho, &c)| {
        COHERENCE_COUPLING * c - temperature * ((rho + LOG_EPSILON).ln() + 1.0)
    }));
}

/// Terms of the free-energy functional for one state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FreeEnergy {
    /// L[rho] = integral rho C rho
    pub coherence: f64,
    /// S[rho] = -integral rho ln rho
    pub entropy: f64,
    /// L + S / beta
    pub total: f64,
}

/// Evaluate the free-energy functional.
pub fn free_energy(density: &DensityField, coherence: &[f64], beta: f64) -> FreeEnergy {
    assert_eq!(density.len(), coherence.len(), "density/coherence length mismatch");
    let dv = density.cell_volume();

    let mut l = 0.0;
    let mut s = 0.0;
    for (&rho, &c) in density.values().iter().zip(coherence) {
        l += rho * c;
        if rho > 0.0 {
            s -= rho * rho.ln();
        }
    }
    let coherence_term = l * dv;
    let entropy = s * dv;

    FreeEnergy {
        coherence: coherence_term,
        entropy,
        total: coherence_term + entropy / beta,
    }
}
