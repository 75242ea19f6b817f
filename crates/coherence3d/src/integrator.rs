//! Continuum time integration of the density field.
//!
//! One explicit Euler step of
//!
//! ```text
//! d rho / dt = -div(rho grad mu) + D laplacian(rho)
//! ```
//!
//! in conservative face-flux form on the periodic grid. Mass moves *up* the
//! gradient of the driving field `mu`: across each of the six faces of a
//! cell the drift carries the upwind density times the jump in `mu`, and
//! diffusion carries `D` times the jump in density. Every face flux is
//! antisymmetric between its two cells, so the update conserves mass up to
//! rounding. The particle path lives in `advection`.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::TIMESTEP_SAFETY;
use crate::grid::{ClampReport, DensityField};

/// Which representation a run advances. Fixed for the lifetime of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Finite-difference update of the density field
    #[default]
    Continuum,
    /// Langevin particles deposited onto the density field
    Particle,
}

/// What happened to the field during one continuum step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ContinuumStepReport {
    pub clamp: ClampReport,
    /// Total mass after the update and clamp, before renormalization
    pub mass: f64,
    /// |mass - target| / target
    pub relative_drift: f64,
}

/// Advance `density` by one step using the driving field `mu`.
///
/// Writes into `scratch` and swaps it in, so every face flux sees the
/// start-of-step density. Negative cells are clamped afterwards. The caller
/// decides what to do with the reported drift and renormalizes.
pub fn continuum_step(
    density: &mut DensityField,
    mu: &[f64],
    dt: f64,
    diffusion: f64,
    scratch: &mut Vec<f64>,
) -> ContinuumStepReport {
    assert_eq!(density.len(), mu.len(), "density/driving field length mismatch");

    let n = density.resolution;
    let ni = n as i64;
    let rate = dt / (density.cell_size * density.cell_size);
    let rho = density.values();

    scratch.resize(rho.len(), 0.0);
    scratch.par_iter_mut().enumerate().for_each(|(idx, out)| {
        let i = (idx % n) as i64;
        let j = ((idx / n) % n) as i64;
        let k = (idx / (n * n)) as i64;
        let rho_c = rho[idx];
        let mu_c = mu[idx];

        let mut inflow = 0.0;
        for (di, dj, dk) in FACE_NEIGHBORS {
            let ii = (i + di).rem_euclid(ni) as usize;
            let jj = (j + dj).rem_euclid(ni) as usize;
            let kk = (k + dk).rem_euclid(ni) as usize;
            let nb = kk * n * n + jj * n + ii;

            // Drift toward higher mu, carried by the upwind cell
            let jump = mu_c - mu[nb];
            let upwind = if jump > 0.0 { rho[nb] } else { rho_c };
            inflow += upwind * jump;

            inflow += diffusion * (rho[nb] - rho_c);
        }
        *out = rho_c + rate * inflow;
    });

    density.swap_values(scratch);
    let clamp = density.clamp_non_negative();

    let mass = density.total_mass();
    let target = density.target_mass();
    ContinuumStepReport {
        clamp,
        mass,
        relative_drift: (mass - target).abs() / target,
    }
}

const FACE_NEIGHBORS: [(i64, i64, i64); 6] = [
    (-1, 0, 0),
    (1, 0, 0),
    (0, -1, 0),
    (0, 1, 0),
    (0, 0, -1),
    (0, 0, 1),
];

/// Largest stable explicit diffusion step, `0.9 dx^2 / (6 D)`.
///
/// Returns infinity when there is no diffusion.
pub fn estimate_stable_timestep(grid_spacing: f64, diffusion: f64) -> f64 {
    if diffusion <= 0.0 {
        return f64::INFINITY;
    }
    TIMESTEP_SAFETY * grid_spacing * grid_spacing / (6.0 * diffusion)
}

/// CFL limit for drift at `max_speed`: `0.9 dx / v`.
pub fn estimate_drift_timestep(max_speed: f64, grid_spacing: f64) -> f64 {
    if max_speed <= 0.0 {
        return f64::INFINITY;
    }
    TIMESTEP_SAFETY * grid_spacing / max_speed
}

/// Largest face drift speed `|mu_a - mu_b| / dx` of a driving field.
pub fn max_drift_speed(mu: &[f64], resolution: usize, grid_spacing: f64) -> f64 {
    let n = resolution;
    let mut max_jump: f64 = 0.0;
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let idx = k * n * n + j * n + i;
                let right = k * n * n + j * n + (i + 1) % n;
                let up = k * n * n + ((j + 1) % n) * n + i;
                let front = ((k + 1) % n) * n * n + j * n + i;
                for nb in [right, up, front] {
                    max_jump = max_jump.max((mu[idx] - mu[nb]).abs());
                }
            }
        }
    }
    max_jump / grid_spacing
}
