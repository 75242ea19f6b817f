//! Engine constants for the coherence simulation.
//!
//! ## Sign convention
//!
//! The driving field is
//!
//! ```text
//! mu = COHERENCE_COUPLING * (C rho) - (1/beta) * (ln(rho + eps) + 1)
//! ```
//!
//! and mass drifts *up* the gradient of `mu` (see `integrator`). A positive
//! `COHERENCE_COUPLING` therefore pulls mass toward regions of high
//! coherence (clustering) while the entropy term spreads it out. Flipping
//! the sign turns the dynamics purely dispersive. This is the only place the
//! sign is defined.
//!
//! ## When structure forms
//!
//! Linearizing around the uniform density `rho0`, a standing wave of
//! wavenumber `k` grows at rate
//!
//! ```text
//! k^2 * (COHERENCE_COUPLING * rho0 * C(k) - 1/beta - D)
//! C(k) = (2 pi l^2)^(3/2) * exp(-k^2 l^2 / 2)
//! ```
//!
//! so the uniform state only breaks up into clusters when
//! `COHERENCE_COUPLING * rho0 * (2 pi l^2)^(3/2) > 1/beta + D` for some
//! resolved `k`. Below that band every perturbation decays. The default
//! config (l = 0.08, beta = 200, D = 0.001) sits inside the band.

/// Coefficient on the coherence term of the driving field. Positive = attractive.
pub const COHERENCE_COUPLING: f64 = 2.0;

/// Offset inside `ln(rho + eps)` so empty cells stay finite.
pub const LOG_EPSILON: f64 = 1e-12;

// =============================================================================
// FIELD INVARIANTS
// =============================================================================

/// Total mass at or below this value cannot be renormalized.
pub const MASS_FLOOR: f64 = 1e-12;

/// Relative mass drift tolerated silently between renormalizations.
pub const MASS_DRIFT_TOLERANCE: f64 = 1e-6;

/// Relative mass drift treated as divergence rather than recoverable drift.
pub const SEVERE_MASS_DRIFT: f64 = 0.5;

/// Fraction of clamped cells above which a step is reported as unstable.
pub const CLAMP_WARN_FRACTION: f64 = 0.01;

/// Support radius of the quadratic B-spline used for particle deposition (cells).
pub const BSPLINE_SUPPORT_RADIUS: f64 = 1.5;

// =============================================================================
// TIME STEPPING
// =============================================================================

/// Safety factor applied to the explicit diffusion limit dx^2 / (6 D).
pub const TIMESTEP_SAFETY: f64 = 0.9;

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Minimum number of positive samples for an exponential decay fit.
pub const MIN_DECAY_SAMPLES: usize = 8;

/// Fits with a coefficient of determination below this are treated as noise.
pub const MIN_DECAY_R2: f64 = 0.5;

/// Metric values at or below this are skipped by the log-linear fit.
pub const DECAY_METRIC_FLOOR: f64 = 1e-300;

/// Seed for the power-iteration start vector.
pub const EIGEN_SEED: u64 = 0x5eed_e16e;
