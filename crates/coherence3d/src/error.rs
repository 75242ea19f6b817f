//! Error type for the coherence engine.
//!
//! Configuration errors surface from `initialize`/`reset`, divergence from
//! `step`. Diagnostic failures (`NonConvergentEstimate`) are absorbed by the
//! engine and only reach callers that run the estimators directly.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Kernel scale or cutoff radius cannot produce a usable stencil.
    #[error("invalid kernel configuration: {0}")]
    InvalidKernelConfiguration(String),

    /// Any other rejected configuration value (grid size, dt, beta, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The field has no mass left to renormalize.
    #[error("degenerate field: total mass {total_mass:e} is at or below the floor")]
    DegenerateField { total_mass: f64 },

    /// NaN/Inf or unrecoverable mass drift detected after a step.
    #[error("simulation diverged at step {step}: {reason}")]
    SimulationDiverged { step: u64, reason: String },

    /// Power iteration did not settle within the iteration budget.
    #[error("eigenvalue estimate did not converge: relative change {relative_change:e} after {iterations} iterations")]
    NonConvergentEstimate {
        relative_change: f64,
        iterations: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
