//! Immutable engine snapshots for external consumers.
//!
//! A snapshot owns copies of everything it reports, so it can be handed to
//! another thread or serialized while the engine keeps stepping.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::convergence::DecayFit;
use crate::error::Result;
use crate::functional::FreeEnergy;
use crate::grid::DensityField;
use crate::integrator::StepMode;
use crate::particle::Particle;
use crate::peaks::Peak;

/// Whether the engine can still step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineStatus {
    Running,
    /// Halted until the next reset
    Diverged { step: u64, reason: String },
}

impl EngineStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, EngineStatus::Running)
    }
}

/// Density values, block-averaged when the grid is larger than requested.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DensitySnapshot {
    /// Cells per axis in `values`
    pub resolution: usize,
    /// Cells per axis of the engine grid
    pub source_resolution: usize,
    pub cell_size: f64,
    pub total_mass: f64,
    pub max: f64,
    pub mean: f64,
    /// x-fastest, like the engine grid
    pub values: Vec<f64>,
}

impl DensitySnapshot {
    /// Copy `field`, averaging blocks of cells down to at most
    /// `max_resolution` per axis. Fine cell `i` maps to coarse cell
    /// `i * nc / n`, so blocks differ by at most one cell when `nc` does not
    /// divide `n`.
    pub fn from_field(field: &DensityField, max_resolution: usize) -> Self {
        let n = field.resolution;
        let nc = n.min(max_resolution.max(1));
        let domain = field.domain_length();

        let values = if nc == n {
            field.values().to_vec()
        } else {
            let mut sums = vec![0.0; nc * nc * nc];
            let mut counts = vec![0usize; nc * nc * nc];
            for k in 0..n {
                let kc = k * nc / n;
                for j in 0..n {
                    let jc = j * nc / n;
                    for i in 0..n {
                        let ic = i * nc / n;
                        let c = kc * nc * nc + jc * nc + ic;
                        sums[c] += field.get(i, j, k);
                        counts[c] += 1;
                    }
                }
            }
            sums.iter()
                .zip(&counts)
                .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
                .collect()
        };

        Self {
            resolution: nc,
            source_resolution: n,
            cell_size: domain / nc as f64,
            total_mass: field.total_mass(),
            max: field.max(),
            mean: field.mean(),
            values,
        }
    }
}

/// Diagnostic readings. Anything that could not be computed is `None`/empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// Step at which the eigenvalue and peak diagnostics last ran
    pub evaluated_at_step: Option<u64>,
    pub eigenvalue: Option<f64>,
    pub previous_eigenvalue: Option<f64>,
    /// Relative change between the last two power-iteration steps
    pub eigenvalue_relative_change: Option<f64>,
    /// `||C rho - lambda rho|| / ||lambda rho||` for the current density
    pub fixed_point_residual: Option<f64>,
    pub latest_metric: Option<f64>,
    pub decay: Option<DecayFit>,
    pub converged: bool,
    pub peaks: Vec<Peak>,
    pub spacing_ratios: Vec<f64>,
    pub free_energy: Option<FreeEnergy>,
    /// Mean kinetic energy per particle (particle mode)
    pub kinetic_energy: Option<f64>,
}

/// Point-in-time view of an engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub step: u64,
    pub time: f64,
    /// Inverse temperature used by the last step
    pub beta: f64,
    pub mode: StepMode,
    pub status: EngineStatus,
    pub density: DensitySnapshot,
    /// Present in particle mode only
    pub particles: Option<Vec<Particle>>,
    pub diagnostics: DiagnosticsSnapshot,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> DensityField {
        let values = (0..n * n * n).map(|i| 1.0 + (i % n) as f64).collect();
        DensityField::from_values(n, 1.0 / n as f64, values).unwrap()
    }

    #[test]
    fn test_small_grid_is_copied() {
        let field = ramp(4);
        let snap = DensitySnapshot::from_field(&field, 8);
        assert_eq!(snap.resolution, 4);
        assert_eq!(snap.values, field.values());
    }

    #[test]
    fn test_block_average_preserves_mass() {
        let field = ramp(8);
        let snap = DensitySnapshot::from_field(&field, 4);
        assert_eq!(snap.resolution, 4);
        assert_eq!(snap.source_resolution, 8);
        assert_eq!(snap.values.len(), 64);
        // x pairs (1,2), (3,4), ... average to 1.5, 3.5, ...
        assert!((snap.values[0] - 1.5).abs() < 1e-12);
        assert!((snap.values[3] - 7.5).abs() < 1e-12);
        let coarse_mass: f64 = snap.values.iter().sum::<f64>() * snap.cell_size.powi(3);
        assert!((coarse_mass - field.total_mass()).abs() < 1e-12);
    }

    #[test]
    fn test_status_json_shape() {
        let json = serde_json::to_value(EngineStatus::Diverged {
            step: 3,
            reason: "NaN in density".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "diverged");
        assert_eq!(json["step"], 3);
        assert_eq!(serde_json::to_value(EngineStatus::Running).unwrap()["state"], "running");
    }
}
