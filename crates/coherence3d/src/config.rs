//! Engine configuration.
//!
//! Every field has a default, so a JSON file only needs the values it
//! changes. [`EngineConfig::validate`] runs on initialize and reset; nothing
//! is re-checked during stepping.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::annealing::{AnnealingConfig, AnnealingSchedule};
use crate::coherence::CoherenceMethod;
use crate::error::{EngineError, Result};
use crate::integrator::StepMode;

pub const MIN_GRID_SIZE: usize = 4;
pub const MAX_GRID_SIZE: usize = 256;

/// Full configuration of one engine run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cells per axis
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    /// Side length of the periodic cube
    #[serde(default = "default_domain_length")]
    pub domain_length: f64,

    /// Gaussian width of the coherence kernel (world units)
    #[serde(default = "default_kernel_scale")]
    pub kernel_scale: f64,
    /// Stencil radius; defaults to three kernel widths
    #[serde(default)]
    pub cutoff_radius: Option<f64>,
    #[serde(default)]
    pub coherence: CoherenceMethod,
    /// Recompute the coherence field every this many steps
    #[serde(default = "default_coherence_interval")]
    pub coherence_interval: u64,

    #[serde(default = "default_diffusion")]
    pub diffusion_coefficient: f64,
    /// Inverse temperature; the final value when annealing
    #[serde(default = "default_entropy_beta")]
    pub entropy_beta: f64,
    #[serde(default)]
    pub annealing: Option<AnnealingConfig>,
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default)]
    pub mode: StepMode,
    #[serde(default)]
    pub particles: ParticleParams,

    /// Relative amplitude of the initial per-cell noise, in [0, 1)
    #[serde(default = "default_perturbation")]
    pub perturbation_amplitude: f64,
    #[serde(default = "default_target_mass")]
    pub target_mass: f64,
    #[serde(default = "default_seed")]
    pub random_seed: u64,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    /// Snapshots block-average the density down to at most this many cells per axis
    #[serde(default = "default_snapshot_resolution")]
    pub snapshot_max_resolution: usize,
}

/// Langevin parameters for particle mode.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleParams {
    #[serde(default = "default_particle_count")]
    pub count: usize,
    /// Velocity damping rate
    #[serde(default = "default_friction")]
    pub friction: f64,
    /// Strength of the pull along the coherence gradient
    #[serde(default = "default_attraction")]
    pub attraction: f64,
    /// Standard deviation scale of the thermal kick
    #[serde(default = "default_noise")]
    pub noise_amplitude: f64,
    /// Upper bound of the random initial speed
    #[serde(default = "default_initial_speed")]
    pub initial_speed: f64,
}

/// When and how the read-only diagnostics run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Eigenvalue and peak analysis every this many steps
    #[serde(default = "default_diagnostics_interval")]
    pub interval: u64,
    #[serde(default = "default_eigen_iterations")]
    pub eigen_iterations: usize,
    #[serde(default = "default_eigen_tolerance")]
    pub eigen_tolerance: f64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Samples used by the decay-rate fit
    #[serde(default = "default_decay_window")]
    pub decay_window: usize,
    /// Metric below which the run counts as converged
    #[serde(default = "default_convergence_tolerance")]
    pub convergence_tolerance: f64,
    /// Peaks must reach mean + this * (max - mean)
    #[serde(default = "default_peak_height")]
    pub peak_min_relative_height: f64,
    /// Relative tolerance for grouping peak spacings
    #[serde(default = "default_spacing_tolerance")]
    pub spacing_tolerance: f64,
}

fn default_grid_size() -> usize {
    32
}
fn default_domain_length() -> f64 {
    1.0
}
fn default_kernel_scale() -> f64 {
    0.08
}
fn default_coherence_interval() -> u64 {
    1
}
fn default_diffusion() -> f64 {
    0.001
}
fn default_entropy_beta() -> f64 {
    200.0
}
fn default_dt() -> f64 {
    5e-3
}
fn default_perturbation() -> f64 {
    0.05
}
fn default_target_mass() -> f64 {
    1.0
}
fn default_seed() -> u64 {
    42
}
fn default_snapshot_resolution() -> usize {
    64
}
fn default_particle_count() -> usize {
    4096
}
fn default_friction() -> f64 {
    1.0
}
fn default_attraction() -> f64 {
    1.0
}
fn default_noise() -> f64 {
    0.05
}
fn default_initial_speed() -> f64 {
    0.01
}
fn default_diagnostics_interval() -> u64 {
    10
}
fn default_eigen_iterations() -> usize {
    200
}
fn default_eigen_tolerance() -> f64 {
    1e-4
}
fn default_history_capacity() -> usize {
    256
}
fn default_decay_window() -> usize {
    32
}
fn default_convergence_tolerance() -> f64 {
    1e-6
}
fn default_peak_height() -> f64 {
    0.2
}
fn default_spacing_tolerance() -> f64 {
    0.1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            domain_length: default_domain_length(),
            kernel_scale: default_kernel_scale(),
            cutoff_radius: None,
            coherence: CoherenceMethod::default(),
            coherence_interval: default_coherence_interval(),
            diffusion_coefficient: default_diffusion(),
            entropy_beta: default_entropy_beta(),
            annealing: None,
            dt: default_dt(),
            mode: StepMode::default(),
            particles: ParticleParams::default(),
            perturbation_amplitude: default_perturbation(),
            target_mass: default_target_mass(),
            random_seed: default_seed(),
            diagnostics: DiagnosticsConfig::default(),
            snapshot_max_resolution: default_snapshot_resolution(),
        }
    }
}

impl Default for ParticleParams {
    fn default() -> Self {
        Self {
            count: default_particle_count(),
            friction: default_friction(),
            attraction: default_attraction(),
            noise_amplitude: default_noise(),
            initial_speed: default_initial_speed(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            interval: default_diagnostics_interval(),
            eigen_iterations: default_eigen_iterations(),
            eigen_tolerance: default_eigen_tolerance(),
            history_capacity: default_history_capacity(),
            decay_window: default_decay_window(),
            convergence_tolerance: default_convergence_tolerance(),
            peak_min_relative_height: default_peak_height(),
            spacing_tolerance: default_spacing_tolerance(),
        }
    }
}

fn invalid(msg: String) -> EngineError {
    EngineError::InvalidConfig(msg)
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{} must be positive and finite, got {}", name, value)))
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<()> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{} must be non-negative and finite, got {}", name, value)))
    }
}

impl EngineConfig {
    /// Cell size along every axis.
    pub fn cell_size(&self) -> f64 {
        self.domain_length / self.grid_size as f64
    }

    /// Stencil radius actually used: the configured one or three kernel widths.
    pub fn effective_cutoff(&self) -> f64 {
        self.cutoff_radius.unwrap_or(3.0 * self.kernel_scale)
    }

    /// Reject values the engine cannot run with.
    ///
    /// Stencil geometry (cutoff against grid size) is checked when the
    /// coherence operator is built.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_GRID_SIZE..=MAX_GRID_SIZE).contains(&self.grid_size) {
            return Err(invalid(format!(
                "grid_size must lie in {}..={}, got {}",
                MIN_GRID_SIZE, MAX_GRID_SIZE, self.grid_size
            )));
        }
        check_positive("domain_length", self.domain_length)?;

        if !(self.kernel_scale > 0.0 && self.kernel_scale.is_finite()) {
            return Err(EngineError::InvalidKernelConfiguration(format!(
                "kernel_scale must be positive and finite, got {}",
                self.kernel_scale
            )));
        }
        if let Some(cutoff) = self.cutoff_radius {
            if !(cutoff > 0.0 && cutoff.is_finite()) {
                return Err(EngineError::InvalidKernelConfiguration(format!(
                    "cutoff_radius must be positive and finite, got {}",
                    cutoff
                )));
            }
        }
        if self.coherence_interval == 0 {
            return Err(invalid("coherence_interval must be at least 1".into()));
        }

        check_non_negative("diffusion_coefficient", self.diffusion_coefficient)?;
        check_positive("entropy_beta", self.entropy_beta)?;
        check_positive("dt", self.dt)?;
        if let Some(annealing) = &self.annealing {
            AnnealingSchedule::from_config(annealing, self.entropy_beta)?;
        }

        if !(0.0..1.0).contains(&self.perturbation_amplitude) {
            return Err(invalid(format!(
                "perturbation_amplitude must lie in [0, 1), got {}",
                self.perturbation_amplitude
            )));
        }
        check_positive("target_mass", self.target_mass)?;

        if self.mode == StepMode::Particle && self.particles.count == 0 {
            return Err(invalid("particle mode needs at least one particle".into()));
        }
        check_non_negative("particles.friction", self.particles.friction)?;
        if !self.particles.attraction.is_finite() {
            return Err(invalid("particles.attraction must be finite".into()));
        }
        check_non_negative("particles.noise_amplitude", self.particles.noise_amplitude)?;
        check_non_negative("particles.initial_speed", self.particles.initial_speed)?;

        let d = &self.diagnostics;
        if d.interval == 0 {
            return Err(invalid("diagnostics.interval must be at least 1".into()));
        }
        if d.eigen_iterations < 2 {
            return Err(invalid(format!(
                "diagnostics.eigen_iterations must be at least 2, got {}",
                d.eigen_iterations
            )));
        }
        check_positive("diagnostics.eigen_tolerance", d.eigen_tolerance)?;
        if d.history_capacity == 0 || d.decay_window == 0 {
            return Err(invalid("diagnostics history_capacity and decay_window must be at least 1".into()));
        }
        check_positive("diagnostics.convergence_tolerance", d.convergence_tolerance)?;
        if !(0.0..=1.0).contains(&d.peak_min_relative_height) {
            return Err(invalid(format!(
                "diagnostics.peak_min_relative_height must lie in [0, 1], got {}",
                d.peak_min_relative_height
            )));
        }
        check_non_negative("diagnostics.spacing_tolerance", d.spacing_tolerance)?;

        if self.snapshot_max_resolution == 0 {
            return Err(invalid("snapshot_max_resolution must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse a JSON document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{"grid_size": 16, "mode": "particle"}"#).unwrap();
        assert_eq!(config.grid_size, 16);
        assert_eq!(config.mode, StepMode::Particle);
        assert_eq!(config.diagnostics.interval, 10);
        assert_eq!(config.snapshot_max_resolution, 64);
        assert!((config.effective_cutoff() - 0.24).abs() < 1e-12);
    }

    #[test]
    fn test_coherence_method_json() {
        let config =
            EngineConfig::from_json_str(r#"{"coherence": {"method": "eigenmode", "modes": 3}}"#).unwrap();
        assert_eq!(config.coherence, CoherenceMethod::Eigenmode { modes: 3 });
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases: Vec<Box<dyn Fn(&mut EngineConfig)>> = vec![
            Box::new(|c| c.grid_size = 2),
            Box::new(|c| c.grid_size = 512),
            Box::new(|c| c.entropy_beta = 0.0),
            Box::new(|c| c.dt = f64::NAN),
            Box::new(|c| c.perturbation_amplitude = 1.0),
            Box::new(|c| c.coherence_interval = 0),
            Box::new(|c| c.diagnostics.eigen_iterations = 1),
            Box::new(|c| {
                c.mode = StepMode::Particle;
                c.particles.count = 0;
            }),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = EngineConfig::default();
            mutate(&mut config);
            let err = config.validate().unwrap_err();
            assert!(matches!(err, EngineError::InvalidConfig(_)), "case {}: {:?}", i, err);
        }
    }

    #[test]
    fn test_kernel_errors_are_kernel_configuration() {
        let config = EngineConfig {
            kernel_scale: -1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            EngineError::InvalidKernelConfiguration(_)
        ));
        let config = EngineConfig {
            cutoff_radius: Some(0.0),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            EngineError::InvalidKernelConfiguration(_)
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = EngineConfig {
            grid_size: 12,
            random_seed: 7,
            ..EngineConfig::default()
        };
        config.save_json(&path).unwrap();
        let loaded = EngineConfig::load_json(&path).unwrap();
        assert_eq!(loaded.grid_size, 12);
        assert_eq!(loaded.random_seed, 7);
        assert_eq!(loaded.coherence, config.coherence);
        assert!((loaded.kernel_scale - config.kernel_scale).abs() < 1e-15);
    }
}
