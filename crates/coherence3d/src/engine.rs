//! The coherence engine: owns the state and runs one step at a time.
//!
//! Per step:
//! 1. recompute the coherence field of the start-of-step density (every
//!    `coherence_interval` steps)
//! 2. continuum: driving field, flux update, clamp, renormalize;
//!    particle: Langevin update, wrap, deposit onto the density
//! 3. stability checks (NaN/Inf, mass drift)
//! 4. convergence metric; every `diagnostics.interval` steps the eigenvalue
//!    and peak diagnostics
//!
//! Diagnostics read the field and write only their own state.

use glam::DVec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::advection::{advect_particles, apply_langevin_forces, central_gradient, wrap_particles};
use crate::annealing::AnnealingSchedule;
use crate::backend::SimulationBackend;
use crate::coherence::CoherenceOperator;
use crate::config::EngineConfig;
use crate::constants::{EIGEN_SEED, MASS_DRIFT_TOLERANCE, SEVERE_MASS_DRIFT};
use crate::convergence::ConvergenceMonitor;
use crate::eigen::{fixed_point_residual, EigenvalueEstimator};
use crate::error::{EngineError, Result};
use crate::functional::{self, FreeEnergy};
use crate::grid::DensityField;
use crate::integrator::{
    continuum_step, estimate_drift_timestep, estimate_stable_timestep, max_drift_speed, StepMode,
};
use crate::particle::Particles;
use crate::peaks::{PeakAnalysis, PeakRatioAnalyzer};
use crate::snapshot::{DensitySnapshot, DiagnosticsSnapshot, EngineSnapshot, EngineStatus};
use crate::transfer::deposit_particles;

/// Results of the periodic diagnostics.
#[derive(Clone, Debug, Default)]
struct DiagnosticState {
    evaluated_at_step: Option<u64>,
    eigenvalue: Option<f64>,
    previous_eigenvalue: Option<f64>,
    eigenvalue_relative_change: Option<f64>,
    /// Warm start for the next power iteration
    eigenvector: Option<Vec<f64>>,
    fixed_point_residual: Option<f64>,
    peaks: PeakAnalysis,
    free_energy: Option<FreeEnergy>,
}

/// Nonlocal coherence simulation on a periodic grid.
pub struct CoherenceEngine {
    config: EngineConfig,
    operator: CoherenceOperator,
    schedule: AnnealingSchedule,

    density: DensityField,
    /// Density at the start of the current step
    previous: DensityField,
    particles: Option<Particles>,

    /// Coherence of the density, refreshed every `coherence_interval` steps
    coherence: Vec<f64>,
    coherence_gradient: Vec<DVec3>,
    driving_field: Vec<f64>,
    scratch: Vec<f64>,
    diagnostic_buffer: Vec<f64>,

    rng: ChaCha8Rng,
    monitor: ConvergenceMonitor,
    estimator: EigenvalueEstimator,
    analyzer: PeakRatioAnalyzer,
    diagnostics: DiagnosticState,

    step: u64,
    time: f64,
    beta: f64,
    status: EngineStatus,
    drift_warning_logged: bool,
}

impl CoherenceEngine {
    /// Validate `config` and build the initial state.
    pub fn initialize(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let n = config.grid_size;
        let operator = CoherenceOperator::new(
            n,
            config.cell_size(),
            config.kernel_scale,
            config.effective_cutoff(),
            config.coherence,
        )?;

        let schedule = match &config.annealing {
            Some(annealing) => AnnealingSchedule::from_config(annealing, config.entropy_beta)?,
            None => AnnealingSchedule::fixed(config.entropy_beta)?,
        };

        let mut rng = ChaCha8Rng::seed_from_u64(config.random_seed);
        let mut density = DensityField::initialize_with_rng(
            n,
            config.domain_length,
            config.target_mass,
            config.perturbation_amplitude,
            &mut rng,
        )?;

        let particles = match config.mode {
            StepMode::Continuum => None,
            StepMode::Particle => {
                let particles = Particles::spawn_uniform(
                    config.particles.count,
                    config.domain_length,
                    config.particles.initial_speed,
                    &mut rng,
                );
                deposit_particles(&mut density, &particles)?;
                Some(particles)
            }
        };

        if config.mode == StepMode::Continuum {
            let hottest = schedule.beta_at(0).min(config.entropy_beta);
            let effective_diffusion = config.diffusion_coefficient + 1.0 / hottest;
            let stable = estimate_stable_timestep(config.cell_size(), effective_diffusion);
            if config.dt > stable {
                log::warn!(
                    "dt = {:.3e} exceeds the stable estimate {:.3e} for effective diffusion {:.3e}",
                    config.dt,
                    stable,
                    effective_diffusion
                );
            }
        }

        log::info!(
            "initialized {:?} engine: {}^3 grid, kernel scale {}, {} stencil offsets, seed {}",
            config.mode,
            n,
            config.kernel_scale,
            operator.stencil().len(),
            config.random_seed
        );

        let d = config.diagnostics;
        let beta = schedule.beta_at(0);
        Ok(Self {
            operator,
            schedule,
            previous: density.clone(),
            density,
            particles,
            coherence: Vec::new(),
            coherence_gradient: Vec::new(),
            driving_field: Vec::new(),
            scratch: Vec::new(),
            diagnostic_buffer: Vec::new(),
            rng,
            monitor: ConvergenceMonitor::new(d.history_capacity, d.decay_window),
            estimator: EigenvalueEstimator::new(EIGEN_SEED, d.eigen_tolerance),
            analyzer: PeakRatioAnalyzer::new(d.peak_min_relative_height, d.spacing_tolerance),
            diagnostics: DiagnosticState::default(),
            step: 0,
            time: 0.0,
            beta,
            status: EngineStatus::Running,
            drift_warning_logged: false,
            config,
        })
    }

    /// Advance one step.
    ///
    /// A divergence halts the engine: this and every later call return
    /// [`EngineError::SimulationDiverged`] until [`CoherenceEngine::reset`].
    pub fn step(&mut self) -> Result<()> {
        if let EngineStatus::Diverged { step, reason } = &self.status {
            return Err(EngineError::SimulationDiverged {
                step: *step,
                reason: reason.clone(),
            });
        }

        let beta = self.schedule.beta_at(self.step);
        self.previous.values_mut().copy_from_slice(self.density.values());

        if self.coherence.is_empty() || self.step % self.config.coherence_interval == 0 {
            self.refresh_coherence();
        }

        match self.config.mode {
            StepMode::Continuum => self.step_continuum(beta)?,
            StepMode::Particle => self.step_particles()?,
        }

        self.step += 1;
        self.time += self.config.dt;
        self.beta = beta;

        self.monitor.record_step(self.time, &self.density, &self.previous);
        if self.step % self.config.diagnostics.interval == 0 {
            self.run_diagnostics();
        }
        Ok(())
    }

    /// Take `steps` steps, stopping at the first error.
    pub fn run(&mut self, steps: u64) -> Result<()> {
        for _ in 0..steps {
            self.step()?;
        }
        Ok(())
    }

    /// Replace the whole state with a fresh run of `config`.
    ///
    /// The current state survives if `config` is rejected.
    pub fn reset(&mut self, config: EngineConfig) -> Result<()> {
        *self = Self::initialize(config)?;
        Ok(())
    }

    /// Restart with the current configuration.
    pub fn restart(&mut self) -> Result<()> {
        self.reset(self.config.clone())
    }

    fn refresh_coherence(&mut self) {
        self.operator.compute(&self.density, &mut self.coherence);
        if self.config.mode == StepMode::Particle {
            self.coherence_gradient =
                central_gradient(&self.coherence, self.density.resolution, self.density.cell_size);
        }
    }

    fn step_continuum(&mut self, beta: f64) -> Result<()> {
        functional::evaluate(&self.density, &self.coherence, beta, &mut self.driving_field);
        let report = continuum_step(
            &mut self.density,
            &self.driving_field,
            self.config.dt,
            self.config.diffusion_coefficient,
            &mut self.scratch,
        );

        if self.density.has_non_finite() {
            return Err(self.diverge("non-finite density after continuum update".into()));
        }
        if report.relative_drift > SEVERE_MASS_DRIFT {
            return Err(self.diverge(format!(
                "mass drifted by {:.1}% in one step",
                report.relative_drift * 100.0
            )));
        }
        if report.relative_drift > MASS_DRIFT_TOLERANCE {
            log::warn!(
                "step {}: relative mass drift {:.3e} ({} cells clamped), renormalizing",
                self.step,
                report.relative_drift,
                report.clamp.clamped
            );
        }
        if let Err(err) = self.density.normalize() {
            return Err(self.diverge(err.to_string()));
        }
        Ok(())
    }

    fn step_particles(&mut self) -> Result<()> {
        let Some(particles) = self.particles.as_mut() else {
            return Err(self.diverge("particle mode without particles".into()));
        };
        let dt = self.config.dt;
        apply_langevin_forces(
            particles,
            &self.coherence_gradient,
            self.density.resolution,
            self.density.cell_size,
            &self.config.particles,
            dt,
            &mut self.rng,
        );
        advect_particles(particles, dt);
        wrap_particles(particles, self.density.domain_length());

        if particles.has_non_finite() {
            return Err(self.diverge("non-finite particle state".into()));
        }
        let deposited = deposit_particles(&mut self.density, particles);
        if let Err(err) = deposited {
            return Err(self.diverge(err.to_string()));
        }
        if self.density.has_non_finite() {
            return Err(self.diverge("non-finite density after deposition".into()));
        }
        Ok(())
    }

    fn diverge(&mut self, reason: String) -> EngineError {
        log::error!("simulation diverged at step {}: {}", self.step, reason);
        self.status = EngineStatus::Diverged {
            step: self.step,
            reason: reason.clone(),
        };
        EngineError::SimulationDiverged {
            step: self.step,
            reason,
        }
    }

    /// Eigenvalue, fixed-point residual, peaks and free energy.
    fn run_diagnostics(&mut self) {
        let warm_start = self.diagnostics.eigenvector.as_deref();
        match self
            .estimator
            .estimate_from(&self.operator, self.config.diagnostics.eigen_iterations, warm_start)
        {
            Ok(estimate) => {
                self.diagnostics.previous_eigenvalue = self.diagnostics.eigenvalue;
                self.diagnostics.eigenvalue = Some(estimate.eigenvalue);
                self.diagnostics.eigenvalue_relative_change = Some(estimate.relative_change);
                self.diagnostics.fixed_point_residual = Some(fixed_point_residual(
                    &self.operator,
                    self.density.values(),
                    estimate.eigenvalue,
                ));
                self.diagnostics.eigenvector = Some(estimate.eigenvector);
            }
            Err(err) => {
                log::debug!("step {}: eigenvalue diagnostic unavailable: {}", self.step, err);
                self.diagnostics.eigenvalue = None;
                self.diagnostics.eigenvalue_relative_change = None;
                self.diagnostics.fixed_point_residual = None;
            }
        }

        self.diagnostics.peaks = self.analyzer.analyze(&self.density);

        self.operator.compute(&self.density, &mut self.diagnostic_buffer);
        self.diagnostics.free_energy = Some(functional::free_energy(
            &self.density,
            &self.diagnostic_buffer,
            self.beta,
        ));

        if self.config.mode == StepMode::Continuum && !self.drift_warning_logged {
            let speed = max_drift_speed(&self.driving_field, self.density.resolution, self.density.cell_size);
            let limit = estimate_drift_timestep(speed, self.density.cell_size);
            if self.config.dt > limit {
                log::warn!(
                    "dt = {:.3e} exceeds the drift CFL limit {:.3e} (max speed {:.3e})",
                    self.config.dt,
                    limit,
                    speed
                );
                self.drift_warning_logged = true;
            }
        }

        self.diagnostics.evaluated_at_step = Some(self.step);
        log::debug!(
            "step {}: eigenvalue {:?}, {} peaks, ratios {:?}, metric {:?}",
            self.step,
            self.diagnostics.eigenvalue,
            self.diagnostics.peaks.peaks.len(),
            self.diagnostics.peaks.spacing_ratios,
            self.monitor.latest().map(|s| s.metric)
        );
    }

    /// Immutable copy of the current state and diagnostics.
    pub fn snapshot(&self) -> EngineSnapshot {
        let d = &self.diagnostics;
        EngineSnapshot {
            step: self.step,
            time: self.time,
            beta: self.beta,
            mode: self.config.mode,
            status: self.status.clone(),
            density: DensitySnapshot::from_field(&self.density, self.config.snapshot_max_resolution),
            particles: self.particles.as_ref().map(|p| p.list.clone()),
            diagnostics: DiagnosticsSnapshot {
                evaluated_at_step: d.evaluated_at_step,
                eigenvalue: d.eigenvalue,
                previous_eigenvalue: d.previous_eigenvalue,
                eigenvalue_relative_change: d.eigenvalue_relative_change,
                fixed_point_residual: d.fixed_point_residual,
                latest_metric: self.monitor.latest().map(|s| s.metric),
                decay: self.monitor.fit_decay(),
                converged: self
                    .monitor
                    .has_converged(self.config.diagnostics.convergence_tolerance),
                peaks: d.peaks.peaks.clone(),
                spacing_ratios: d.peaks.spacing_ratios.clone(),
                free_energy: d.free_energy,
                kinetic_energy: self.particles.as_ref().map(|p| p.mean_kinetic_energy()),
            },
        }
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn density(&self) -> &DensityField {
        &self.density
    }

    pub fn particles(&self) -> Option<&Particles> {
        self.particles.as_ref()
    }

    /// Coherence field used by the most recent step (empty before the first step).
    pub fn coherence(&self) -> &[f64] {
        &self.coherence
    }

    pub fn operator(&self) -> &CoherenceOperator {
        &self.operator
    }

    pub fn monitor(&self) -> &ConvergenceMonitor {
        &self.monitor
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Inverse temperature used by the last step.
    pub fn beta(&self) -> f64 {
        self.beta
    }
}

impl SimulationBackend for CoherenceEngine {
    type Config = EngineConfig;

    fn step(&mut self) -> Result<()> {
        CoherenceEngine::step(self)
    }

    fn reset(&mut self, config: EngineConfig) -> Result<()> {
        CoherenceEngine::reset(self, config)
    }

    fn snapshot(&self) -> EngineSnapshot {
        CoherenceEngine::snapshot(self)
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn status(&self) -> &EngineStatus {
        &self.status
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn steps(&self) -> u64 {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> EngineConfig {
        EngineConfig {
            grid_size: 8,
            kernel_scale: 0.1,
            cutoff_radius: Some(0.25),
            diffusion_coefficient: 0.05,
            entropy_beta: 10.0,
            dt: 0.005,
            diagnostics: crate::config::DiagnosticsConfig {
                interval: 5,
                eigen_iterations: 400,
                ..Default::default()
            },
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_initialize_normalized() {
        let engine = CoherenceEngine::initialize(small_config()).unwrap();
        assert!((engine.density().total_mass() - 1.0).abs() < 1e-12);
        assert_eq!(engine.step_count(), 0);
        assert!(engine.status().is_running());
        assert!(engine.particles().is_none());
    }

    #[test]
    fn test_step_advances_time_and_keeps_mass() {
        let mut engine = CoherenceEngine::initialize(small_config()).unwrap();
        engine.run(3).unwrap();
        assert_eq!(engine.step_count(), 3);
        assert!((engine.time() - 0.015).abs() < 1e-12);
        assert!((engine.density().total_mass() - 1.0).abs() < 1e-9);
        assert_eq!(engine.monitor().len(), 3);
        assert_eq!(engine.coherence().len(), 512);
    }

    #[test]
    fn test_diagnostics_run_on_interval() {
        let mut engine = CoherenceEngine::initialize(small_config()).unwrap();
        engine.run(4).unwrap();
        assert_eq!(engine.snapshot().diagnostics.evaluated_at_step, None);
        engine.step().unwrap();
        let snap = engine.snapshot();
        assert_eq!(snap.diagnostics.evaluated_at_step, Some(5));
        assert!(snap.diagnostics.eigenvalue.is_some());
        assert!(snap.diagnostics.free_energy.is_some());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            entropy_beta: -1.0,
            ..small_config()
        };
        assert!(matches!(
            CoherenceEngine::initialize(config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stencil_too_wide_rejected() {
        let config = EngineConfig {
            cutoff_radius: Some(0.6),
            ..small_config()
        };
        assert!(matches!(
            CoherenceEngine::initialize(config),
            Err(EngineError::InvalidKernelConfiguration(_))
        ));
    }

    #[test]
    fn test_huge_kernel_values_rejected_on_reset() {
        let mut engine = CoherenceEngine::initialize(small_config()).unwrap();
        engine.run(2).unwrap();

        let huge_cutoff = EngineConfig {
            cutoff_radius: Some(1e30),
            ..small_config()
        };
        assert!(matches!(
            engine.reset(huge_cutoff),
            Err(EngineError::InvalidKernelConfiguration(_))
        ));

        let huge_modes = EngineConfig {
            coherence: crate::coherence::CoherenceMethod::Eigenmode { modes: usize::MAX },
            ..small_config()
        };
        assert!(matches!(
            engine.reset(huge_modes),
            Err(EngineError::InvalidKernelConfiguration(_))
        ));
        assert_eq!(engine.step_count(), 2);
        engine.step().unwrap();
    }

    #[test]
    fn test_default_coupling_sharpens_single_peak() {
        let config = EngineConfig {
            grid_size: 16,
            perturbation_amplitude: 0.0,
            ..EngineConfig::default()
        };
        let mut engine = CoherenceEngine::initialize(config).unwrap();

        // Gaussian bump, two cells wide, on a unit background
        let center = (8, 8, 8);
        let field = &engine.density;
        let bump: Vec<f64> = (0..field.len())
            .map(|idx| {
                let d = field.cell_distance(field.cell_coords(idx), center) / field.cell_size;
                1.0 + 4.0 * (-d * d / 8.0).exp()
            })
            .collect();
        engine.density.values_mut().copy_from_slice(&bump);
        engine.density.normalize().unwrap();

        let peak = engine.density.cell_index(center.0, center.1, center.2);
        let before = engine.density.values()[peak];
        engine.step().unwrap();
        let after = engine.density.values()[peak];

        assert!(after > before, "peak went from {} to {}", before, after);
        assert!((engine.density().total_mass() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_divergence_halts_until_reset() {
        let mut engine = CoherenceEngine::initialize(small_config()).unwrap();
        engine.density.values_mut()[0] = f64::NAN;
        engine.coherence.clear();

        let err = engine.step().unwrap_err();
        assert!(matches!(err, EngineError::SimulationDiverged { step: 0, .. }));
        let again = engine.step().unwrap_err();
        assert!(matches!(again, EngineError::SimulationDiverged { step: 0, .. }));
        assert!(!engine.snapshot().status.is_running());

        engine.restart().unwrap();
        assert!(engine.status().is_running());
        engine.step().unwrap();
    }

    #[test]
    fn test_failed_reset_keeps_state() {
        let mut engine = CoherenceEngine::initialize(small_config()).unwrap();
        engine.run(2).unwrap();
        let bad = EngineConfig {
            grid_size: 1,
            ..small_config()
        };
        assert!(engine.reset(bad).is_err());
        assert_eq!(engine.step_count(), 2);
    }

    #[test]
    fn test_annealing_ramps_beta() {
        let config = EngineConfig {
            annealing: Some(crate::annealing::AnnealingConfig {
                schedule: crate::annealing::ScheduleKind::Linear,
                beta_initial: 5.0,
                total_steps: 4,
            }),
            ..small_config()
        };
        let mut engine = CoherenceEngine::initialize(config).unwrap();
        engine.step().unwrap();
        assert!((engine.beta() - 5.0).abs() < 1e-12);
        engine.run(5).unwrap();
        assert_eq!(engine.beta(), 10.0);
    }
}
