//! Nonlocal Coherence Field Simulation
//!
//! A density field on a periodic 3D grid evolves under a nonlocal coherence
//! operator (Gaussian kernel convolution) balanced against an entropy term.
//! Two representations are supported: a continuum finite-difference update
//! of the field, and Langevin particles deposited onto the field. The engine
//! tracks convergence, estimates the dominant eigenvalue of the coherence
//! operator and measures the spacing of density peaks.
//!
//! # Example
//!
//! ```
//! use coherence3d::{CoherenceEngine, EngineConfig};
//!
//! let config = EngineConfig {
//!     grid_size: 8,
//!     kernel_scale: 0.1,
//!     cutoff_radius: Some(0.25),
//!     dt: 0.005,
//!     ..EngineConfig::default()
//! };
//! let mut engine = CoherenceEngine::initialize(config).unwrap();
//!
//! engine.run(10).unwrap();
//! let snapshot = engine.snapshot();
//! assert_eq!(snapshot.step, 10);
//! assert!((snapshot.density.total_mass - 1.0).abs() < 1e-9);
//! ```

pub mod advection;
pub mod annealing;
pub mod backend;
pub mod coherence;
pub mod config;
pub mod constants;
pub mod convergence;
pub mod eigen;
pub mod engine;
pub mod error;
pub mod functional;
pub mod grid;
pub mod integrator;
pub mod kernels;
pub mod particle;
pub mod peaks;
pub mod serde_utils;
pub mod snapshot;
pub mod transfer;

pub use annealing::{AnnealingConfig, AnnealingSchedule, ScheduleKind};
pub use backend::SimulationBackend;
pub use coherence::{apply_eigenmode, apply_kernel, CoherenceMethod, CoherenceOperator, KernelStencil};
pub use config::{DiagnosticsConfig, EngineConfig, ParticleParams};
pub use convergence::{ConvergenceMonitor, DecayFit, MetricSample};
pub use eigen::{fixed_point_residual, EigenEstimate, EigenvalueEstimator, LinearOperator};
pub use engine::CoherenceEngine;
pub use error::{EngineError, Result};
pub use functional::FreeEnergy;
pub use glam::DVec3;
pub use grid::{ClampReport, DensityField};
pub use integrator::{estimate_stable_timestep, StepMode};
pub use particle::{Particle, Particles};
pub use peaks::{find_local_maxima, measure_spacing_ratios, Peak, PeakAnalysis, PeakRatioAnalyzer};
pub use snapshot::{DensitySnapshot, DiagnosticsSnapshot, EngineSnapshot, EngineStatus};
