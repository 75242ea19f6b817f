//! Inverse-temperature schedules.
//!
//! A run can start hot (small beta, entropy dominates) and cool toward the
//! configured `entropy_beta`. After `total_steps` the final value holds.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Always the final value
    Fixed,
    Linear,
    /// Geometric interpolation: temperature decays exponentially
    #[default]
    Exponential,
    /// Logistic S-curve centered at half the schedule, steepness 10
    Sigmoid,
    /// Quadratic in progress
    Power,
}

/// Annealing settings as they appear in the engine configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnnealingConfig {
    #[serde(default)]
    pub schedule: ScheduleKind,
    pub beta_initial: f64,
    pub total_steps: u64,
}

/// Resolved schedule from `beta_initial` to `beta_final`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnnealingSchedule {
    kind: ScheduleKind,
    beta_initial: f64,
    beta_final: f64,
    total_steps: u64,
}

const SIGMOID_STEEPNESS: f64 = 10.0;
const POWER_EXPONENT: i32 = 2;

impl AnnealingSchedule {
    pub fn new(kind: ScheduleKind, beta_initial: f64, beta_final: f64, total_steps: u64) -> Result<Self> {
        for (name, beta) in [("beta_initial", beta_initial), ("beta_final", beta_final)] {
            if !(beta > 0.0 && beta.is_finite()) {
                return Err(EngineError::InvalidConfig(format!(
                    "{} must be positive and finite, got {}",
                    name, beta
                )));
            }
        }
        Ok(Self {
            kind,
            beta_initial,
            beta_final,
            total_steps,
        })
    }

    /// Constant schedule at `beta`.
    pub fn fixed(beta: f64) -> Result<Self> {
        Self::new(ScheduleKind::Fixed, beta, beta, 0)
    }

    pub fn from_config(config: &AnnealingConfig, beta_final: f64) -> Result<Self> {
        Self::new(config.schedule, config.beta_initial, beta_final, config.total_steps)
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Beta to use at `step` (0-based).
    pub fn beta_at(&self, step: u64) -> f64 {
        if self.kind == ScheduleKind::Fixed || step >= self.total_steps {
            return self.beta_final;
        }
        let progress = step as f64 / self.total_steps as f64;
        let span = self.beta_final - self.beta_initial;

        match self.kind {
            ScheduleKind::Fixed => self.beta_final,
            ScheduleKind::Linear => self.beta_initial + progress * span,
            ScheduleKind::Exponential => {
                self.beta_initial * (self.beta_final / self.beta_initial).powf(progress)
            }
            ScheduleKind::Sigmoid => {
                let x = (progress - 0.5) * SIGMOID_STEEPNESS;
                let s = 1.0 / (1.0 + (-x).exp());
                self.beta_initial + s * span
            }
            ScheduleKind::Power => self.beta_initial + progress.powi(POWER_EXPONENT) * span,
        }
    }

    /// Temperature `1 / beta` at `step`.
    pub fn temperature_at(&self, step: u64) -> f64 {
        1.0 / self.beta_at(step)
    }

    /// Fraction of the schedule completed at `step`, in `[0, 1]`.
    pub fn progress(&self, step: u64) -> f64 {
        if self.total_steps == 0 {
            1.0
        } else {
            (step as f64 / self.total_steps as f64).min(1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        for kind in [ScheduleKind::Linear, ScheduleKind::Exponential, ScheduleKind::Power] {
            let s = AnnealingSchedule::new(kind, 0.5, 8.0, 100).unwrap();
            assert!((s.beta_at(0) - 0.5).abs() < 1e-12, "{:?}", kind);
            assert_eq!(s.beta_at(100), 8.0);
            assert_eq!(s.beta_at(1000), 8.0);
        }
    }

    #[test]
    fn test_exponential_is_geometric() {
        let s = AnnealingSchedule::new(ScheduleKind::Exponential, 1.0, 16.0, 4).unwrap();
        assert!((s.beta_at(1) - 2.0).abs() < 1e-12);
        assert!((s.beta_at(2) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let s = AnnealingSchedule::new(ScheduleKind::Sigmoid, 1.0, 3.0, 10).unwrap();
        assert!((s.beta_at(5) - 2.0).abs() < 1e-12);
        assert!(s.beta_at(1) < s.beta_at(9));
    }

    #[test]
    fn test_power_is_quadratic() {
        let s = AnnealingSchedule::new(ScheduleKind::Power, 1.0, 5.0, 10).unwrap();
        assert!((s.beta_at(5) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_ignores_initial() {
        let s = AnnealingSchedule::fixed(3.0).unwrap();
        assert_eq!(s.beta_at(0), 3.0);
        assert!((s.temperature_at(7) - 1.0 / 3.0).abs() < 1e-15);
        assert_eq!(s.progress(0), 1.0);
    }

    #[test]
    fn test_rejects_non_positive_beta() {
        assert!(AnnealingSchedule::new(ScheduleKind::Linear, 0.0, 1.0, 10).is_err());
        assert!(AnnealingSchedule::fixed(f64::NAN).is_err());
    }

    #[test]
    fn test_config_round_trip_uses_snake_case() {
        let config: AnnealingConfig =
            serde_json::from_str(r#"{"schedule":"sigmoid","beta_initial":0.1,"total_steps":50}"#).unwrap();
        assert_eq!(config.schedule, ScheduleKind::Sigmoid);
        let s = AnnealingSchedule::from_config(&config, 2.0).unwrap();
        assert_eq!(s.total_steps(), 50);
    }
}
