//! Convergence tracking: successive-state differences and their decay rate.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::constants::{DECAY_METRIC_FLOOR, MIN_DECAY_R2, MIN_DECAY_SAMPLES};
use crate::grid::DensityField;

/// One convergence sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Simulation time the sample was taken at
    pub time: f64,
    /// L2 norm of the difference between successive states
    pub metric: f64,
}

/// Least-squares fit of `metric(t) = amplitude * exp(-rate * t)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecayFit {
    /// Positive when the metric is decaying
    pub rate: f64,
    pub amplitude: f64,
    /// Coefficient of determination of the log-linear fit
    pub r_squared: f64,
    pub samples: usize,
}

/// Bounded history of convergence samples.
#[derive(Clone, Debug)]
pub struct ConvergenceMonitor {
    history: VecDeque<MetricSample>,
    capacity: usize,
    window: usize,
}

impl ConvergenceMonitor {
    /// `capacity` bounds the history; the decay fit uses the last `window` samples.
    pub fn new(capacity: usize, window: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            window: window.clamp(1, capacity),
        }
    }

    /// Append `||current - previous||` at simulation time `time`.
    pub fn record_step(&mut self, time: f64, current: &DensityField, previous: &DensityField) -> f64 {
        let metric = current.l2_distance(previous);
        self.push(time, metric);
        metric
    }

    /// Append a precomputed metric. The oldest sample is dropped when full.
    pub fn push(&mut self, time: f64, metric: f64) {
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(MetricSample { time, metric });
    }

    /// Fit an exponential to the recent window.
    ///
    /// `None` when fewer than [`MIN_DECAY_SAMPLES`] positive samples are
    /// available or the fit explains too little of the variance to be
    /// distinguished from noise.
    pub fn fit_decay(&self) -> Option<DecayFit> {
        let start = self.history.len().saturating_sub(self.window);
        let points: Vec<(f64, f64)> = self
            .history
            .iter()
            .skip(start)
            .filter(|s| s.metric > DECAY_METRIC_FLOOR && s.metric.is_finite())
            .map(|s| (s.time, s.metric.ln()))
            .collect();

        if points.len() < MIN_DECAY_SAMPLES {
            return None;
        }

        let count = points.len() as f64;
        let mean_t = points.iter().map(|p| p.0).sum::<f64>() / count;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / count;

        let mut s_tt = 0.0;
        let mut s_ty = 0.0;
        let mut s_yy = 0.0;
        for &(t, y) in &points {
            s_tt += (t - mean_t) * (t - mean_t);
            s_ty += (t - mean_t) * (y - mean_y);
            s_yy += (y - mean_y) * (y - mean_y);
        }
        if s_tt <= 0.0 {
            return None;
        }

        let slope = s_ty / s_tt;
        let intercept = mean_y - slope * mean_t;
        // A flat series is fit exactly by a zero slope
        let r_squared = if s_yy > 0.0 { (s_ty * s_ty) / (s_tt * s_yy) } else { 1.0 };
        if r_squared < MIN_DECAY_R2 {
            log::debug!("decay fit rejected: r^2 = {:.3}", r_squared);
            return None;
        }

        Some(DecayFit {
            rate: -slope,
            amplitude: intercept.exp(),
            r_squared,
            samples: points.len(),
        })
    }

    /// Exponential decay rate of the metric, if it can be estimated.
    pub fn estimate_decay_rate(&self) -> Option<f64> {
        self.fit_decay().map(|fit| fit.rate)
    }

    /// True when the latest metric is below `tolerance`.
    pub fn has_converged(&self, tolerance: f64) -> bool {
        self.latest().is_some_and(|s| s.metric < tolerance)
    }

    pub fn latest(&self) -> Option<MetricSample> {
        self.history.back().copied()
    }

    pub fn history(&self) -> impl Iterator<Item = &MetricSample> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with(samples: impl IntoIterator<Item = (f64, f64)>) -> ConvergenceMonitor {
        let mut monitor = ConvergenceMonitor::new(64, 32);
        for (t, m) in samples {
            monitor.push(t, m);
        }
        monitor
    }

    #[test]
    fn test_recovers_exact_exponential() {
        let monitor = monitor_with((0..20).map(|i| {
            let t = i as f64 * 0.1;
            (t, 3.0 * (-2.5 * t).exp())
        }));
        let fit = monitor.fit_decay().unwrap();
        assert!((fit.rate - 2.5).abs() < 1e-9);
        assert!((fit.amplitude - 3.0).abs() < 1e-9);
        assert!(fit.r_squared > 0.999_999);
    }

    #[test]
    fn test_growth_gives_negative_rate() {
        let monitor = monitor_with((0..10).map(|i| (i as f64, (0.3 * i as f64).exp())));
        assert!(monitor.estimate_decay_rate().unwrap() < 0.0);
    }

    #[test]
    fn test_too_few_samples() {
        let monitor = monitor_with((0..MIN_DECAY_SAMPLES - 1).map(|i| (i as f64, 1.0 / (i + 1) as f64)));
        assert_eq!(monitor.estimate_decay_rate(), None);
    }

    #[test]
    fn test_zero_metrics_are_skipped() {
        // Only 4 positive samples survive the floor
        let monitor = monitor_with((0..12).map(|i| (i as f64, if i % 3 == 0 { 1.0 } else { 0.0 })));
        assert_eq!(monitor.fit_decay(), None);
    }

    #[test]
    fn test_noise_is_rejected() {
        // Alternating values with no trend: r^2 is zero
        let monitor = monitor_with((0..16).map(|i| (i as f64, if i % 2 == 0 { 1.0 } else { 4.0 })));
        assert_eq!(monitor.fit_decay(), None);
    }

    #[test]
    fn test_window_uses_recent_samples() {
        let mut monitor = ConvergenceMonitor::new(100, 10);
        // Early growth, then decay at rate 1
        for i in 0..20 {
            monitor.push(i as f64, (0.5 * i as f64).exp());
        }
        for i in 20..40 {
            monitor.push(i as f64, (10.0 - (i as f64 - 20.0)).exp());
        }
        let rate = monitor.estimate_decay_rate().unwrap();
        assert!((rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut monitor = ConvergenceMonitor::new(3, 3);
        for i in 0..5 {
            monitor.push(i as f64, i as f64);
        }
        assert_eq!(monitor.len(), 3);
        assert_eq!(monitor.history().next().unwrap().time, 2.0);
        assert_eq!(monitor.latest().unwrap().metric, 4.0);
    }

    #[test]
    fn test_has_converged() {
        let mut monitor = ConvergenceMonitor::new(8, 8);
        assert!(!monitor.has_converged(1.0));
        monitor.push(0.0, 0.5);
        assert!(monitor.has_converged(1.0));
        assert!(!monitor.has_converged(0.1));
        monitor.clear();
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_record_step_uses_l2_distance() {
        let a = DensityField::from_values(2, 0.5, vec![1.0; 8]).unwrap();
        let mut values = vec![1.0; 8];
        values[0] = 3.0;
        let b = DensityField::from_values(2, 0.5, values).unwrap();
        let mut monitor = ConvergenceMonitor::new(4, 4);
        let metric = monitor.record_step(0.1, &b, &a);
        // sqrt(2^2 * 0.125)
        assert!((metric - 0.5f64.sqrt()).abs() < 1e-12);
        assert_eq!(monitor.latest().unwrap().time, 0.1);
    }
}
