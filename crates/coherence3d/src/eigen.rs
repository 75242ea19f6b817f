//! Power-iteration estimate of the dominant eigenvalue of a linear operator.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{EngineError, Result};

/// A square linear map on flat `f64` vectors.
pub trait LinearOperator {
    /// Length of the vectors the operator acts on.
    fn dim(&self) -> usize;

    /// Write `A * input` into `out`. Both slices have length `dim()`.
    fn apply(&self, input: &[f64], out: &mut [f64]);
}

/// Result of a power iteration.
#[derive(Clone, Debug)]
pub struct EigenEstimate {
    /// Rayleigh quotient after the last iteration
    pub eigenvalue: f64,
    /// Unit-norm eigenvector estimate
    pub eigenvector: Vec<f64>,
    /// |lambda_k - lambda_{k-1}| / |lambda_k| for the last two iterations
    pub relative_change: f64,
    /// Iterations actually performed
    pub iterations: usize,
}

/// Seeded power-iteration estimator.
#[derive(Clone, Debug)]
pub struct EigenvalueEstimator {
    seed: u64,
    tolerance: f64,
}

impl EigenvalueEstimator {
    /// `tolerance` bounds the relative change between the last two iterations.
    pub fn new(seed: u64, tolerance: f64) -> Self {
        Self { seed, tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Power iteration from a seeded random unit vector.
    pub fn estimate_dominant_eigenvalue<O: LinearOperator + ?Sized>(
        &self,
        operator: &O,
        iterations: usize,
    ) -> Result<EigenEstimate> {
        self.estimate_from(operator, iterations, None)
    }

    /// Power iteration, optionally warm-started from a previous eigenvector.
    ///
    /// Stops early once two successive Rayleigh quotients agree within the
    /// tolerance; `iterations` is the upper bound.
    pub fn estimate_from<O: LinearOperator + ?Sized>(
        &self,
        operator: &O,
        iterations: usize,
        start: Option<&[f64]>,
    ) -> Result<EigenEstimate> {
        if iterations < 2 {
            return Err(EngineError::InvalidConfig(format!(
                "power iteration needs at least 2 iterations, got {}",
                iterations
            )));
        }
        let dim = operator.dim();

        let mut v = match start {
            Some(s) if s.len() == dim && norm(s) > 0.0 => s.to_vec(),
            _ => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
            }
        };
        let start_norm = norm(&v);
        if start_norm == 0.0 {
            return Err(EngineError::NonConvergentEstimate {
                relative_change: f64::INFINITY,
                iterations: 0,
            });
        }
        scale(&mut v, 1.0 / start_norm);

        let mut w = vec![0.0; dim];
        let mut lambda = f64::NAN;
        let mut relative_change = f64::INFINITY;
        let mut performed = 0;

        for _ in 0..iterations {
            performed += 1;
            operator.apply(&v, &mut w);
            let prev_lambda = lambda;
            lambda = dot(&v, &w);

            let w_norm = norm(&w);
            if w_norm == 0.0 || !w_norm.is_finite() {
                return Err(EngineError::NonConvergentEstimate {
                    relative_change: f64::INFINITY,
                    iterations,
                });
            }
            for (vi, wi) in v.iter_mut().zip(&w) {
                *vi = wi / w_norm;
            }

            if prev_lambda.is_finite() {
                relative_change = (lambda - prev_lambda).abs() / lambda.abs().max(f64::MIN_POSITIVE);
                if relative_change <= self.tolerance {
                    break;
                }
            }
        }

        if !(relative_change <= self.tolerance) {
            return Err(EngineError::NonConvergentEstimate {
                relative_change,
                iterations: performed,
            });
        }

        Ok(EigenEstimate {
            eigenvalue: lambda,
            eigenvector: v,
            relative_change,
            iterations: performed,
        })
    }
}

/// `||A x - lambda x|| / ||lambda x||`: how far `x` is from being a fixed
/// direction of the operator with eigenvalue `lambda`.
pub fn fixed_point_residual<O: LinearOperator + ?Sized>(
    operator: &O,
    x: &[f64],
    lambda: f64,
) -> f64 {
    let mut ax = vec![0.0; operator.dim()];
    operator.apply(x, &mut ax);
    let residual: f64 = ax
        .iter()
        .zip(x)
        .map(|(a, xi)| (a - lambda * xi) * (a - lambda * xi))
        .sum::<f64>()
        .sqrt();
    let reference = lambda.abs() * norm(x);
    if reference > 0.0 {
        residual / reference
    } else {
        f64::INFINITY
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[inline]
fn scale(a: &mut [f64], s: f64) {
    for x in a {
        *x *= s;
    }
}
