//! Nonlocal coherence operator.
//!
//! Two evaluation paths for the same Gaussian convolution
//! `(C rho)(x) = integral K(|x - y|) rho(y) dy` on the periodic grid:
//!
//! - **Kernel**: direct truncated sum over a precomputed spherical stencil,
//!   O(N^3 r^3).
//! - **Eigenmode**: projection onto the periodic standing waves with integer
//!   wavevectors in `[-modes, modes]^3`, each weighted by the kernel's own
//!   Fourier response. This is an *approximation* of the kernel path (it
//!   drops the short-wavelength content), not a different model. Mode
//!   weights depend only on |k| and the kernel scale.
//!
//! Both paths read the input slice and write a separate output buffer, so a
//! step always sees the start-of-step density.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::eigen::LinearOperator;
use crate::error::{EngineError, Result};
use crate::grid::DensityField;
use crate::kernels::{coherence_spectral_weight, coherence_weight};

/// How the coherence field is evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CoherenceMethod {
    /// Direct truncated-kernel sum
    #[default]
    Kernel,
    /// Standing-wave approximation using wavevectors up to `modes` per axis
    Eigenmode { modes: usize },
}

/// Precomputed neighbor offsets (in cells) and weights (kernel * cell volume).
#[derive(Clone, Debug)]
pub struct KernelStencil {
    offsets: Vec<[i64; 3]>,
    weights: Vec<f64>,
}

impl KernelStencil {
    /// Build the spherical stencil of all offsets within `cutoff_radius`.
    pub fn build(
        resolution: usize,
        cell_size: f64,
        kernel_scale: f64,
        cutoff_radius: f64,
    ) -> Result<Self> {
        if !(kernel_scale > 0.0 && kernel_scale.is_finite()) {
            return Err(EngineError::InvalidKernelConfiguration(format!(
                "kernel scale must be positive and finite, got {}",
                kernel_scale
            )));
        }
        if !(cutoff_radius > 0.0 && cutoff_radius.is_finite()) {
            return Err(EngineError::InvalidKernelConfiguration(format!(
                "cutoff radius must be positive and finite, got {}",
                cutoff_radius
            )));
        }

        let reach_cells = (cutoff_radius / cell_size + 1e-9).floor();
        if 2.0 * reach_cells >= resolution as f64 {
            return Err(EngineError::InvalidKernelConfiguration(format!(
                "cutoff radius {} spans {} cells, which wraps a periodic grid of {} cells",
                cutoff_radius, reach_cells, resolution
            )));
        }
        let reach = reach_cells as i64;
        if reach == 0 {
            return Err(EngineError::InvalidKernelConfiguration(format!(
                "cutoff radius {} is smaller than the cell size {}: no neighbors in range",
                cutoff_radius, cell_size
            )));
        }

        let cell_volume = cell_size * cell_size * cell_size;
        let limit = cutoff_radius * (1.0 + 1e-12);
        let mut offsets = Vec::new();
        let mut weights = Vec::new();
        for dk in -reach..=reach {
            for dj in -reach..=reach {
                for di in -reach..=reach {
                    let d = stencil_distance([di, dj, dk], cell_size);
                    if d <= limit {
                        offsets.push([di, dj, dk]);
                        weights.push(coherence_weight(d, kernel_scale) * cell_volume);
                    }
                }
            }
        }

        // The center cell is always present; a stencil of one is no kernel at all.
        if offsets.len() <= 1 {
            return Err(EngineError::InvalidKernelConfiguration(format!(
                "cutoff radius {} yields an empty neighbor set",
                cutoff_radius
            )));
        }

        Ok(Self { offsets, weights })
    }

    /// Number of cells in the stencil, including the center.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[[i64; 3]] {
        &self.offsets
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Sum of all stencil weights (the operator's row sum).
    pub fn total_weight(&self) -> f64 {
        self.weights.iter().sum()
    }
}

/// World distance of an offset in cells.
#[inline]
pub fn stencil_distance(offset: [i64; 3], cell_size: f64) -> f64 {
    let [di, dj, dk] = offset;
    ((di * di + dj * dj + dk * dk) as f64).sqrt() * cell_size
}

/// One periodic standing wave with its kernel response weight.
#[derive(Clone, Copy, Debug)]
struct Mode {
    wave: [i64; 3],
    weight: f64,
}

/// Symmetric, bounded, positive nonlocal transform of a density field.
#[derive(Clone, Debug)]
pub struct CoherenceOperator {
    resolution: usize,
    cell_size: f64,
    kernel_scale: f64,
    cutoff_radius: f64,
    method: CoherenceMethod,
    stencil: KernelStencil,
    modes: Vec<Mode>,
    /// Per-axis phasors (cos, sin) of 2 pi a (i + 0.5) / n, indexed [a + max_mode][i]
    phasors: Vec<Vec<(f64, f64)>>,
    max_mode: i64,
}

impl CoherenceOperator {
    /// Validate the kernel configuration and precompute the stencil or modes.
    pub fn new(
        resolution: usize,
        cell_size: f64,
        kernel_scale: f64,
        cutoff_radius: f64,
        method: CoherenceMethod,
    ) -> Result<Self> {
        let stencil = KernelStencil::build(resolution, cell_size, kernel_scale, cutoff_radius)?;

        let (modes, phasors, max_mode) = match method {
            CoherenceMethod::Kernel => (Vec::new(), Vec::new(), 0),
            CoherenceMethod::Eigenmode { modes } => {
                if modes == 0 {
                    return Err(EngineError::InvalidKernelConfiguration(
                        "eigenmode approximation needs at least one mode per axis".into(),
                    ));
                }
                if modes >= resolution.div_ceil(2) {
                    return Err(EngineError::InvalidKernelConfiguration(format!(
                        "{} modes per axis exceed the Nyquist limit of a {}-cell grid",
                        modes, resolution
                    )));
                }
                let m = modes as i64;
                let domain = resolution as f64 * cell_size;
                let base_k = 2.0 * std::f64::consts::PI / domain;

                let mut list = Vec::with_capacity((2 * modes + 1).pow(3));
                for c in -m..=m {
                    for b in -m..=m {
                        for a in -m..=m {
                            let k = base_k * ((a * a + b * b + c * c) as f64).sqrt();
                            list.push(Mode {
                                wave: [a, b, c],
                                weight: coherence_spectral_weight(k, kernel_scale),
                            });
                        }
                    }
                }

                let n = resolution as f64;
                let phasors = (-m..=m)
                    .map(|a| {
                        (0..resolution)
                            .map(|i| {
                                let theta =
                                    2.0 * std::f64::consts::PI * a as f64 * (i as f64 + 0.5) / n;
                                (theta.cos(), theta.sin())
                            })
                            .collect()
                    })
                    .collect();
                (list, phasors, m)
            }
        };

        Ok(Self {
            resolution,
            cell_size,
            kernel_scale,
            cutoff_radius,
            method,
            stencil,
            modes,
            phasors,
            max_mode,
        })
    }

    pub fn method(&self) -> CoherenceMethod {
        self.method
    }

    pub fn kernel_scale(&self) -> f64 {
        self.kernel_scale
    }

    pub fn cutoff_radius(&self) -> f64 {
        self.cutoff_radius
    }

    pub fn stencil(&self) -> &KernelStencil {
        &self.stencil
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Evaluate the coherence field of `field` with the configured method.
    pub fn compute(&self, field: &DensityField, out: &mut Vec<f64>) {
        assert_eq!(field.resolution, self.resolution, "field/operator resolution mismatch");
        out.resize(field.len(), 0.0);
        match self.method {
            CoherenceMethod::Kernel => self.convolve(field.values(), out),
            CoherenceMethod::Eigenmode { .. } => self.project(field.values(), out),
        }
    }

    /// Direct stencil sum; each output cell is independent.
    fn convolve(&self, input: &[f64], out: &mut [f64]) {
        let n = self.resolution;
        let ni = n as i64;
        let offsets = &self.stencil.offsets;
        let weights = &self.stencil.weights;

        out.par_iter_mut().enumerate().for_each(|(idx, o)| {
            let i = (idx % n) as i64;
            let j = ((idx / n) % n) as i64;
            let k = (idx / (n * n)) as i64;
            let mut acc = 0.0;
            for (off, w) in offsets.iter().zip(weights) {
                let ii = (i + off[0]).rem_euclid(ni) as usize;
                let jj = (j + off[1]).rem_euclid(ni) as usize;
                let kk = (k + off[2]).rem_euclid(ni) as usize;
                acc += w * input[kk * n * n + jj * n + ii];
            }
            *o = acc;
        });
    }

    /// Standing-wave projection and weighted reconstruction.
    fn project(&self, input: &[f64], out: &mut [f64]) {
        let n = self.resolution;
        let cell_volume = self.cell_size.powi(3);
        let inv_volume = 1.0 / (n as f64 * self.cell_size).powi(3);

        // Projection: each mode's sum runs sequentially, so results are reproducible.
        let coefficients: Vec<(f64, f64)> = self
            .modes
            .par_iter()
            .map(|mode| {
                let mut a = 0.0;
                let mut b = 0.0;
                for (idx, &rho) in input.iter().enumerate() {
                    let (c, s) = self.phase(mode.wave, idx);
                    a += rho * c;
                    b += rho * s;
                }
                (a * cell_volume, b * cell_volume)
            })
            .collect();

        out.par_iter_mut().enumerate().for_each(|(idx, o)| {
            let mut acc = 0.0;
            for (mode, &(a, b)) in self.modes.iter().zip(&coefficients) {
                let (c, s) = self.phase(mode.wave, idx);
                acc += mode.weight * (a * c + b * s);
            }
            *o = acc * inv_volume;
        });
    }

    /// cos and sin of k . x for a cell, from the per-axis phasor tables.
    #[inline]
    fn phase(&self, wave: [i64; 3], idx: usize) -> (f64, f64) {
        let n = self.resolution;
        let m = self.max_mode;
        let (cx, sx) = self.phasors[(wave[0] + m) as usize][idx % n];
        let (cy, sy) = self.phasors[(wave[1] + m) as usize][(idx / n) % n];
        let (cz, sz) = self.phasors[(wave[2] + m) as usize][idx / (n * n)];
        let (cxy, sxy) = (cx * cy - sx * sy, sx * cy + cx * sy);
        (cxy * cz - sxy * sz, sxy * cz + cxy * sz)
    }
}

impl LinearOperator for CoherenceOperator {
    fn dim(&self) -> usize {
        self.resolution * self.resolution * self.resolution
    }

    fn apply(&self, input: &[f64], out: &mut [f64]) {
        match self.method {
            CoherenceMethod::Kernel => self.convolve(input, out),
            CoherenceMethod::Eigenmode { .. } => self.project(input, out),
        }
    }
}

/// Truncated-kernel coherence of `field`.
pub fn apply_kernel(field: &DensityField, kernel_scale: f64, cutoff_radius: f64) -> Result<Vec<f64>> {
    let op = CoherenceOperator::new(
        field.resolution,
        field.cell_size,
        kernel_scale,
        cutoff_radius,
        CoherenceMethod::Kernel,
    )?;
    let mut out = Vec::new();
    op.compute(field, &mut out);
    Ok(out)
}

/// Eigenmode approximation of the coherence of `field`.
///
/// The cutoff is only validated here; the projection itself uses every mode
/// up to `modes` per axis.
pub fn apply_eigenmode(field: &DensityField, kernel_scale: f64, modes: usize) -> Result<Vec<f64>> {
    let cutoff = (3.0 * kernel_scale)
        .min((field.resolution as f64 / 2.0 - 1.0).max(1.0) * field.cell_size);
    let op = CoherenceOperator::new(
        field.resolution,
        field.cell_size,
        kernel_scale,
        cutoff,
        CoherenceMethod::Eigenmode { modes },
    )?;
    let mut out = Vec::new();
    op.compute(field, &mut out);
    Ok(out)
}
