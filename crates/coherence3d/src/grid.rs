//! Periodic 3D density grid.

use glam::DVec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{CLAMP_WARN_FRACTION, MASS_FLOOR};
use crate::error::{EngineError, Result};

/// Outcome of a positivity clamp.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClampReport {
    /// Number of cells that were negative
    pub clamped: usize,
    /// Clamped cells as a fraction of all cells
    pub fraction: f64,
    /// Mass added back by zeroing the negative values (cell sum * volume)
    pub restored_mass: f64,
}

/// Non-negative scalar density on an N x N x N periodic grid.
///
/// Values are stored at cell centers in x-fastest order. The domain is the
/// cube `[0, resolution * cell_size)^3` with periodic wrap on every face.
/// Total mass is `sum(values) * cell_volume` and is pinned to `target_mass`
/// by [`DensityField::normalize`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DensityField {
    /// Number of cells along each axis
    pub resolution: usize,
    /// Size of each cell in world units
    pub cell_size: f64,
    /// Mass restored by `normalize`
    target_mass: f64,
    values: Vec<f64>,
}

impl DensityField {
    /// Create an all-zero field.
    pub fn new(resolution: usize, cell_size: f64, target_mass: f64) -> Self {
        assert!(resolution > 0, "resolution must be positive");
        assert!(cell_size > 0.0, "cell_size must be positive, got {}", cell_size);
        assert!(target_mass > 0.0, "target_mass must be positive, got {}", target_mass);
        Self {
            resolution,
            cell_size,
            target_mass,
            values: vec![0.0; resolution * resolution * resolution],
        }
    }

    /// Uniform field plus independent bounded noise per cell, normalized.
    ///
    /// `perturbation_amplitude` is relative to the uniform value and must lie
    /// in `[0, 1)` so every cell starts strictly positive. No spatial pattern
    /// is imposed: each cell draws its own sample.
    pub fn initialize(
        resolution: usize,
        domain_length: f64,
        perturbation_amplitude: f64,
        seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::initialize_with_rng(resolution, domain_length, 1.0, perturbation_amplitude, &mut rng)
    }

    /// Same as [`DensityField::initialize`] but draws from a caller-owned RNG.
    pub fn initialize_with_rng<R: Rng + ?Sized>(
        resolution: usize,
        domain_length: f64,
        target_mass: f64,
        perturbation_amplitude: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if resolution == 0 {
            return Err(EngineError::InvalidConfig("grid size must be positive".into()));
        }
        if !(domain_length > 0.0 && domain_length.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "domain length must be positive and finite, got {}",
                domain_length
            )));
        }
        if !(target_mass > 0.0 && target_mass.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "target mass must be positive and finite, got {}",
                target_mass
            )));
        }
        if !(0.0..1.0).contains(&perturbation_amplitude) {
            return Err(EngineError::InvalidConfig(format!(
                "perturbation amplitude must lie in [0, 1), got {}",
                perturbation_amplitude
            )));
        }

        let cell_size = domain_length / resolution as f64;
        let mut field = Self::new(resolution, cell_size, target_mass);
        let base = target_mass / field.domain_volume();

        for v in &mut field.values {
            let noise = if perturbation_amplitude > 0.0 {
                rng.gen_range(-perturbation_amplitude..perturbation_amplitude)
            } else {
                0.0
            };
            *v = base * (1.0 + noise);
        }

        field.normalize()?;
        Ok(field)
    }

    /// Wrap raw cell values. The mass target is taken from the values as given.
    pub fn from_values(resolution: usize, cell_size: f64, values: Vec<f64>) -> Result<Self> {
        let expected = resolution * resolution * resolution;
        if values.len() != expected {
            return Err(EngineError::InvalidConfig(format!(
                "expected {} values for a {}^3 grid, got {}",
                expected,
                resolution,
                values.len()
            )));
        }
        let mass: f64 = values.iter().sum::<f64>() * cell_size.powi(3);
        if !(mass > MASS_FLOOR && mass.is_finite()) {
            return Err(EngineError::DegenerateField { total_mass: mass });
        }
        Ok(Self {
            resolution,
            cell_size,
            target_mass: mass,
            values,
        })
    }

    // ========== Field accessors ==========

    /// Cell values in x-fastest order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Mutable cell values. Callers must restore invariants afterwards.
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Replace the values with a same-sized buffer, returning the old one.
    ///
    /// Used by the integrators to finish a double-buffered update.
    pub fn swap_values(&mut self, buffer: &mut Vec<f64>) {
        debug_assert_eq!(buffer.len(), self.values.len());
        std::mem::swap(&mut self.values, buffer);
    }

    pub fn target_mass(&self) -> f64 {
        self.target_mass
    }

    pub fn set_target_mass(&mut self, target_mass: f64) {
        assert!(target_mass > 0.0, "target_mass must be positive, got {}", target_mass);
        self.target_mass = target_mass;
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn cell_volume(&self) -> f64 {
        self.cell_size * self.cell_size * self.cell_size
    }

    /// Side length of the periodic domain.
    pub fn domain_length(&self) -> f64 {
        self.resolution as f64 * self.cell_size
    }

    pub fn domain_volume(&self) -> f64 {
        self.domain_length().powi(3)
    }

    // ========== Index functions ==========

    #[inline]
    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        let n = self.resolution;
        k * n * n + j * n + i
    }

    /// Inverse of [`DensityField::cell_index`].
    #[inline]
    pub fn cell_coords(&self, idx: usize) -> (usize, usize, usize) {
        let n = self.resolution;
        (idx % n, (idx / n) % n, idx / (n * n))
    }

    /// Wrap a signed cell coordinate into `[0, resolution)`.
    #[inline]
    pub fn wrap(&self, i: i64) -> usize {
        i.rem_euclid(self.resolution as i64) as usize
    }

    /// Index of the cell offset by (di, dj, dk) from (i, j, k), periodic.
    #[inline]
    pub fn offset_index(&self, i: usize, j: usize, k: usize, di: i64, dj: i64, dk: i64) -> usize {
        self.cell_index(
            self.wrap(i as i64 + di),
            self.wrap(j as i64 + dj),
            self.wrap(k as i64 + dk),
        )
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.values[self.cell_index(i, j, k)]
    }

    // ========== World position helpers ==========

    /// World position of a cell center.
    #[inline]
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> DVec3 {
        DVec3::new(
            (i as f64 + 0.5) * self.cell_size,
            (j as f64 + 0.5) * self.cell_size,
            (k as f64 + 0.5) * self.cell_size,
        )
    }

    /// Shortest periodic offset (in cells) from coordinate `a` to `b` on one axis.
    #[inline]
    pub fn minimum_image_offset(&self, a: usize, b: usize) -> i64 {
        let n = self.resolution as i64;
        let mut d = (b as i64 - a as i64).rem_euclid(n);
        if d > n / 2 {
            d -= n;
        }
        d
    }

    /// Periodic (minimum image) world distance between two cells.
    pub fn cell_distance(&self, a: (usize, usize, usize), b: (usize, usize, usize)) -> f64 {
        let dx = self.minimum_image_offset(a.0, b.0) as f64;
        let dy = self.minimum_image_offset(a.1, b.1) as f64;
        let dz = self.minimum_image_offset(a.2, b.2) as f64;
        (dx * dx + dy * dy + dz * dz).sqrt() * self.cell_size
    }

    // ========== Invariants ==========

    pub fn total_mass(&self) -> f64 {
        self.values.iter().sum::<f64>() * self.cell_volume()
    }

    pub fn mean(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn has_non_finite(&self) -> bool {
        self.values.iter().any(|v| !v.is_finite())
    }

    /// Rescale so total mass equals the target. Returns the applied factor.
    pub fn normalize(&mut self) -> Result<f64> {
        let mass = self.total_mass();
        if !(mass > MASS_FLOOR) || !mass.is_finite() {
            return Err(EngineError::DegenerateField { total_mass: mass });
        }
        let scale = self.target_mass / mass;
        for v in &mut self.values {
            *v *= scale;
        }
        Ok(scale)
    }

    /// Zero any negative values left behind by numerical error.
    pub fn clamp_non_negative(&mut self) -> ClampReport {
        let mut clamped = 0;
        let mut restored = 0.0;
        for v in &mut self.values {
            if *v < 0.0 {
                restored -= *v;
                *v = 0.0;
                clamped += 1;
            }
        }
        let fraction = clamped as f64 / self.values.len() as f64;
        if fraction > CLAMP_WARN_FRACTION {
            log::warn!(
                "clamped {} negative cells ({:.2}% of grid, {:.3e} mass restored): integration may be unstable",
                clamped,
                fraction * 100.0,
                restored * self.cell_volume()
            );
        }
        ClampReport {
            clamped,
            fraction,
            restored_mass: restored * self.cell_volume(),
        }
    }

    /// Volume-weighted L2 norm of the difference between two same-shaped fields.
    pub fn l2_distance(&self, other: &DensityField) -> f64 {
        assert_eq!(self.resolution, other.resolution, "field resolutions differ");
        let sum: f64 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        (sum * self.cell_volume()).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_normalizes_mass() {
        let field = DensityField::initialize(8, 1.0, 0.1, 7).unwrap();
        assert_eq!(field.len(), 512);
        assert!((field.total_mass() - 1.0).abs() < 1e-12);
        assert!(field.values().iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_initialize_noise_is_bounded() {
        let field = DensityField::initialize(8, 2.0, 0.2, 11).unwrap();
        let base = 1.0 / field.domain_volume();
        for &v in field.values() {
            // Renormalization shifts values by a factor very close to 1
            assert!(v > base * 0.79 && v < base * 1.21, "value {} outside noise band", v);
        }
    }

    #[test]
    fn test_initialize_rejects_large_amplitude() {
        let err = DensityField::initialize(8, 1.0, 1.0, 0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_amplitude_is_uniform() {
        let field = DensityField::initialize(4, 1.0, 0.0, 3).unwrap();
        let first = field.values()[0];
        assert!(field.values().iter().all(|&v| (v - first).abs() < 1e-12));
    }

    #[test]
    fn test_normalize_degenerate_field() {
        let mut field = DensityField::new(4, 0.25, 1.0);
        let err = field.normalize().unwrap_err();
        assert!(matches!(err, EngineError::DegenerateField { .. }));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut field = DensityField::initialize(6, 1.0, 0.3, 42).unwrap();
        field.values_mut()[5] *= 3.0;
        field.normalize().unwrap();
        let once = field.values().to_vec();
        let scale = field.normalize().unwrap();
        assert!((scale - 1.0).abs() < 1e-12);
        for (a, b) in once.iter().zip(field.values()) {
            assert!((a - b).abs() <= 1e-12 * a.abs().max(1.0));
        }
    }

    #[test]
    fn test_clamp_non_negative() {
        let mut field = DensityField::new(2, 0.5, 1.0);
        field.values_mut().copy_from_slice(&[1.0, -0.5, 2.0, 0.0, -1.0, 1.0, 1.0, 1.0]);
        let report = field.clamp_non_negative();
        assert_eq!(report.clamped, 2);
        assert!((report.fraction - 0.25).abs() < 1e-12);
        assert!((report.restored_mass - 1.5 * 0.125).abs() < 1e-12);
        assert!(field.values().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_index_round_trip_and_wrap() {
        let field = DensityField::new(5, 0.2, 1.0);
        let idx = field.cell_index(1, 3, 4);
        assert_eq!(field.cell_coords(idx), (1, 3, 4));
        assert_eq!(field.wrap(-1), 4);
        assert_eq!(field.wrap(5), 0);
        assert_eq!(field.offset_index(4, 0, 0, 1, -1, 0), field.cell_index(0, 4, 0));
    }

    #[test]
    fn test_minimum_image_distance() {
        let field = DensityField::new(10, 0.1, 1.0);
        assert_eq!(field.minimum_image_offset(0, 9), -1);
        assert_eq!(field.minimum_image_offset(9, 0), 1);
        assert!((field.cell_distance((0, 0, 0), (9, 0, 0)) - 0.1).abs() < 1e-12);
        assert!((field.cell_distance((0, 0, 0), (3, 4, 0)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_cell_center() {
        let field = DensityField::new(4, 0.5, 1.0);
        assert_eq!(field.cell_center(0, 1, 2), DVec3::new(0.25, 0.75, 1.25));
    }

    #[test]
    fn test_from_values_checks_length() {
        assert!(DensityField::from_values(2, 1.0, vec![1.0; 7]).is_err());
        let field = DensityField::from_values(2, 1.0, vec![1.0; 8]).unwrap();
        assert!((field.target_mass() - 8.0).abs() < 1e-12);
    }
}
