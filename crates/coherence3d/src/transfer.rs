//! Particle-to-grid deposition.
//!
//! Each particle spreads its mass over the 3x3x3 block of cells around it
//! with quadratic B-spline weights. Grid values live at cell centers, so the
//! particle position is measured in cell units from the first center and
//! rounded to the nearest node; the fractional offset then lies in
//! `[-0.5, 0.5]` where the three 1D weights sum to exactly one. All indices
//! wrap periodically.

use glam::DVec3;

use crate::error::Result;
use crate::grid::DensityField;
use crate::kernels::quadratic_bspline_1d;
use crate::particle::Particles;

/// Nearest cell-centered node and per-axis weights for nodes `base-1..=base+1`.
#[inline]
pub fn bspline_stencil(position: DVec3, cell_size: f64) -> ([i64; 3], [[f64; 3]; 3]) {
    let q = position / cell_size - DVec3::splat(0.5);
    let base = q.round();
    let frac = q - base;
    let weights = |f: f64| {
        [
            quadratic_bspline_1d(f + 1.0),
            quadratic_bspline_1d(f),
            quadratic_bspline_1d(f - 1.0),
        ]
    };
    (
        [base.x as i64, base.y as i64, base.z as i64],
        [weights(frac.x), weights(frac.y), weights(frac.z)],
    )
}

/// Replace the field values with the deposited particle density.
///
/// Every particle carries `target_mass / count`; the field is renormalized
/// afterwards so rounding never accumulates. An empty particle set leaves
/// the field untouched.
pub fn deposit_particles(field: &mut DensityField, particles: &Particles) -> Result<()> {
    if particles.is_empty() {
        return Ok(());
    }

    let n = field.resolution;
    let ni = n as i64;
    let cell_size = field.cell_size;
    let particle_density = field.target_mass() / particles.len() as f64 / field.cell_volume();

    let values = field.values_mut();
    values.fill(0.0);

    for particle in &particles.list {
        let (base, [wx, wy, wz]) = bspline_stencil(particle.position, cell_size);

        for dk in -1i64..=1 {
            let kk = (base[2] + dk).rem_euclid(ni) as usize;
            let w_z = wz[(dk + 1) as usize];
            for dj in -1i64..=1 {
                let jj = (base[1] + dj).rem_euclid(ni) as usize;
                let w_yz = wy[(dj + 1) as usize] * w_z;
                for di in -1i64..=1 {
                    let ii = (base[0] + di).rem_euclid(ni) as usize;
                    let w = wx[(di + 1) as usize] * w_yz;
                    if w <= 0.0 {
                        continue;
                    }
                    values[kk * n * n + jj * n + ii] += particle_density * w;
                }
            }
        }
    }

    field.normalize()?;
    Ok(())
}
