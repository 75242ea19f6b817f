//! Langevin particle update for particle mode.
//!
//! Per particle and step:
//!
//! ```text
//! v += dt * (-friction * v + attraction * grad C(x) + noise * xi),  xi ~ N(0, I)
//! x += dt * v                                                      (wrapped)
//! ```
//!
//! `grad C` is the central-difference gradient of the coherence field,
//! sampled at the particle by trilinear interpolation between cell centers.

use glam::DVec3;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::config::ParticleParams;
use crate::particle::Particles;

/// Periodic central-difference gradient of a cell-centered scalar field.
pub fn central_gradient(values: &[f64], resolution: usize, cell_size: f64) -> Vec<DVec3> {
    let n = resolution;
    let inv_2dx = 0.5 / cell_size;
    let mut grad = vec![DVec3::ZERO; values.len()];

    grad.par_iter_mut().enumerate().for_each(|(idx, g)| {
        let i = idx % n;
        let j = (idx / n) % n;
        let k = idx / (n * n);
        let at = |i: usize, j: usize, k: usize| values[k * n * n + j * n + i];
        let (ip, im) = ((i + 1) % n, (i + n - 1) % n);
        let (jp, jm) = ((j + 1) % n, (j + n - 1) % n);
        let (kp, km) = ((k + 1) % n, (k + n - 1) % n);
        *g = DVec3::new(
            at(ip, j, k) - at(im, j, k),
            at(i, jp, k) - at(i, jm, k),
            at(i, j, kp) - at(i, j, km),
        ) * inv_2dx;
    });

    grad
}

/// Trilinear interpolation of a cell-centered vector field at a world position.
pub fn sample_trilinear(field: &[DVec3], resolution: usize, cell_size: f64, position: DVec3) -> DVec3 {
    let n = resolution as i64;
    let q = position / cell_size - DVec3::splat(0.5);
    let base = q.floor();
    let t = q - base;
    let (bi, bj, bk) = (base.x as i64, base.y as i64, base.z as i64);

    let mut result = DVec3::ZERO;
    for dk in 0..2i64 {
        let wz = if dk == 0 { 1.0 - t.z } else { t.z };
        let kk = (bk + dk).rem_euclid(n) as usize;
        for dj in 0..2i64 {
            let wy = if dj == 0 { 1.0 - t.y } else { t.y };
            let jj = (bj + dj).rem_euclid(n) as usize;
            for di in 0..2i64 {
                let wx = if di == 0 { 1.0 - t.x } else { t.x };
                let ii = (bi + di).rem_euclid(n) as usize;
                let idx = kk * resolution * resolution + jj * resolution + ii;
                result += field[idx] * (wx * wy * wz);
            }
        }
    }
    result
}

/// Velocity update: friction, coherence attraction and thermal noise.
///
/// Particles are visited in order and draw three normals each from `rng`,
/// so a seeded RNG gives a reproducible run.
pub fn apply_langevin_forces<R: Rng + ?Sized>(
    particles: &mut Particles,
    coherence_gradient: &[DVec3],
    resolution: usize,
    cell_size: f64,
    params: &ParticleParams,
    dt: f64,
    rng: &mut R,
) {
    for particle in &mut particles.list {
        let force = sample_trilinear(coherence_gradient, resolution, cell_size, particle.position);
        let xi = DVec3::new(
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
            rng.sample(StandardNormal),
        );
        let accel = -params.friction * particle.velocity + params.attraction * force + params.noise_amplitude * xi;
        particle.velocity += accel * dt;
    }
}

/// Advect particles using simple Euler integration.
pub fn advect_particles(particles: &mut Particles, dt: f64) {
    for particle in &mut particles.list {
        particle.position += particle.velocity * dt;
    }
}

/// Wrap every particle back into `[0, domain_length)^3`.
pub fn wrap_particles(particles: &mut Particles, domain_length: f64) {
    for particle in &mut particles.list {
        let p = particle.position;
        let mut wrapped = DVec3::new(
            p.x.rem_euclid(domain_length),
            p.y.rem_euclid(domain_length),
            p.z.rem_euclid(domain_length),
        );
        // rem_euclid can round up to exactly domain_length for tiny negatives
        for c in [&mut wrapped.x, &mut wrapped.y, &mut wrapped.z] {
            if *c >= domain_length {
                *c = 0.0;
            }
        }
        particle.position = wrapped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn quiet_params(friction: f64, attraction: f64) -> ParticleParams {
        ParticleParams {
            friction,
            attraction,
            noise_amplitude: 0.0,
            ..ParticleParams::default()
        }
    }

    #[test]
    fn test_advection() {
        let mut particles = Particles::new();
        particles.spawn(DVec3::new(1.0, 1.0, 1.0), DVec3::new(1.0, 2.0, 3.0));

        advect_particles(&mut particles, 0.5);

        let p = &particles.list[0];
        assert!((p.position - DVec3::new(1.5, 2.0, 2.5)).length() < 1e-12);
    }

    #[test]
    fn test_wrap_particles() {
        let mut particles = Particles::new();
        particles.spawn_at(DVec3::new(-0.25, 1.25, 0.5));
        particles.spawn_at(DVec3::new(-1e-18, 0.0, 0.999));
        wrap_particles(&mut particles, 1.0);

        assert!((particles.list[0].position - DVec3::new(0.75, 0.25, 0.5)).length() < 1e-12);
        let p = particles.list[1].position;
        assert!(p.x >= 0.0 && p.x < 1.0);
    }

    #[test]
    fn test_central_gradient_of_linear_ramp() {
        // f = i along x; interior gradient is 1 / dx, the periodic seam is not
        let n = 6;
        let dx = 0.5;
        let values: Vec<f64> = (0..n * n * n).map(|idx| (idx % n) as f64).collect();
        let grad = central_gradient(&values, n, dx);
        let interior = 2 * n * n + 3 * n + 2;
        assert!((grad[interior] - DVec3::new(2.0, 0.0, 0.0)).length() < 1e-12);
        let seam = 0;
        assert!(grad[seam].x < 0.0);
    }

    #[test]
    fn test_trilinear_exact_at_centers_and_midpoints() {
        let n = 4;
        let dx = 0.25;
        let field: Vec<DVec3> = (0..n * n * n)
            .map(|idx| DVec3::new((idx % n) as f64, 0.0, 0.0))
            .collect();

        let at_center = sample_trilinear(&field, n, dx, DVec3::new(1.5 * dx, 0.5 * dx, 0.5 * dx));
        assert!((at_center.x - 1.0).abs() < 1e-12);

        let midway = sample_trilinear(&field, n, dx, DVec3::new(2.0 * dx, 0.5 * dx, 0.5 * dx));
        assert!((midway.x - 1.5).abs() < 1e-12);

        // Between the last center (3) and the wrapped first center (0)
        let seam = sample_trilinear(&field, n, dx, DVec3::new(0.0, 0.5 * dx, 0.5 * dx));
        assert!((seam.x - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_friction_only_decays_velocity() {
        let mut particles = Particles::new();
        particles.spawn(DVec3::splat(0.5), DVec3::new(1.0, 0.0, 0.0));
        let grad = vec![DVec3::ZERO; 64];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        apply_langevin_forces(&mut particles, &grad, 4, 0.25, &quiet_params(2.0, 1.0), 0.1, &mut rng);
        assert!((particles.list[0].velocity.x - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_attraction_follows_gradient() {
        let mut particles = Particles::new();
        particles.spawn_at(DVec3::splat(0.3));
        let grad = vec![DVec3::new(0.0, -2.0, 0.0); 64];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        apply_langevin_forces(&mut particles, &grad, 4, 0.25, &quiet_params(0.0, 3.0), 0.5, &mut rng);
        assert!((particles.list[0].velocity - DVec3::new(0.0, -3.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_noise_is_seeded() {
        let params = ParticleParams {
            noise_amplitude: 1.0,
            ..ParticleParams::default()
        };
        let grad = vec![DVec3::ZERO; 64];
        let run = |seed| {
            let mut particles = Particles::new();
            particles.spawn_at(DVec3::splat(0.5));
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            apply_langevin_forces(&mut particles, &grad, 4, 0.25, &params, 0.1, &mut rng);
            particles.list[0].velocity
        };
        assert_eq!(run(9), run(9));
        assert_ne!(run(9), run(10));
    }
}
