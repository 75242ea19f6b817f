//! Langevin particles for particle mode.

use glam::DVec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::serde_utils::{deserialize_dvec3, serialize_dvec3};

/// A single particle. Positions always lie inside the periodic domain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Stable identifier, assigned at spawn
    pub id: u64,
    /// World position
    #[serde(serialize_with = "serialize_dvec3", deserialize_with = "deserialize_dvec3")]
    pub position: DVec3,
    /// Current velocity
    #[serde(serialize_with = "serialize_dvec3", deserialize_with = "deserialize_dvec3")]
    pub velocity: DVec3,
}

impl Particle {
    pub fn new(id: u64, position: DVec3, velocity: DVec3) -> Self {
        Self {
            id,
            position,
            velocity,
        }
    }

    /// A stationary particle.
    pub fn at(id: u64, position: DVec3) -> Self {
        Self::new(id, position, DVec3::ZERO)
    }
}

/// Collection of particles. Ids are handed out sequentially.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Particles {
    pub list: Vec<Particle>,
    next_id: u64,
}

impl Particles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Vec::with_capacity(capacity),
            next_id: 0,
        }
    }

    /// `count` particles uniformly distributed in `[0, domain_length)^3`,
    /// each with a random direction and speed in `[0, max_speed)`.
    pub fn spawn_uniform<R: Rng + ?Sized>(
        count: usize,
        domain_length: f64,
        max_speed: f64,
        rng: &mut R,
    ) -> Self {
        let mut particles = Self::with_capacity(count);
        for _ in 0..count {
            let position = DVec3::new(
                rng.gen_range(0.0..domain_length),
                rng.gen_range(0.0..domain_length),
                rng.gen_range(0.0..domain_length),
            );
            let velocity = if max_speed > 0.0 {
                let dir = DVec3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
                .normalize_or_zero();
                dir * rng.gen_range(0.0..max_speed)
            } else {
                DVec3::ZERO
            };
            particles.spawn(position, velocity);
        }
        particles
    }

    /// Add a particle, returning its id.
    pub fn spawn(&mut self, position: DVec3, velocity: DVec3) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.list.push(Particle::new(id, position, velocity));
        id
    }

    pub fn spawn_at(&mut self, position: DVec3) -> u64 {
        self.spawn(position, DVec3::ZERO)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Largest particle speed, 0 for an empty set.
    pub fn max_speed(&self) -> f64 {
        self.list
            .iter()
            .map(|p| p.velocity.length())
            .fold(0.0, f64::max)
    }

    /// Mean kinetic energy per particle (unit mass).
    pub fn mean_kinetic_energy(&self) -> f64 {
        if self.list.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.list.iter().map(|p| 0.5 * p.velocity.length_squared()).sum();
        sum / self.list.len() as f64
    }

    pub fn has_non_finite(&self) -> bool {
        self.list
            .iter()
            .any(|p| !p.position.is_finite() || !p.velocity.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_particle_creation() {
        let p = Particle::new(7, DVec3::new(1.0, 2.0, 3.0), DVec3::new(0.1, 0.2, 0.3));
        assert_eq!(p.id, 7);
        assert_eq!(p.position, DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(Particle::at(1, DVec3::ONE).velocity, DVec3::ZERO);
    }

    #[test]
    fn test_spawn_assigns_sequential_ids() {
        let mut particles = Particles::new();
        assert_eq!(particles.spawn(DVec3::ONE, DVec3::ZERO), 0);
        assert_eq!(particles.spawn_at(DVec3::new(2.0, 2.0, 2.0)), 1);
        assert_eq!(particles.len(), 2);
        particles.clear();
        assert!(particles.is_empty());
    }

    #[test]
    fn test_spawn_uniform_inside_domain() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let particles = Particles::spawn_uniform(500, 2.0, 0.1, &mut rng);
        assert_eq!(particles.len(), 500);
        for p in &particles.list {
            assert!(p.position.cmpge(DVec3::ZERO).all() && p.position.cmplt(DVec3::splat(2.0)).all());
            assert!(p.velocity.length() < 0.1 + 1e-12);
        }
        assert!(particles.max_speed() > 0.0);
    }

    #[test]
    fn test_kinetic_energy() {
        let mut particles = Particles::new();
        assert_eq!(particles.mean_kinetic_energy(), 0.0);
        particles.spawn(DVec3::ZERO, DVec3::new(2.0, 0.0, 0.0));
        particles.spawn(DVec3::ZERO, DVec3::ZERO);
        assert!((particles.mean_kinetic_energy() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_serializes_vectors_as_fields() {
        let p = Particle::new(3, DVec3::new(0.5, 0.25, 0.0), DVec3::ZERO);
        let json = serde_json::to_value(p).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["position"]["y"], 0.25);
    }
}
