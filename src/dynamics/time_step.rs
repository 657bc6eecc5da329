// src/dynamics/time_step.rs
//! Time-step size reductions
//!
//! The advection step bounds the outer step by particle travel, the acoustic
//! step bounds the inner sub-steps by the sound speed.

use crate::execution::ExecutionPolicy;
use crate::math::{Real, TINY_REAL};
use crate::particles::BaseParticles;
use cgmath::InnerSpace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvectionTimeStep {
    h_min: Real,
    speed_ref: Real,
    advection_cfl: Real,
}

impl AdvectionTimeStep {
    pub fn new(h_min: Real, speed_ref: Real) -> Self {
        Self {
            h_min,
            speed_ref,
            advection_cfl: 0.25,
        }
    }

    pub fn with_cfl(mut self, advection_cfl: Real) -> Self {
        self.advection_cfl = advection_cfl;
        self
    }

    pub fn cfl(&self) -> Real {
        self.advection_cfl
    }

    /// Squared speed bound of particle `i`
    pub fn reduce_particle(&self, particles: &BaseParticles, i: usize) -> Real {
        let acceleration = (particles.force[i] + particles.force_prior[i]).magnitude()
            / particles.mass[i];
        particles.velocity[i]
            .magnitude2()
            .max(4.0 * self.h_min * acceleration)
    }

    pub fn exec<P: ExecutionPolicy>(&self, policy: &P, particles: &BaseParticles) -> Real {
        let max_squared = policy.reduce(
            particles.len(),
            0.0,
            |i| self.reduce_particle(particles, i),
            Real::max,
        );
        let speed = max_squared.sqrt().max(self.speed_ref);
        self.advection_cfl * self.h_min / (speed + TINY_REAL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcousticTimeStep {
    c0: Real,
    h_min: Real,
    acoustic_cfl: Real,
}

impl AcousticTimeStep {
    pub fn new(c0: Real, h_min: Real) -> Self {
        Self {
            c0,
            h_min,
            acoustic_cfl: 0.6,
        }
    }

    pub fn with_cfl(mut self, acoustic_cfl: Real) -> Self {
        self.acoustic_cfl = acoustic_cfl;
        self
    }

    pub fn cfl(&self) -> Real {
        self.acoustic_cfl
    }

    /// Signal speed bound of particle `i`
    pub fn reduce_particle(&self, particles: &BaseParticles, i: usize) -> Real {
        let acceleration = (particles.force[i] + particles.force_prior[i]).magnitude()
            / particles.mass[i];
        let signal = self.c0 + particles.velocity[i].magnitude();
        signal.max((4.0 * self.h_min * acceleration).sqrt())
    }

    pub fn exec<P: ExecutionPolicy>(&self, policy: &P, particles: &BaseParticles) -> Real {
        // every particle's bound is at least c0
        let max_speed = policy.reduce(
            particles.len(),
            self.c0,
            |i| self.reduce_particle(particles, i),
            Real::max,
        );
        self.acoustic_cfl * self.h_min / (max_speed + TINY_REAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ParallelPolicy, SequencedPolicy};
    use crate::math::{vecd_splat, Vecd};
    use cgmath::Zero;

    fn particles(velocities: &[Real]) -> BaseParticles {
        let mut particles = BaseParticles::new();
        for (k, v) in velocities.iter().enumerate() {
            let i = particles.add_particle(vecd_splat(k as Real), 1.0, 1000.0);
            let mut velocity = Vecd::zero();
            velocity[0] = *v;
            particles.velocity[i] = velocity;
        }
        particles
    }

    #[test]
    fn test_advection_uses_reference_speed_at_rest() {
        let p = particles(&[0.0, 0.0]);
        let dt = AdvectionTimeStep::new(0.1, 2.0).exec(&SequencedPolicy, &p);
        assert!((dt - 0.25 * 0.1 / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_advection_fastest_particle() {
        let p = particles(&[1.0, -4.0, 3.0]);
        let dt = AdvectionTimeStep::new(0.1, 1.0).exec(&SequencedPolicy, &p);
        assert!((dt - 0.25 * 0.1 / 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_advection_force_bound() {
        let mut p = particles(&[0.0]);
        // mass 1000, |f| = 1.0e5: 4 h a = 40, speed bound sqrt(40)
        p.force[0] = Vecd::unit_x() * 1.0e5;
        let dt = AdvectionTimeStep::new(0.1, 1.0).exec(&SequencedPolicy, &p);
        let expected = 0.025 / (40.0 as Real).sqrt();
        assert!((dt - expected).abs() < 1e-6);
    }

    #[test]
    fn test_acoustic_step() {
        let p = particles(&[0.0, 2.0]);
        let dt = AcousticTimeStep::new(10.0, 0.1).exec(&SequencedPolicy, &p);
        assert!((dt - 0.6 * 0.1 / 12.0).abs() < 1e-6);
        let empty = BaseParticles::new();
        let dt = AcousticTimeStep::new(10.0, 0.1).exec(&SequencedPolicy, &empty);
        assert!((dt - 0.006).abs() < 1e-6);
    }

    #[test]
    fn test_policies_agree() {
        let velocities: Vec<Real> = (0..500).map(|k| ((k * 37) % 101) as Real * 0.01).collect();
        let p = particles(&velocities);
        let advection = AdvectionTimeStep::new(0.05, 0.5);
        let acoustic = AcousticTimeStep::new(20.0, 0.05).with_cfl(0.5);
        assert_eq!(
            advection.exec(&SequencedPolicy, &p),
            advection.exec(&ParallelPolicy, &p)
        );
        assert_eq!(
            acoustic.exec(&SequencedPolicy, &p),
            acoustic.exec(&ParallelPolicy, &p)
        );
    }
}
