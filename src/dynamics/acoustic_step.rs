// src/dynamics/acoustic_step.rs
//! Second half of the acoustic (dual-criteria) time step
//!
//! One sub-step runs three phases in a fixed order:
//! Initialize moves particles half a step, Interact sums the continuity
//! equation and the dissipative pressure jump over the neighbors, and Update
//! closes the density half step. Velocity and pressure updates belong to the
//! first half of the step and are not touched here.
//!
//! `force` receives the dissipative pressure-jump contribution scaled by the
//! owner's volume. The inner relation overwrites it and `density_rate`; every
//! wall contact adds to both afterwards.

use super::correction::KernelCorrection;
use super::riemann::RiemannSolver;
use crate::execution::ExecutionPolicy;
use crate::math::{Real, Vecd};
use crate::particles::{BaseParticles, WallParticles};
use crate::relation::NeighborRelation;
use cgmath::{InnerSpace, Zero};

/// `position += velocity * dt / 2`
pub struct InitializeKernel<'a> {
    velocity: &'a [Vecd],
}

impl<'a> InitializeKernel<'a> {
    pub fn new<P: ExecutionPolicy>(_policy: &P, velocity: &'a [Vecd]) -> Self {
        Self { velocity }
    }

    pub fn initialize(&self, i: usize, dt: Real, position: &mut Vecd) {
        *position += self.velocity[i] * (dt * 0.5);
    }
}

/// `density += density_rate * dt / 2`
pub struct UpdateKernel<'a> {
    density_rate: &'a [Real],
}

impl<'a> UpdateKernel<'a> {
    pub fn new<P: ExecutionPolicy>(_policy: &P, density_rate: &'a [Real]) -> Self {
        Self { density_rate }
    }

    pub fn update(&self, i: usize, dt: Real, density: &mut Real) {
        *density += self.density_rate[i] * (dt * 0.5);
    }
}

/// Interaction with the particles of the same body
pub struct InteractKernel<'a, R, C> {
    riemann: &'a R,
    correction: &'a C,
    relation: &'a NeighborRelation,
    velocity: &'a [Vecd],
    volume: &'a [Real],
    density: &'a [Real],
}

impl<'a, R: RiemannSolver, C: KernelCorrection> InteractKernel<'a, R, C> {
    pub fn new<P: ExecutionPolicy>(
        _policy: &P,
        encloser: &'a AcousticStep2ndHalf<R, C>,
        relation: &'a NeighborRelation,
        velocity: &'a [Vecd],
        volume: &'a [Real],
        density: &'a [Real],
    ) -> Self {
        Self {
            riemann: &encloser.riemann,
            correction: &encloser.correction,
            relation,
            velocity,
            volume,
            density,
        }
    }

    /// Continuity sum and dissipative force before the owner scaling
    pub fn accumulate(&self, i: usize) -> (Real, Vecd) {
        let mut density_change_rate = 0.0;
        let mut p_dissipation = Vecd::zero();
        let v_i = self.velocity[i];

        for neighbor in self.relation.neighbors(i) {
            let j = neighbor.index;
            let e_ij = self.correction.correct(i, neighbor.e_ij);
            let dw_ij_v_j = neighbor.dw_ij * self.volume[j];
            let u_jump = (v_i - self.velocity[j]).dot(e_ij);
            density_change_rate += u_jump * dw_ij_v_j;
            p_dissipation -= e_ij * (self.riemann.dissipative_p_jump(u_jump) * dw_ij_v_j);
        }
        (density_change_rate, p_dissipation)
    }

    pub fn interact(&self, i: usize, _dt: Real, (density_rate, force): (&mut Real, &mut Vecd)) {
        let (density_change_rate, p_dissipation) = self.accumulate(i);
        *density_rate = density_change_rate * self.density[i];
        *force = p_dissipation * self.volume[i];
    }
}

/// A wall body together with the contact relation pointing into it
#[derive(Clone, Copy)]
pub struct WallContact<'a> {
    pub relation: &'a NeighborRelation,
    pub wall: &'a WallParticles,
}

impl<'a> WallContact<'a> {
    pub fn new(relation: &'a NeighborRelation, wall: &'a WallParticles) -> Self {
        Self { relation, wall }
    }
}

/// Interaction with the particles of one wall
pub struct WallInteractKernel<'a, R, C> {
    riemann: &'a R,
    correction: &'a C,
    relation: &'a NeighborRelation,
    velocity: &'a [Vecd],
    volume: &'a [Real],
    density: &'a [Real],
    wall_volume: &'a [Real],
    wall_average_velocity: &'a [Vecd],
    wall_normal: &'a [Vecd],
}

impl<'a, R: RiemannSolver, C: KernelCorrection> WallInteractKernel<'a, R, C> {
    pub fn new<P: ExecutionPolicy>(
        _policy: &P,
        encloser: &'a AcousticStep2ndHalf<R, C>,
        contact: WallContact<'a>,
        velocity: &'a [Vecd],
        volume: &'a [Real],
        density: &'a [Real],
    ) -> Self {
        Self {
            riemann: &encloser.riemann,
            correction: &encloser.correction,
            relation: contact.relation,
            velocity,
            volume,
            density,
            wall_volume: &contact.wall.volume,
            wall_average_velocity: &contact.wall.average_velocity,
            wall_normal: &contact.wall.normal,
        }
    }

    /// Wall contribution before the owner scaling
    pub fn accumulate(&self, i: usize) -> (Real, Vecd) {
        let mut density_change_rate = 0.0;
        let mut p_dissipation = Vecd::zero();
        let v_i = self.velocity[i];

        for neighbor in self.relation.neighbors(i) {
            let j = neighbor.index;
            let e_ij = self.correction.correct(i, neighbor.e_ij);
            let dw_ij_v_j = neighbor.dw_ij * self.wall_volume[j];
            let n_j = self.wall_normal[j];
            let vel_in_wall = self.wall_average_velocity[j] * 2.0 - v_i;
            density_change_rate += (v_i - vel_in_wall).dot(e_ij) * dw_ij_v_j;
            let u_jump = 2.0 * (v_i - self.wall_average_velocity[j]).dot(n_j);
            p_dissipation -= n_j * (self.riemann.dissipative_p_jump(u_jump) * dw_ij_v_j);
        }
        (density_change_rate, p_dissipation)
    }

    pub fn interact(&self, i: usize, _dt: Real, (density_rate, force): (&mut Real, &mut Vecd)) {
        let (density_change_rate, p_dissipation) = self.accumulate(i);
        *density_rate += density_change_rate * self.density[i];
        *force += p_dissipation * self.volume[i];
    }
}

/// Acoustic second half over a body's inner relation
#[derive(Debug, Clone)]
pub struct AcousticStep2ndHalf<R, C> {
    riemann: R,
    correction: C,
}

impl<R: RiemannSolver, C: KernelCorrection> AcousticStep2ndHalf<R, C> {
    pub fn new(riemann: R, correction: C) -> Self {
        Self {
            riemann,
            correction,
        }
    }

    pub fn riemann(&self) -> &R {
        &self.riemann
    }

    pub fn correction(&self) -> &C {
        &self.correction
    }

    pub fn correction_mut(&mut self) -> &mut C {
        &mut self.correction
    }

    pub fn initialize_phase<P: ExecutionPolicy>(
        &self,
        policy: &P,
        particles: &mut BaseParticles,
        dt: Real,
    ) {
        let BaseParticles {
            position, velocity, ..
        } = particles;
        let kernel = InitializeKernel::new(policy, velocity);
        policy.for_each(position.as_mut_slice(), |i, position| {
            kernel.initialize(i, dt, position)
        });
    }

    pub fn interact_phase<P: ExecutionPolicy>(
        &self,
        policy: &P,
        relation: &NeighborRelation,
        particles: &mut BaseParticles,
        dt: Real,
    ) {
        let BaseParticles {
            velocity,
            volume,
            density,
            density_rate,
            force,
            ..
        } = particles;
        let kernel = InteractKernel::new(policy, self, relation, velocity, volume, density);
        policy.for_each(
            (density_rate.as_mut_slice(), force.as_mut_slice()),
            |i, slot| kernel.interact(i, dt, slot),
        );
    }

    pub fn wall_interact_phase<P: ExecutionPolicy>(
        &self,
        policy: &P,
        contact: WallContact<'_>,
        particles: &mut BaseParticles,
        dt: Real,
    ) {
        let BaseParticles {
            velocity,
            volume,
            density,
            density_rate,
            force,
            ..
        } = particles;
        let kernel = WallInteractKernel::new(policy, self, contact, velocity, volume, density);
        policy.for_each(
            (density_rate.as_mut_slice(), force.as_mut_slice()),
            |i, slot| kernel.interact(i, dt, slot),
        );
    }

    pub fn update_phase<P: ExecutionPolicy>(
        &self,
        policy: &P,
        particles: &mut BaseParticles,
        dt: Real,
    ) {
        let BaseParticles {
            density,
            density_rate,
            ..
        } = particles;
        let kernel = UpdateKernel::new(policy, density_rate);
        policy.for_each(density.as_mut_slice(), |i, density| {
            kernel.update(i, dt, density)
        });
    }

    /// Runs the three phases over the inner relation only
    pub fn exec<P: ExecutionPolicy>(
        &self,
        policy: &P,
        relation: &NeighborRelation,
        particles: &mut BaseParticles,
        dt: Real,
    ) {
        self.initialize_phase(policy, particles, dt);
        self.interact_phase(policy, relation, particles, dt);
        self.update_phase(policy, particles, dt);
    }
}

/// Inner relation plus any number of wall contacts
#[derive(Debug, Clone)]
pub struct AcousticStep2ndHalfWithWall<R, C> {
    inner: AcousticStep2ndHalf<R, C>,
}

impl<R: RiemannSolver, C: KernelCorrection> AcousticStep2ndHalfWithWall<R, C> {
    pub fn new(riemann: R, correction: C) -> Self {
        Self {
            inner: AcousticStep2ndHalf::new(riemann, correction),
        }
    }

    pub fn inner(&self) -> &AcousticStep2ndHalf<R, C> {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut AcousticStep2ndHalf<R, C> {
        &mut self.inner
    }

    /// Initialize, inner Interact, each wall's Interact, then Update
    pub fn exec<P: ExecutionPolicy>(
        &self,
        policy: &P,
        relation: &NeighborRelation,
        walls: &[WallContact<'_>],
        particles: &mut BaseParticles,
        dt: Real,
    ) {
        self.inner.initialize_phase(policy, particles, dt);
        self.inner.interact_phase(policy, relation, particles, dt);
        for contact in walls {
            self.inner.wall_interact_phase(policy, *contact, particles, dt);
        }
        self.inner.update_phase(policy, particles, dt);
    }
}
