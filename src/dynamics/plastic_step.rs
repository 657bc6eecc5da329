// src/dynamics/plastic_step.rs
//! Acoustic second half for an elastoplastic continuum
//!
//! Interact additionally estimates the velocity gradient from the neighbor
//! velocity differences. Update closes the density half step and then
//! advances the stress state through the Drucker–Prager relation.

use super::acoustic_step::{AcousticStep2ndHalf, InitializeKernel, WallContact};
use super::correction::KernelCorrection;
use super::riemann::RiemannSolver;
use crate::execution::ExecutionPolicy;
use crate::materials::PlasticContinuum;
use crate::math::{outer_product, upgrade_to_mat3d, Mat3d, Matd, Real, Vecd};
use crate::particles::PlasticParticles;
use crate::relation::NeighborRelation;
use cgmath::{InnerSpace, Matrix, Zero};

/// How a sub-step's stress rate is written into the stress-rate field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StressRateUpdate {
    /// Replace the stored rate every sub-step
    #[default]
    Overwrite,
    /// Add into the stored rate without resetting it
    Accumulate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlasticUpdateOptions {
    pub stress_rate_update: StressRateUpdate,
    /// Integrate stress and strain over `dt` and apply the return mapping
    pub integrate_stress: bool,
}

impl Default for PlasticUpdateOptions {
    fn default() -> Self {
        Self {
            stress_rate_update: StressRateUpdate::Overwrite,
            integrate_stress: true,
        }
    }
}

impl PlasticUpdateOptions {
    /// Accumulating rate with the integration switched off
    pub fn legacy() -> Self {
        Self {
            stress_rate_update: StressRateUpdate::Accumulate,
            integrate_stress: false,
        }
    }
}

/// Writable fields of the plastic interaction phase
pub type PlasticInteractSlot<'s> = (&'s mut Real, &'s mut Vecd, &'s mut Matd);

pub struct PlasticInteractKernel<'a, R, C> {
    riemann: &'a R,
    correction: &'a C,
    relation: &'a NeighborRelation,
    velocity: &'a [Vecd],
    volume: &'a [Real],
    density: &'a [Real],
}

impl<'a, R: RiemannSolver, C: KernelCorrection> PlasticInteractKernel<'a, R, C> {
    pub fn new<P: ExecutionPolicy>(
        _policy: &P,
        encloser: &'a PlasticAcousticStep2ndHalf<R, C>,
        relation: &'a NeighborRelation,
        velocity: &'a [Vecd],
        volume: &'a [Real],
        density: &'a [Real],
    ) -> Self {
        Self {
            riemann: encloser.acoustic.riemann(),
            correction: encloser.acoustic.correction(),
            relation,
            velocity,
            volume,
            density,
        }
    }

    pub fn interact(&self, i: usize, _dt: Real, (density_rate, force, velocity_gradient): PlasticInteractSlot<'_>) {
        let mut density_change_rate = 0.0;
        let mut p_dissipation = Vecd::zero();
        let mut gradient = Matd::zero();
        let v_i = self.velocity[i];

        for neighbor in self.relation.neighbors(i) {
            let j = neighbor.index;
            let e_ij = self.correction.correct(i, neighbor.e_ij);
            let dw_ij_v_j = neighbor.dw_ij * self.volume[j];
            let v_ij = v_i - self.velocity[j];
            let u_jump = v_ij.dot(e_ij);
            density_change_rate += u_jump * dw_ij_v_j;
            p_dissipation -= e_ij * (self.riemann.dissipative_p_jump(u_jump) * dw_ij_v_j);
            gradient -= outer_product(v_ij, e_ij) * dw_ij_v_j;
        }

        *density_rate = density_change_rate * self.density[i];
        *force = p_dissipation * self.volume[i];
        *velocity_gradient = gradient;
    }
}

pub struct PlasticWallInteractKernel<'a, R, C> {
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

impl<'a, R: RiemannSolver, C: KernelCorrection> PlasticWallInteractKernel<'a, R, C> {
    pub fn new<P: ExecutionPolicy>(
        _policy: &P,
        encloser: &'a PlasticAcousticStep2ndHalf<R, C>,
        contact: WallContact<'a>,
        velocity: &'a [Vecd],
        volume: &'a [Real],
        density: &'a [Real],
    ) -> Self {
        Self {
            riemann: encloser.acoustic.riemann(),
            correction: encloser.acoustic.correction(),
            relation: contact.relation,
            velocity,
            volume,
            density,
            wall_volume: &contact.wall.volume,
            wall_average_velocity: &contact.wall.average_velocity,
            wall_normal: &contact.wall.normal,
        }
    }

    pub fn interact(&self, i: usize, _dt: Real, (density_rate, force, velocity_gradient): PlasticInteractSlot<'_>) {
        let mut density_change_rate = 0.0;
        let mut p_dissipation = Vecd::zero();
        let mut gradient = Matd::zero();
        let v_i = self.velocity[i];

        for neighbor in self.relation.neighbors(i) {
            let j = neighbor.index;
            let e_ij = self.correction.correct(i, neighbor.e_ij);
            let dw_ij_v_j = neighbor.dw_ij * self.wall_volume[j];
            let n_j = self.wall_normal[j];
            let vel_in_wall = self.wall_average_velocity[j] * 2.0 - v_i;
            let v_ij = v_i - vel_in_wall;
            density_change_rate += v_ij.dot(e_ij) * dw_ij_v_j;
            let u_jump = 2.0 * (v_i - self.wall_average_velocity[j]).dot(n_j);
            p_dissipation -= n_j * (self.riemann.dissipative_p_jump(u_jump) * dw_ij_v_j);
            gradient -= outer_product(v_ij, e_ij) * dw_ij_v_j;
        }

        *density_rate += density_change_rate * self.density[i];
        *force += p_dissipation * self.volume[i];
        *velocity_gradient += gradient;
    }
}

/// Writable fields of the plastic update phase
pub type PlasticUpdateSlot<'s> = (
    &'s mut Real,
    &'s mut Mat3d,
    &'s mut Mat3d,
    &'s mut Mat3d,
    &'s mut Mat3d,
);

pub struct PlasticUpdateKernel<'a> {
    material: &'a PlasticContinuum,
    options: PlasticUpdateOptions,
    density_rate: &'a [Real],
    velocity_gradient: &'a [Matd],
}

impl<'a> PlasticUpdateKernel<'a> {
    pub fn new<P: ExecutionPolicy, R, C>(
        _policy: &P,
        encloser: &'a PlasticAcousticStep2ndHalf<R, C>,
        density_rate: &'a [Real],
        velocity_gradient: &'a [Matd],
    ) -> Self {
        Self {
            material: &encloser.material,
            options: encloser.options,
            density_rate,
            velocity_gradient,
        }
    }

    pub fn update(
        &self,
        i: usize,
        dt: Real,
        (density, stress_rate, stress, strain_rate, strain): PlasticUpdateSlot<'_>,
    ) {
        *density += self.density_rate[i] * (dt * 0.5);

        let l = upgrade_to_mat3d(&self.velocity_gradient[i]);
        let rate = self.material.constitutive_relation(&l, stress);
        match self.options.stress_rate_update {
            StressRateUpdate::Overwrite => *stress_rate = rate,
            StressRateUpdate::Accumulate => *stress_rate += rate,
        }

        *strain_rate = (l + l.transpose()) * 0.5;
        if self.options.integrate_stress {
            *stress += *stress_rate * dt;
            *stress = self.material.return_mapping(stress);
            *strain += *strain_rate * dt;
        }
    }
}

/// Plastic second half: inner relation plus any number of wall contacts
#[derive(Debug, Clone)]
pub struct PlasticAcousticStep2ndHalf<R, C> {
    acoustic: AcousticStep2ndHalf<R, C>,
    material: PlasticContinuum,
    options: PlasticUpdateOptions,
}

impl<R: RiemannSolver, C: KernelCorrection> PlasticAcousticStep2ndHalf<R, C> {
    pub fn new(
        riemann: R,
        correction: C,
        material: PlasticContinuum,
        options: PlasticUpdateOptions,
    ) -> Self {
        Self {
            acoustic: AcousticStep2ndHalf::new(riemann, correction),
            material,
            options,
        }
    }

    pub fn material(&self) -> &PlasticContinuum {
        &self.material
    }

    pub fn options(&self) -> PlasticUpdateOptions {
        self.options
    }

    pub fn riemann(&self) -> &R {
        self.acoustic.riemann()
    }

    pub fn correction(&self) -> &C {
        self.acoustic.correction()
    }

    pub fn correction_mut(&mut self) -> &mut C {
        self.acoustic.correction_mut()
    }

    pub fn initialize_phase<P: ExecutionPolicy>(
        &self,
        policy: &P,
        particles: &mut PlasticParticles,
        dt: Real,
    ) {
        let base = &mut particles.base;
        let kernel = InitializeKernel::new(policy, &base.velocity);
        policy.for_each(base.position.as_mut_slice(), |i, position| {
            kernel.initialize(i, dt, position)
        });
    }

    pub fn interact_phase<P: ExecutionPolicy>(
        &self,
        policy: &P,
        relation: &NeighborRelation,
        particles: &mut PlasticParticles,
        dt: Real,
    ) {
        let PlasticParticles {
            base,
            velocity_gradient,
            ..
        } = particles;
        let kernel = PlasticInteractKernel::new(
            policy,
            self,
            relation,
            &base.velocity,
            &base.volume,
            &base.density,
        );
        policy.for_each(
            (
                base.density_rate.as_mut_slice(),
                base.force.as_mut_slice(),
                velocity_gradient.as_mut_slice(),
            ),
            |i, slot| kernel.interact(i, dt, slot),
        );
    }

    pub fn wall_interact_phase<P: ExecutionPolicy>(
        &self,
        policy: &P,
        contact: WallContact<'_>,
        particles: &mut PlasticParticles,
        dt: Real,
    ) {
        let PlasticParticles {
            base,
            velocity_gradient,
            ..
        } = particles;
        let kernel = PlasticWallInteractKernel::new(
            policy,
            self,
            contact,
            &base.velocity,
            &base.volume,
            &base.density,
        );
        policy.for_each(
            (
                base.density_rate.as_mut_slice(),
                base.force.as_mut_slice(),
                velocity_gradient.as_mut_slice(),
            ),
            |i, slot| kernel.interact(i, dt, slot),
        );
    }

    pub fn update_phase<P: ExecutionPolicy>(
        &self,
        policy: &P,
        particles: &mut PlasticParticles,
        dt: Real,
    ) {
        let PlasticParticles {
            base,
            velocity_gradient,
            stress_tensor_3d,
            strain_tensor_3d,
            stress_rate_3d,
            strain_rate_3d,
        } = particles;
        let kernel = PlasticUpdateKernel::new(policy, self, &base.density_rate, velocity_gradient);
        policy.for_each(
            (
                base.density.as_mut_slice(),
                stress_rate_3d.as_mut_slice(),
                stress_tensor_3d.as_mut_slice(),
                strain_rate_3d.as_mut_slice(),
                strain_tensor_3d.as_mut_slice(),
            ),
            |i, slot| kernel.update(i, dt, slot),
        );
    }

    /// Initialize, inner Interact, each wall's Interact, then Update
    pub fn exec<P: ExecutionPolicy>(
        &self,
        policy: &P,
        relation: &NeighborRelation,
        walls: &[WallContact<'_>],
        particles: &mut PlasticParticles,
        dt: Real,
    ) {
        self.initialize_phase(policy, particles, dt);
        self.interact_phase(policy, relation, particles, dt);
        for contact in walls {
            self.wall_interact_phase(policy, *contact, particles, dt);
        }
        self.update_phase(policy, particles, dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::correction::NoKernelCorrection;
    use crate::dynamics::riemann::{AcousticImpedance, AcousticRiemannSolver};
    use crate::execution::{ParallelPolicy, SequencedPolicy};
    use crate::math::{mat3d_identity, vecd_splat};
    use crate::particles::{BaseParticles, WallParticles};
    use crate::relation::Neighbor;
    use cgmath::SquareMatrix;

    fn material() -> PlasticContinuum {
        PlasticContinuum::new(2040.0, 40.0, 5.84e6, 0.3, 0.5, 0.0, 0.0)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    type SandStep = PlasticAcousticStep2ndHalf<AcousticRiemannSolver, NoKernelCorrection>;

    fn step(options: PlasticUpdateOptions) -> SandStep {
        let m = material();
        let (rho0, c0) = (m.reference_density(), m.reference_sound_speed());
        let riemann = AcousticRiemannSolver::from_impedance(AcousticImpedance::new(rho0, c0, rho0, c0));
        PlasticAcousticStep2ndHalf::new(riemann, NoKernelCorrection, m, options)
    }

    fn unit_x() -> Vecd {
        let mut e = Vecd::zero();
        e[0] = 1.0;
        e
    }

    /// Two particles compressed along x, pre-stressed hydrostatically
    fn pair() -> (PlasticParticles, NeighborRelation) {
        let mut base = BaseParticles::new();
        base.add_particle(Vecd::zero(), 0.5, 2040.0);
        base.add_particle(unit_x() * 0.1, 0.5, 2040.0);
        base.velocity[0] = unit_x() * 0.01;
        base.velocity[1] = -unit_x() * 0.01;
        let mut particles = PlasticParticles::from_base(base);
        for stress in particles.stress_tensor_3d.iter_mut() {
            *stress = mat3d_identity() * -1.0e4;
        }
        let relation = NeighborRelation::from_lists(
            vec![
                vec![Neighbor { index: 1, dw_ij: 4.0, e_ij: unit_x() }],
                vec![Neighbor { index: 0, dw_ij: 4.0, e_ij: -unit_x() }],
            ],
            0.2,
        );
        (particles, relation)
    }

    #[test]
    fn test_velocity_gradient_sign() {
        let (mut particles, relation) = pair();
        let s = step(PlasticUpdateOptions::default());
        s.interact_phase(&SequencedPolicy, &relation, &mut particles, 0.0);
        // approaching pair is compressed: dv_x/dx < 0
        // v_01 = (0.02, 0), e = (1, 0), dW V = 2
        assert!((particles.velocity_gradient[0][0][0] + 0.04).abs() < 1e-6);
        assert!((particles.velocity_gradient[1][0][0] + 0.04).abs() < 1e-6);
        assert!(particles.base.density_rate[0] > 0.0);
        // dissipation resists the approach
        let v_01 = particles.base.velocity[0] - particles.base.velocity[1];
        assert!(particles.base.force[0].dot(v_01) < 0.0);
        assert!(particles.base.force[1].dot(-v_01) < 0.0);
    }

    #[test]
    fn test_interact_overwrites_gradient() {
        let (mut particles, relation) = pair();
        particles.velocity_gradient[0] = Matd::identity() * 9.0;
        let s = step(PlasticUpdateOptions::default());
        s.interact_phase(&SequencedPolicy, &relation, &mut particles, 0.0);
        s.interact_phase(&SequencedPolicy, &relation, &mut particles, 0.0);
        assert!((particles.velocity_gradient[0][0][0] + 0.04).abs() < 1e-6);
        assert_eq!(particles.velocity_gradient[0][1][1], 0.0);
    }

    #[test]
    fn test_overwrite_keeps_single_substep_rate() {
        let (mut particles, relation) = pair();
        let s = step(PlasticUpdateOptions {
            stress_rate_update: StressRateUpdate::Overwrite,
            integrate_stress: false,
        });
        s.exec(&SequencedPolicy, &relation, &[], &mut particles, 1.0e-4);
        let first = particles.stress_rate_3d[0];
        s.exec(&SequencedPolicy, &relation, &[], &mut particles, 1.0e-4);
        assert_eq!(particles.stress_rate_3d[0], first);
        assert!(first[0][0] < 0.0);
    }

    #[test]
    fn test_legacy_accumulates_without_integrating() {
        let (mut particles, relation) = pair();
        let initial_stress = particles.stress_tensor_3d.clone();
        let s = step(PlasticUpdateOptions::legacy());
        s.exec(&SequencedPolicy, &relation, &[], &mut particles, 1.0e-4);
        let first = particles.stress_rate_3d[0];
        s.exec(&SequencedPolicy, &relation, &[], &mut particles, 1.0e-4);
        let second = particles.stress_rate_3d[0];

        // the stored rate grows by one more sub-step's rate
        assert!((second[0][0] - 2.0 * first[0][0]).abs() < 1.0e-3 * first[0][0].abs());
        assert_eq!(particles.stress_tensor_3d, initial_stress);
        assert_eq!(particles.strain_tensor_3d[0], Mat3d::zero());
    }

    #[test]
    fn test_integration_updates_stress_and_strain() {
        let (mut particles, relation) = pair();
        let dt = 1.0e-4;
        let s = step(PlasticUpdateOptions::default());
        s.exec(&SequencedPolicy, &relation, &[], &mut particles, dt);

        let rate = particles.stress_rate_3d[0];
        let expected = -1.0e4 + rate[0][0] * dt;
        assert!((particles.stress_tensor_3d[0][0][0] - expected).abs() < 1.0e-2);
        assert!((particles.strain_rate_3d[0][0][0] + 0.04).abs() < 1e-6);
        assert!((particles.strain_tensor_3d[0][0][0] + 0.04 * dt).abs() < 1e-9);
    }

    #[test]
    fn test_wall_adds_to_gradient() {
        let (mut particles, relation) = pair();
        let mut wall = WallParticles::new();
        let mut normal = Vecd::zero();
        normal[1] = 1.0;
        wall.add_particle(vecd_splat(-0.05), 0.5, normal);
        let mut e = Vecd::zero();
        e[1] = -1.0;
        let contact_relation = NeighborRelation::from_lists(
            vec![vec![Neighbor { index: 0, dw_ij: 4.0, e_ij: e }], vec![]],
            0.2,
        );
        let s = step(PlasticUpdateOptions::default());
        s.interact_phase(&SequencedPolicy, &relation, &mut particles, 0.0);
        let inner = particles.velocity_gradient[0];
        s.wall_interact_phase(
            &SequencedPolicy,
            WallContact::new(&contact_relation, &wall),
            &mut particles,
            0.0,
        );
        // v_i - v_img = 2 v_i = (0.02, 0), e = (0, -1): entry (0, 1) gains +0.04
        let after = particles.velocity_gradient[0];
        assert!((after[1][0] - inner[1][0] - 0.04).abs() < 1e-6);
        assert_eq!(after[0][0], inner[0][0]);
    }

    #[test]
    fn test_wall_dissipation_resists_relative_motion() {
        let mut wall = WallParticles::new();
        let mut normal = Vecd::zero();
        normal[1] = 1.0;
        wall.add_particle(vecd_splat(-0.05), 0.5, normal);
        let contact_relation = NeighborRelation::from_lists(
            vec![vec![Neighbor { index: 0, dw_ij: 4.0, e_ij: -normal }], vec![]],
            0.2,
        );
        let s = step(PlasticUpdateOptions::default());

        for (speed, dissipates) in [(0.01, true), (-0.01, false)] {
            let (mut particles, _) = pair();
            particles.base.velocity[0] = normal * speed;
            particles.base.force[0] = Vecd::zero();
            s.wall_interact_phase(
                &SequencedPolicy,
                WallContact::new(&contact_relation, &wall),
                &mut particles,
                0.0,
            );
            let power = particles.base.force[0].dot(particles.base.velocity[0]);
            assert!(power <= 0.0, "wall power {power} at speed {speed}");
            assert_eq!(power < 0.0, dissipates);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (mut seq, relation) = pair();
        let mut par = seq.clone();
        let s = step(PlasticUpdateOptions::default());
        for _ in 0..3 {
            s.exec(&SequencedPolicy, &relation, &[], &mut seq, 1.0e-4);
            s.exec(&ParallelPolicy, &relation, &[], &mut par, 1.0e-4);
        }
        assert_eq!(seq, par);
    }
}
