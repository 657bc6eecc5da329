// src/dynamics/riemann.rs
//! Pairwise Riemann solvers
//!
//! A solver turns the velocity jump `u` across a particle pair into a
//! dissipative pressure-like term. `u > 0` means the pair is approaching.

use crate::materials::WeaklyCompressibleFluid;
use crate::math::{Real, Vecd};

/// Acoustic impedance averages of a pair of materials
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcousticImpedance {
    pub rho0c0_i: Real,
    pub rho0c0_j: Real,
    pub inv_rho0c0_sum: Real,
    pub rho0c0_geo_ave: Real,
    pub inv_rho0c0_ave: Real,
    pub inv_c_ave: Real,
}

impl AcousticImpedance {
    pub fn new(rho0_i: Real, c0_i: Real, rho0_j: Real, c0_j: Real) -> Self {
        let rho0c0_i = rho0_i * c0_i;
        let rho0c0_j = rho0_j * c0_j;
        let inv_rho0c0_sum = 1.0 / (rho0c0_i + rho0c0_j);
        let inv_rho0c0_ave = 2.0 * inv_rho0c0_sum;
        Self {
            rho0c0_i,
            rho0c0_j,
            inv_rho0c0_sum,
            rho0c0_geo_ave: 2.0 * rho0c0_i * rho0c0_j * inv_rho0c0_sum,
            inv_rho0c0_ave,
            inv_c_ave: 0.5 * (rho0_i + rho0_j) * inv_rho0c0_ave,
        }
    }
}

/// Solver constants as consumed by the device kernels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiemannDeviceParams {
    pub kind: u32,
    pub rho0c0_geo_ave: Real,
    pub inv_rho0c0_ave: Real,
    pub inv_c_ave: Real,
}

pub trait RiemannSolver: Copy + Send + Sync + 'static {
    fn from_impedance(impedance: AcousticImpedance) -> Self;

    fn impedance(&self) -> &AcousticImpedance;

    /// Dissipative pressure jump, non-decreasing in `u` and zero at `u = 0`
    fn dissipative_p_jump(&self, u: Real) -> Real;

    fn dissipative_u_jump(&self, p: Real) -> Real;

    fn device_kind(&self) -> u32;

    /// Solver for a pair of particles of the same fluid
    fn for_fluid(fluid: &WeaklyCompressibleFluid) -> Self {
        let rho0 = fluid.reference_density();
        let c0 = fluid.reference_sound_speed();
        Self::from_impedance(AcousticImpedance::new(rho0, c0, rho0, c0))
    }

    /// Impedance-weighted interface pressure
    fn average_p(&self, p_i: Real, p_j: Real) -> Real {
        let z = self.impedance();
        (p_i * z.rho0c0_j + p_j * z.rho0c0_i) * z.inv_rho0c0_sum
    }

    /// Impedance-weighted interface velocity
    fn average_v(&self, v_i: Vecd, v_j: Vecd) -> Vecd {
        let z = self.impedance();
        (v_i * z.rho0c0_i + v_j * z.rho0c0_j) * z.inv_rho0c0_sum
    }

    fn device_params(&self) -> RiemannDeviceParams {
        let z = self.impedance();
        RiemannDeviceParams {
            kind: self.device_kind(),
            rho0c0_geo_ave: z.rho0c0_geo_ave,
            inv_rho0c0_ave: z.inv_rho0c0_ave,
            inv_c_ave: z.inv_c_ave,
        }
    }
}

/// No numerical dissipation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoRiemannSolver {
    impedance: AcousticImpedance,
}

impl RiemannSolver for NoRiemannSolver {
    fn from_impedance(impedance: AcousticImpedance) -> Self {
        Self { impedance }
    }

    fn impedance(&self) -> &AcousticImpedance {
        &self.impedance
    }

    fn dissipative_p_jump(&self, _u: Real) -> Real {
        0.0
    }

    fn dissipative_u_jump(&self, _p: Real) -> Real {
        0.0
    }

    fn device_kind(&self) -> u32 {
        0
    }
}

/// Acoustic solver with a limiter that switches dissipation off for
/// separating pairs and ramps it in for weak compression
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcousticRiemannSolver {
    impedance: AcousticImpedance,
}

impl RiemannSolver for AcousticRiemannSolver {
    fn from_impedance(impedance: AcousticImpedance) -> Self {
        Self { impedance }
    }

    fn impedance(&self) -> &AcousticImpedance {
        &self.impedance
    }

    fn dissipative_p_jump(&self, u: Real) -> Real {
        let limiter = (3.0 * (u * self.impedance.inv_c_ave).max(0.0)).min(1.0);
        self.impedance.rho0c0_geo_ave * u * limiter
    }

    fn dissipative_u_jump(&self, p: Real) -> Real {
        p * self.impedance.inv_rho0c0_ave
    }

    fn device_kind(&self) -> u32 {
        1
    }
}

/// Linear acoustic dissipation without limiter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DissipativeRiemannSolver {
    impedance: AcousticImpedance,
}

impl RiemannSolver for DissipativeRiemannSolver {
    fn from_impedance(impedance: AcousticImpedance) -> Self {
        Self { impedance }
    }

    fn impedance(&self) -> &AcousticImpedance {
        &self.impedance
    }

    fn dissipative_p_jump(&self, u: Real) -> Real {
        self.impedance.rho0c0_geo_ave * u
    }

    fn dissipative_u_jump(&self, p: Real) -> Real {
        p * self.impedance.inv_rho0c0_ave
    }

    fn device_kind(&self) -> u32 {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::vecd_splat;

    fn samples() -> Vec<Real> {
        (-40..=40).map(|k| k as Real * 0.05).collect()
    }

    fn check_monotone<R: RiemannSolver>(solver: R) {
        assert_eq!(solver.dissipative_p_jump(0.0), 0.0);
        let values: Vec<Real> = samples()
            .into_iter()
            .map(|u| solver.dissipative_p_jump(u))
            .collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_dissipation_monotone_and_zero_at_rest() {
        let water = WeaklyCompressibleFluid::water();
        check_monotone(NoRiemannSolver::for_fluid(&water));
        check_monotone(AcousticRiemannSolver::for_fluid(&water));
        check_monotone(DissipativeRiemannSolver::for_fluid(&water));
    }

    #[test]
    fn test_acoustic_limiter() {
        let water = WeaklyCompressibleFluid::water();
        let solver = AcousticRiemannSolver::for_fluid(&water);
        // same material: inv_c_ave = 1 / c0, geometric impedance rho0 c0
        assert!((solver.impedance().inv_c_ave - 0.1).abs() < 1e-6);
        assert_eq!(solver.dissipative_p_jump(-1.0), 0.0);
        // fully switched on once u exceeds c0 / 3
        let u = 5.0;
        let expected = 1000.0 * 10.0 * u;
        assert!((solver.dissipative_p_jump(u) - expected).abs() < 1e-4 * expected);
        // ramp region
        let u = 1.0;
        let expected = 1.0e4 * u * 0.3;
        assert!((solver.dissipative_p_jump(u) - expected).abs() < 1e-4 * expected);
    }

    #[test]
    fn test_interface_averages() {
        let z = AcousticImpedance::new(1000.0, 10.0, 1.0, 100.0);
        let solver = DissipativeRiemannSolver::from_impedance(z);
        assert!((solver.average_p(5.0, 5.0) - 5.0).abs() < 1e-5);
        let v = solver.average_v(vecd_splat(1.0), vecd_splat(1.0));
        assert!((v[0] - 1.0).abs() < 1e-6);
        // the stiffer side dominates the interface velocity
        let v = solver.average_v(vecd_splat(1.0), vecd_splat(0.0));
        assert!(v[0] > 0.9);
        assert_eq!(solver.device_params().kind, 2);
        assert!((solver.dissipative_u_jump(1.0) - z.inv_rho0c0_ave).abs() < 1e-9);
    }
}
