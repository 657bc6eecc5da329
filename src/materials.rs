// src/materials.rs
//! Material constants and constitutive updates
//!
//! Materials are plain values. They are read by every particle of a step and
//! hold no per-step state.

use crate::error::{SphError, SphResult};
use crate::math::{double_contraction, mat3d_identity, Mat3d, Real, TINY_REAL};
use cgmath::{Matrix, SquareMatrix};

/// Weakly compressible fluid with a linear equation of state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaklyCompressibleFluid {
    rho0: Real,
    c0: Real,
    mu: Real,
}

impl WeaklyCompressibleFluid {
    pub fn new(rho0: Real, c0: Real, mu: Real) -> SphResult<Self> {
        if rho0 <= 0.0 || c0 <= 0.0 || mu < 0.0 {
            return Err(SphError::config(format!(
                "fluid requires rho0 > 0, c0 > 0 and mu >= 0 (got {rho0}, {c0}, {mu})"
            )));
        }
        Ok(Self { rho0, c0, mu })
    }

    /// Water-like fluid, artificial sound speed ten times a 1 m/s flow
    pub fn water() -> Self {
        Self {
            rho0: 1000.0,
            c0: 10.0,
            mu: 1.0e-3,
        }
    }

    pub fn reference_density(&self) -> Real {
        self.rho0
    }

    pub fn reference_sound_speed(&self) -> Real {
        self.c0
    }

    pub fn reference_viscosity(&self) -> Real {
        self.mu
    }

    pub fn pressure(&self, rho: Real) -> Real {
        self.c0 * self.c0 * (rho - self.rho0)
    }

    pub fn density_from_pressure(&self, p: Real) -> Real {
        p / (self.c0 * self.c0) + self.rho0
    }
}

/// Drucker–Prager coefficient `tanθ / √(9 + 12 tan²θ)`
fn dp_constant_a(angle: Real) -> Real {
    let t = angle.tan();
    t / (9.0 + 12.0 * t * t).sqrt()
}

/// Drucker–Prager elastoplastic continuum with a non-associated flow rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlasticContinuum {
    rho0: Real,
    c0: Real,
    youngs_modulus: Real,
    poisson_ratio: Real,
    friction_angle: Real,
    cohesion: Real,
    dilatancy: Real,
    shear_modulus: Real,
    bulk_modulus: Real,
    alpha_phi: Real,
    alpha_psi: Real,
    k_c: Real,
}

impl PlasticContinuum {
    /// Angles are in radians
    pub fn new(
        rho0: Real,
        c0: Real,
        youngs_modulus: Real,
        poisson_ratio: Real,
        friction_angle: Real,
        cohesion: Real,
        dilatancy: Real,
    ) -> SphResult<Self> {
        if rho0 <= 0.0 || c0 <= 0.0 || youngs_modulus <= 0.0 {
            return Err(SphError::config(
                "plastic continuum requires positive density, sound speed and Young's modulus",
            ));
        }
        if !(0.0..0.5).contains(&poisson_ratio) {
            return Err(SphError::config(format!(
                "Poisson ratio {poisson_ratio} outside [0, 0.5)"
            )));
        }
        if friction_angle <= 0.0 || cohesion < 0.0 {
            return Err(SphError::config(
                "friction angle must be positive and cohesion non-negative",
            ));
        }

        let t = friction_angle.tan();
        Ok(Self {
            rho0,
            c0,
            youngs_modulus,
            poisson_ratio,
            friction_angle,
            cohesion,
            dilatancy,
            shear_modulus: youngs_modulus / (2.0 * (1.0 + poisson_ratio)),
            bulk_modulus: youngs_modulus / (3.0 * (1.0 - 2.0 * poisson_ratio)),
            alpha_phi: dp_constant_a(friction_angle),
            alpha_psi: dp_constant_a(dilatancy),
            k_c: 3.0 * cohesion / (9.0 + 12.0 * t * t).sqrt(),
        })
    }

    pub fn reference_density(&self) -> Real {
        self.rho0
    }

    pub fn reference_sound_speed(&self) -> Real {
        self.c0
    }

    pub fn youngs_modulus(&self) -> Real {
        self.youngs_modulus
    }

    pub fn poisson_ratio(&self) -> Real {
        self.poisson_ratio
    }

    pub fn friction_angle(&self) -> Real {
        self.friction_angle
    }

    pub fn cohesion(&self) -> Real {
        self.cohesion
    }

    pub fn dilatancy(&self) -> Real {
        self.dilatancy
    }

    pub fn shear_modulus(&self) -> Real {
        self.shear_modulus
    }

    pub fn bulk_modulus(&self) -> Real {
        self.bulk_modulus
    }

    pub fn alpha_phi(&self) -> Real {
        self.alpha_phi
    }

    pub fn alpha_psi(&self) -> Real {
        self.alpha_psi
    }

    pub fn k_c(&self) -> Real {
        self.k_c
    }

    /// Jaumann stress rate for velocity gradient `l` at stress `stress`
    ///
    /// The plastic correction is skipped when the state is inside the yield
    /// surface or the deviatoric stress vanishes.
    pub fn constitutive_relation(&self, l: &Mat3d, stress: &Mat3d) -> Mat3d {
        let g_mod = self.shear_modulus;
        let k_mod = self.bulk_modulus;
        let identity = mat3d_identity();
        let (l, stress) = (*l, *stress);

        let strain_rate = (l + l.transpose()) * 0.5;
        let spin_rate = (l - l.transpose()) * 0.5;
        let strain_rate_trace = strain_rate.trace();
        let deviatoric_strain_rate = strain_rate - identity * (strain_rate_trace / 3.0);
        let stress_rate_elastic = deviatoric_strain_rate * (2.0 * g_mod)
            + identity * (k_mod * strain_rate_trace)
            + stress * spin_rate.transpose()
            + spin_rate * stress;

        let deviatoric_stress = stress - identity * (stress.trace() / 3.0);
        let j2 = 0.5 * double_contraction(&deviatoric_stress, &deviatoric_stress.transpose());
        let sqrt_j2 = j2.max(0.0).sqrt();
        let f = sqrt_j2 + self.alpha_phi * stress.trace() - self.k_c;

        if f < TINY_REAL || sqrt_j2 <= TINY_REAL {
            return stress_rate_elastic;
        }

        let s_dot_d = double_contraction(&deviatoric_stress, &strain_rate);
        let lambda_dot = (3.0 * self.alpha_phi * k_mod * strain_rate_trace
            + (g_mod / sqrt_j2) * s_dot_d)
            / (9.0 * self.alpha_phi * k_mod * self.alpha_psi + g_mod);
        let g = (identity * (3.0 * k_mod * self.alpha_psi) + deviatoric_stress * (g_mod / sqrt_j2))
            * lambda_dot;

        stress_rate_elastic - g
    }

    /// Projects a stress state back onto the yield surface
    ///
    /// First the tension cut-off moves the hydrostatic part to the apex, then
    /// the deviatoric part is scaled down onto the cone.
    pub fn return_mapping(&self, stress: &Mat3d) -> Mat3d {
        let identity = mat3d_identity();
        let mut stress = *stress;

        let i1 = stress.trace();
        if -self.alpha_phi * i1 + self.k_c < 0.0 {
            stress -= identity * ((i1 - self.k_c / self.alpha_phi) / 3.0);
        }

        let i1 = stress.trace();
        let deviatoric_stress = stress - identity * (i1 / 3.0);
        let j2 = 0.5 * double_contraction(&deviatoric_stress, &deviatoric_stress.transpose());
        let sqrt_j2 = j2.max(0.0).sqrt();
        let limit = -self.alpha_phi * i1 + self.k_c;
        if limit < sqrt_j2 {
            let r = limit / (sqrt_j2 + TINY_REAL);
            stress = deviatoric_stress * r + identity * (i1 / 3.0);
        }
        stress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Zero;

    fn sand() -> PlasticContinuum {
        PlasticContinuum::new(2040.0, 40.0, 5.84e6, 0.3, 0.5, 0.0, 0.0)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    fn shear(value: Real) -> Mat3d {
        let mut m = Mat3d::zero();
        m[0][1] = value;
        m[1][0] = value;
        m
    }

    #[test]
    fn test_fluid_equation_of_state() {
        let fluid = WeaklyCompressibleFluid::water();
        assert_eq!(fluid.pressure(1000.0), 0.0);
        let p = fluid.pressure(1010.0);
        assert!((fluid.density_from_pressure(p) - 1010.0).abs() < 1e-3);
        assert!(WeaklyCompressibleFluid::new(-1.0, 10.0, 0.0).is_err());
    }

    #[test]
    fn test_derived_moduli() {
        let m = sand();
        assert!((m.shear_modulus() - 5.84e6 / 2.6).abs() < 1.0);
        assert!((m.bulk_modulus() - 5.84e6 / 1.2).abs() < 10.0);
        let t = (0.5 as Real).tan();
        assert!((m.alpha_phi() - t / (9.0 + 12.0 * t * t).sqrt()).abs() < 1e-6);
        assert_eq!(m.alpha_psi(), 0.0);
        assert_eq!(m.k_c(), 0.0);
        assert!(PlasticContinuum::new(2040.0, 40.0, 5.84e6, 0.5, 0.5, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_zero_gradient_gives_zero_rate() {
        let m = sand();
        let stress = mat3d_identity() * -1000.0;
        let rate = m.constitutive_relation(&Mat3d::zero(), &stress);
        assert_eq!(rate, Mat3d::zero());
    }

    #[test]
    fn test_isotropic_stress_stays_elastic() {
        // sqrt(J2) vanishes, the plastic correction must not divide by it
        let m = sand();
        let stress = mat3d_identity() * 500.0;
        let l = shear(0.1);
        let rate = m.constitutive_relation(&l, &stress);
        for c in 0..3 {
            for r in 0..3 {
                assert!(rate[c][r].is_finite());
            }
        }
        let expected = 2.0 * m.shear_modulus() * 0.1;
        assert!((rate[0][1] - expected).abs() < 1.0e-4 * expected);
    }

    #[test]
    fn test_elastic_compression_rate() {
        let m = sand();
        let mut l = Mat3d::zero();
        l[0][0] = -0.01;
        let stress = mat3d_identity() * -1.0e4;
        let rate = m.constitutive_relation(&l, &stress);
        let expected = 2.0 * m.shear_modulus() * (-0.01 * 2.0 / 3.0) + m.bulk_modulus() * -0.01;
        assert!((rate[0][0] - expected).abs() < 1.0e-2 * expected.abs());
    }

    #[test]
    fn test_return_mapping_projects_onto_cone() {
        let m = sand();
        let mut stress = mat3d_identity() * -1000.0;
        stress[0][1] = 5000.0;
        stress[1][0] = 5000.0;
        let mapped = m.return_mapping(&stress);

        let i1 = mapped.trace();
        let s = mapped - mat3d_identity() * (i1 / 3.0);
        let sqrt_j2 = (0.5 * double_contraction(&s, &s.transpose())).sqrt();
        let limit = -m.alpha_phi() * i1 + m.k_c();
        assert!((sqrt_j2 - limit).abs() < 1.0e-3 * limit.abs().max(1.0));
        assert!((i1 - -3000.0).abs() < 1e-2);
    }

    #[test]
    fn test_return_mapping_keeps_admissible_state() {
        let m = sand();
        let mut stress = mat3d_identity() * -1000.0;
        stress[0][1] = 10.0;
        stress[1][0] = 10.0;
        assert_eq!(m.return_mapping(&stress), stress);
    }

    #[test]
    fn test_tension_cutoff_moves_to_apex() {
        let m = sand();
        let stress = mat3d_identity() * 1000.0;
        let mapped = m.return_mapping(&stress);
        // without cohesion the apex is the stress-free state
        assert!(mapped.trace().abs() < 1e-2);
    }
}
