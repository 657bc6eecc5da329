// src/particles.rs
//! Structure-of-arrays particle field sets
//!
//! Fields are public so a step can borrow several arrays at once, some shared
//! and some mutable. Every array of one set has the same length; the index is
//! the particle's identity for the duration of a step.

use crate::error::{SphError, SphResult};
use crate::math::{Mat3d, Matd, Real, Vecd};
use cgmath::Zero;

/// Fields every body carries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseParticles {
    pub position: Vec<Vecd>,
    pub velocity: Vec<Vecd>,
    pub mass: Vec<Real>,
    pub volume: Vec<Real>,
    pub density: Vec<Real>,
    pub density_rate: Vec<Real>,
    pub force: Vec<Vecd>,
    pub force_prior: Vec<Vecd>,
}

impl BaseParticles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            position: Vec::with_capacity(capacity),
            velocity: Vec::with_capacity(capacity),
            mass: Vec::with_capacity(capacity),
            volume: Vec::with_capacity(capacity),
            density: Vec::with_capacity(capacity),
            density_rate: Vec::with_capacity(capacity),
            force: Vec::with_capacity(capacity),
            force_prior: Vec::with_capacity(capacity),
        }
    }

    /// Appends a particle at rest; its mass is `density * volume`
    pub fn add_particle(&mut self, position: Vecd, volume: Real, density: Real) -> usize {
        let index = self.position.len();
        self.position.push(position);
        self.velocity.push(Vecd::zero());
        self.mass.push(density * volume);
        self.volume.push(volume);
        self.density.push(density);
        self.density_rate.push(0.0);
        self.force.push(Vecd::zero());
        self.force_prior.push(Vecd::zero());
        index
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Setup-time check that all arrays agree in length
    pub fn check_consistency(&self) -> SphResult<()> {
        let n = self.len();
        SphError::check_length("velocity", n, self.velocity.len())?;
        SphError::check_length("mass", n, self.mass.len())?;
        SphError::check_length("volume", n, self.volume.len())?;
        SphError::check_length("density", n, self.density.len())?;
        SphError::check_length("density_rate", n, self.density_rate.len())?;
        SphError::check_length("force", n, self.force.len())?;
        SphError::check_length("force_prior", n, self.force_prior.len())
    }
}

/// Base fields plus the tensors of an elastoplastic continuum
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlasticParticles {
    pub base: BaseParticles,
    pub velocity_gradient: Vec<Matd>,
    pub stress_tensor_3d: Vec<Mat3d>,
    pub strain_tensor_3d: Vec<Mat3d>,
    pub stress_rate_3d: Vec<Mat3d>,
    pub strain_rate_3d: Vec<Mat3d>,
}

impl PlasticParticles {
    /// Adds stress-free tensor fields to an existing particle set
    pub fn from_base(base: BaseParticles) -> Self {
        let n = base.len();
        Self {
            base,
            velocity_gradient: vec![Matd::zero(); n],
            stress_tensor_3d: vec![Mat3d::zero(); n],
            strain_tensor_3d: vec![Mat3d::zero(); n],
            stress_rate_3d: vec![Mat3d::zero(); n],
            strain_rate_3d: vec![Mat3d::zero(); n],
        }
    }

    pub fn add_particle(&mut self, position: Vecd, volume: Real, density: Real) -> usize {
        let index = self.base.add_particle(position, volume, density);
        self.velocity_gradient.push(Matd::zero());
        self.stress_tensor_3d.push(Mat3d::zero());
        self.strain_tensor_3d.push(Mat3d::zero());
        self.stress_rate_3d.push(Mat3d::zero());
        self.strain_rate_3d.push(Mat3d::zero());
        index
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    pub fn check_consistency(&self) -> SphResult<()> {
        self.base.check_consistency()?;
        let n = self.len();
        SphError::check_length("velocity_gradient", n, self.velocity_gradient.len())?;
        SphError::check_length("stress_tensor_3d", n, self.stress_tensor_3d.len())?;
        SphError::check_length("strain_tensor_3d", n, self.strain_tensor_3d.len())?;
        SphError::check_length("stress_rate_3d", n, self.stress_rate_3d.len())?;
        SphError::check_length("strain_rate_3d", n, self.strain_rate_3d.len())
    }
}

/// Boundary particles of a wall body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WallParticles {
    pub position: Vec<Vecd>,
    pub volume: Vec<Real>,
    pub average_velocity: Vec<Vecd>,
    pub normal: Vec<Vecd>,
}

impl WallParticles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stationary wall particle with outward `normal`
    pub fn add_particle(&mut self, position: Vecd, volume: Real, normal: Vecd) -> usize {
        let index = self.position.len();
        self.position.push(position);
        self.volume.push(volume);
        self.average_velocity.push(Vecd::zero());
        self.normal.push(normal);
        index
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    pub fn check_consistency(&self) -> SphResult<()> {
        let n = self.len();
        SphError::check_length("wall volume", n, self.volume.len())?;
        SphError::check_length("wall average_velocity", n, self.average_velocity.len())?;
        SphError::check_length("wall normal", n, self.normal.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::vecd_splat;

    #[test]
    fn test_add_particle_sets_mass() {
        let mut particles = BaseParticles::with_capacity(2);
        assert!(particles.is_empty());
        let i = particles.add_particle(vecd_splat(1.0), 0.01, 1000.0);
        assert_eq!(i, 0);
        assert_eq!(particles.len(), 1);
        assert!((particles.mass[0] - 10.0).abs() < 1e-4);
        assert_eq!(particles.velocity[0], Vecd::zero());
        assert!(particles.check_consistency().is_ok());
    }

    #[test]
    fn test_consistency_detects_mismatch() {
        let mut particles = BaseParticles::new();
        particles.add_particle(vecd_splat(0.0), 1.0, 1.0);
        particles.add_particle(vecd_splat(1.0), 1.0, 1.0);
        particles.force.pop();
        assert!(matches!(
            particles.check_consistency(),
            Err(SphError::FieldLength { field: "force", expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_plastic_fields_follow_base() {
        let mut base = BaseParticles::new();
        base.add_particle(vecd_splat(0.0), 1.0, 2.0);
        let mut plastic = PlasticParticles::from_base(base);
        plastic.add_particle(vecd_splat(0.5), 1.0, 2.0);
        assert_eq!(plastic.len(), 2);
        assert_eq!(plastic.stress_tensor_3d.len(), 2);
        assert!(plastic.check_consistency().is_ok());

        plastic.strain_rate_3d.clear();
        assert!(plastic.check_consistency().is_err());
    }

    #[test]
    fn test_wall_particles() {
        let mut wall = WallParticles::new();
        wall.add_particle(vecd_splat(0.0), 0.5, vecd_splat(1.0));
        assert_eq!(wall.len(), 1);
        assert_eq!(wall.average_velocity[0], Vecd::zero());
        assert!(wall.check_consistency().is_ok());
    }
}
