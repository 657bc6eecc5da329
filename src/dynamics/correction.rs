// src/dynamics/correction.rs
//! Kernel gradient corrections
//!
//! The correction tensors are recomputed by a separate pass between steps and
//! are read-only while a step runs.

use crate::error::{SphError, SphResult};
use crate::math::{matd_to_device, DeviceMat, Matd, Vecd};
use cgmath::SquareMatrix;

pub trait KernelCorrection: Send + Sync {
    fn matrix(&self, i: usize) -> Matd;

    /// Corrected gradient direction `B_i e`
    fn correct(&self, i: usize, e_ij: Vecd) -> Vecd {
        self.matrix(i) * e_ij
    }

    /// Device copy of the tensors of `count` particles
    fn device_matrices(&self, count: usize) -> Vec<DeviceMat> {
        (0..count).map(|i| matd_to_device(&self.matrix(i))).collect()
    }
}

/// Leaves gradients untouched
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NoKernelCorrection;

impl KernelCorrection for NoKernelCorrection {
    fn matrix(&self, _i: usize) -> Matd {
        Matd::identity()
    }

    fn correct(&self, _i: usize, e_ij: Vecd) -> Vecd {
        e_ij
    }
}

/// One correction tensor per particle for first-order consistent gradients
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearGradientCorrection {
    matrices: Vec<Matd>,
}

impl LinearGradientCorrection {
    /// Starts with identity tensors
    pub fn new(count: usize) -> Self {
        Self {
            matrices: vec![Matd::identity(); count],
        }
    }

    pub fn from_matrices(matrices: Vec<Matd>) -> Self {
        Self { matrices }
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn matrices(&self) -> &[Matd] {
        &self.matrices
    }

    /// Write access for the pass that recomputes the tensors
    pub fn matrices_mut(&mut self) -> &mut [Matd] {
        &mut self.matrices
    }

    /// Setup-time check against the particle count
    pub fn check_count(&self, count: usize) -> SphResult<()> {
        SphError::check_length("correction matrices", count, self.matrices.len())
    }
}

impl KernelCorrection for LinearGradientCorrection {
    fn matrix(&self, i: usize) -> Matd {
        self.matrices[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::vecd_splat;

    #[test]
    fn test_identity_correction() {
        let e = vecd_splat(0.5);
        assert_eq!(NoKernelCorrection.correct(3, e), e);
        assert_eq!(LinearGradientCorrection::new(4).correct(3, e), e);
    }

    #[test]
    fn test_scaled_correction() {
        let mut correction = LinearGradientCorrection::new(2);
        correction.matrices_mut()[1] = Matd::identity() * 2.0;
        assert_eq!(correction.correct(1, vecd_splat(1.0)), vecd_splat(2.0));
        assert_eq!(correction.correct(0, vecd_splat(1.0)), vecd_splat(1.0));
        assert!(correction.check_count(2).is_ok());
        assert!(correction.check_count(3).is_err());

        let packed = correction.device_matrices(2);
        assert_eq!(packed[1][0][0], 2.0);
        let expected_zz = if cfg!(feature = "dim3") { 2.0 } else { 0.0 };
        assert_eq!(packed[1][2][2], expected_zz);
    }
}
