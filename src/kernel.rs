// src/kernel.rs
//! Smoothing kernels used to weight neighbor contributions

use crate::math::Real;
use std::f32::consts::PI;

pub trait SmoothingKernel: Send + Sync {
    fn smoothing_length(&self) -> Real;

    /// Distance beyond which the kernel vanishes
    fn cutoff_radius(&self) -> Real;

    fn w(&self, r: Real) -> Real;

    /// Signed radial derivative `dW/dr`, non-positive inside the support
    fn dw(&self, r: Real) -> Real;
}

/// Wendland C2 kernel with support radius `2h`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WendlandC2 {
    h: Real,
    factor: Real,
}

impl WendlandC2 {
    pub fn new(smoothing_length: Real) -> Self {
        let h = smoothing_length;
        #[cfg(feature = "dim2")]
        let factor = 7.0 / (4.0 * PI * h * h);
        #[cfg(feature = "dim3")]
        let factor = 21.0 / (16.0 * PI * h * h * h);
        Self { h, factor }
    }
}

impl SmoothingKernel for WendlandC2 {
    fn smoothing_length(&self) -> Real {
        self.h
    }

    fn cutoff_radius(&self) -> Real {
        2.0 * self.h
    }

    fn w(&self, r: Real) -> Real {
        let q = r / self.h;
        if q >= 2.0 {
            return 0.0;
        }
        let a = 1.0 - 0.5 * q;
        self.factor * a.powi(4) * (1.0 + 2.0 * q)
    }

    fn dw(&self, r: Real) -> Real {
        let q = r / self.h;
        if q >= 2.0 {
            return 0.0;
        }
        let a = 1.0 - 0.5 * q;
        -5.0 * self.factor * q * a.powi(3) / self.h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_and_sign() {
        let kernel = WendlandC2::new(0.1);
        assert_eq!(kernel.cutoff_radius(), 0.2);
        assert_eq!(kernel.w(0.2), 0.0);
        assert_eq!(kernel.dw(0.25), 0.0);
        assert_eq!(kernel.dw(0.0), 0.0);
        for r in [0.01, 0.05, 0.1, 0.19] {
            assert!(kernel.w(r) > 0.0);
            assert!(kernel.dw(r) < 0.0);
        }
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let kernel = WendlandC2::new(1.0);
        let r = 0.7;
        let eps = 1.0e-3;
        let numeric = (kernel.w(r + eps) - kernel.w(r - eps)) / (2.0 * eps);
        let analytic = kernel.dw(r);
        assert!((numeric - analytic).abs() < 1.0e-3 * analytic.abs().max(1.0));
    }

    #[test]
    fn test_kernel_decreases_with_distance() {
        let kernel = WendlandC2::new(0.5);
        let values: Vec<Real> = (0..10).map(|k| kernel.w(k as Real * 0.1)).collect();
        assert!(values.windows(2).all(|w| w[0] > w[1]));
    }
}
