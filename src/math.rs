//! Scalar, vector and tensor types shared by every part of the core
//!
//! The spatial dimension is fixed at compile time by the `dim2` / `dim3`
//! features. Stress-space quantities (`Vec3d`, `Mat3d`) are always 3-D so a
//! reduced-dimension run still carries full stress tensors.

#[cfg(feature = "dim2")]
use cgmath::Matrix2;
use cgmath::{Matrix3, SquareMatrix, Vector2, Vector3, Zero};

#[cfg(all(feature = "dim2", feature = "dim3"))]
compile_error!("features `dim2` and `dim3` are mutually exclusive");

#[cfg(not(any(feature = "dim2", feature = "dim3")))]
compile_error!("enable exactly one of the `dim2` or `dim3` features");

/// Floating point type used for every field (matches the GPU storage type)
pub type Real = f32;

/// Guard value for divisions by norms that may vanish
pub const TINY_REAL: Real = 1.0e-20;

pub type Array2i = Vector2<i32>;
pub type Array3i = Vector3<i32>;
pub type Vec3d = Vector3<Real>;
pub type Mat3d = Matrix3<Real>;

#[cfg(feature = "dim2")]
pub const DIMENSIONS: usize = 2;
#[cfg(feature = "dim2")]
pub type Vecd = Vector2<Real>;
#[cfg(feature = "dim2")]
pub type Matd = Matrix2<Real>;
#[cfg(feature = "dim2")]
pub type Arrayi = Array2i;

#[cfg(feature = "dim3")]
pub const DIMENSIONS: usize = 3;
#[cfg(feature = "dim3")]
pub type Vecd = Vector3<Real>;
#[cfg(feature = "dim3")]
pub type Matd = Matrix3<Real>;
#[cfg(feature = "dim3")]
pub type Arrayi = Array3i;

/// GPU storage layout of a vector (`vec4<f32>`, unused lanes zero)
pub type DeviceVec = [f32; 4];
/// GPU storage layout of a tensor (`mat3x3<f32>`, columns padded to 16 bytes)
pub type DeviceMat = [[f32; 4]; 3];

/// Axis-aligned box given by its lower and upper corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lower: Vecd,
    pub upper: Vecd,
}

impl BoundingBox {
    pub fn new(lower: Vecd, upper: Vecd) -> Self {
        Self { lower, upper }
    }

    /// Checks whether a position lies inside the box (bounds inclusive)
    pub fn contains(&self, position: Vecd) -> bool {
        (0..DIMENSIONS).all(|k| position[k] >= self.lower[k] && position[k] <= self.upper[k])
    }
}

/// Vector with every component set to `value`
pub fn vecd_splat(value: Real) -> Vecd {
    let mut v = Vecd::zero();
    for k in 0..DIMENSIONS {
        v[k] = value;
    }
    v
}

/// Integer vector with every component set to `value`
pub fn arrayi_splat(value: i32) -> Arrayi {
    let mut v = Arrayi::zero();
    for k in 0..DIMENSIONS {
        v[k] = value;
    }
    v
}

/// Outer product `a bᵀ`, i.e. entry (r, c) is `a[r] * b[c]`
pub fn outer_product(a: Vecd, b: Vecd) -> Matd {
    let mut m = Matd::zero();
    for c in 0..DIMENSIONS {
        m[c] = a * b[c];
    }
    m
}

/// Embeds a spatial tensor into stress space, zero outside the spatial block
pub fn upgrade_to_mat3d(input: &Matd) -> Mat3d {
    let mut output = Mat3d::zero();
    for c in 0..DIMENSIONS {
        for r in 0..DIMENSIONS {
            output[c][r] = input[c][r];
        }
    }
    output
}

/// Keeps the spatial block of a stress-space tensor
pub fn degrade_to_matd(input: &Mat3d) -> Matd {
    let mut output = Matd::zero();
    for c in 0..DIMENSIONS {
        for r in 0..DIMENSIONS {
            output[c][r] = input[c][r];
        }
    }
    output
}

/// `Σ a_rc b_rc`
pub fn double_contraction(a: &Mat3d, b: &Mat3d) -> Real {
    let mut sum = 0.0;
    for c in 0..3 {
        for r in 0..3 {
            sum += a[c][r] * b[c][r];
        }
    }
    sum
}

pub fn mat3d_identity() -> Mat3d {
    Mat3d::identity()
}

pub fn vecd_to_device(v: Vecd) -> DeviceVec {
    let mut out = [0.0; 4];
    for k in 0..DIMENSIONS {
        out[k] = v[k];
    }
    out
}

pub fn vecd_from_device(v: DeviceVec) -> Vecd {
    let mut out = Vecd::zero();
    for k in 0..DIMENSIONS {
        out[k] = v[k];
    }
    out
}

/// Packs a vector and a scalar into one `vec4` (scalar in the last lane)
pub fn vecd_with_scalar_to_device(v: Vecd, w: Real) -> DeviceVec {
    let mut out = vecd_to_device(v);
    out[3] = w;
    out
}

pub fn mat3d_to_device(m: &Mat3d) -> DeviceMat {
    let column = |c: Vector3<Real>| -> [f32; 4] { [c.x, c.y, c.z, 0.0] };
    [column(m.x), column(m.y), column(m.z)]
}

pub fn mat3d_from_device(m: &DeviceMat) -> Mat3d {
    Mat3d::new(
        m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
    )
}

pub fn matd_to_device(m: &Matd) -> DeviceMat {
    mat3d_to_device(&upgrade_to_mat3d(m))
}

pub fn matd_from_device(m: &DeviceMat) -> Matd {
    degrade_to_matd(&mat3d_from_device(m))
}
