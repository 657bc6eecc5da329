//! Commonly used types and traits
//!
//! ```rust
//! use sph_core::prelude::*;
//! ```

pub use crate::config::SimulationConfig;
pub use crate::driver::{FluidStepDriver, StepStatistics};
pub use crate::error::{SphError, SphResult};

pub use crate::execution::device::DeviceContext;
pub use crate::execution::{
    configure_worker_pool, Backend, ExecutionPolicy, OffloadPolicy, ParallelPolicy,
    SequencedPolicy,
};

pub use crate::dynamics::{
    AcousticRiemannSolver, AcousticStep2ndHalf, AcousticStep2ndHalfWithWall, AcousticTimeStep,
    AdvectionTimeStep, DeviceAcousticPipelines, DeviceAcousticStep, DissipativeRiemannSolver,
    KernelCorrection, LinearGradientCorrection, NoKernelCorrection, NoRiemannSolver,
    PlasticAcousticStep2ndHalf, PlasticUpdateOptions, RiemannSolver, StressRateUpdate,
    WallContact,
};
pub use crate::kernel::{SmoothingKernel, WendlandC2};
pub use crate::materials::{PlasticContinuum, WeaklyCompressibleFluid};
pub use crate::math::{vecd_splat, BoundingBox, Mat3d, Matd, Real, Vecd, DIMENSIONS};
pub use crate::mesh::Mesh;
pub use crate::particles::{BaseParticles, PlasticParticles, WallParticles};
pub use crate::relation::{build_contact, build_inner, CellLinkedList, Neighbor, NeighborRelation};

// Re-export common external dependencies
pub use cgmath::{InnerSpace, Zero};
