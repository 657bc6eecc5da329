// src/dynamics/mod.rs
//! Time-step dynamics
//!
//! Every dynamics is split into Initialize, Interact and Update phases. Each
//! phase is a kernel object built against an execution policy and run over
//! all particles before the next phase starts.

pub mod acoustic_step;
pub mod correction;
pub mod device_step;
pub mod plastic_step;
pub mod riemann;
pub mod time_step;

pub use acoustic_step::{
    AcousticStep2ndHalf, AcousticStep2ndHalfWithWall, InitializeKernel, InteractKernel,
    UpdateKernel, WallContact, WallInteractKernel,
};
pub use correction::{KernelCorrection, LinearGradientCorrection, NoKernelCorrection};
pub use device_step::{DeviceAcousticPipelines, DeviceAcousticStep, StepUniforms};
pub use plastic_step::{
    PlasticAcousticStep2ndHalf, PlasticInteractKernel, PlasticUpdateKernel, PlasticUpdateOptions,
    PlasticWallInteractKernel, StressRateUpdate,
};
pub use riemann::{
    AcousticImpedance, AcousticRiemannSolver, DissipativeRiemannSolver, NoRiemannSolver,
    RiemannSolver,
};
pub use time_step::{AcousticTimeStep, AdvectionTimeStep};
