// src/lib.rs
//! SPH particle engine core
//!
//! A background grid with Morton ordering, compressed neighbor relations and
//! the acoustic second-half time-step kernels of weakly compressible fluids
//! and elastoplastic continua. Kernels run sequentially, on the rayon pool,
//! or offloaded to a wgpu compute device.
//!
//! ```no_run
//! use sph_core::prelude::*;
//!
//! fn main() -> SphResult<()> {
//!     let fluid = WeaklyCompressibleFluid::water();
//!     let mut particles = BaseParticles::new();
//!     for k in 0..100 {
//!         particles.add_particle(vecd_splat(0.01 * k as Real), 1.0e-4, 1000.0);
//!     }
//!
//!     let config = SimulationConfig::deterministic(1.0e-3).with_smoothing_length(0.013);
//!     let mut driver = FluidStepDriver::new(
//!         config,
//!         fluid,
//!         particles,
//!         Vec::new(),
//!         AcousticRiemannSolver::for_fluid(&fluid),
//!         NoKernelCorrection,
//!     )?;
//!     driver.advance(1.0e-2)?;
//!     println!("{} steps", driver.statistics().step_count);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod driver;
pub mod dynamics;
pub mod error;
pub mod execution;
pub mod kernel;
pub mod materials;
pub mod math;
pub mod mesh;
pub mod particles;
pub mod prelude;
pub mod relation;

pub use config::SimulationConfig;
pub use driver::{FluidStepDriver, StepStatistics};
pub use error::{SphError, SphResult};
