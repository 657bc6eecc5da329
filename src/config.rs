// src/config.rs
//! Run settings for the step driver

use crate::error::{SphError, SphResult};
use crate::execution::Backend;
use crate::math::Real;

/// Settings of one simulated body and its stepping cadence
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub backend: Backend,
    pub smoothing_length: Real,
    /// Extra cells added on every side of the background grid
    pub buffer_width: usize,
    pub advection_cfl: Real,
    pub acoustic_cfl: Real,
    /// Lower bound of the speed used by the advection step
    pub reference_speed: Real,
    /// Fixed outer step; `None` selects the CFL-driven step
    pub fixed_timestep: Option<Real>,
    pub time_scale: Real,
    /// Worker threads of the parallel backend; `None` uses every core
    pub worker_threads: Option<usize>,
    /// Outer steps between two relation rebuilds
    pub relation_rebuild_interval: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Parallel,
            smoothing_length: 0.013,
            buffer_width: 2,
            advection_cfl: 0.25,
            acoustic_cfl: 0.6,
            reference_speed: 1.0,
            fixed_timestep: None,
            time_scale: 1.0,
            worker_threads: None,
            relation_rebuild_interval: 1,
        }
    }
}

impl SimulationConfig {
    /// Single-threaded host execution, fixed step for reproducible runs
    ///
    /// # Arguments
    /// * `fixed_timestep` - Outer step size in seconds
    pub fn deterministic(fixed_timestep: Real) -> Self {
        Self {
            backend: Backend::Sequential,
            fixed_timestep: Some(fixed_timestep),
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_smoothing_length(mut self, smoothing_length: Real) -> Self {
        self.smoothing_length = smoothing_length;
        self
    }

    pub fn with_buffer_width(mut self, buffer_width: usize) -> Self {
        self.buffer_width = buffer_width;
        self
    }

    pub fn with_cfl(mut self, advection_cfl: Real, acoustic_cfl: Real) -> Self {
        self.advection_cfl = advection_cfl;
        self.acoustic_cfl = acoustic_cfl;
        self
    }

    pub fn with_reference_speed(mut self, reference_speed: Real) -> Self {
        self.reference_speed = reference_speed;
        self
    }

    pub fn with_fixed_timestep(mut self, fixed_timestep: Option<Real>) -> Self {
        self.fixed_timestep = fixed_timestep;
        self
    }

    /// Negative scales are clamped to zero
    pub fn with_time_scale(mut self, time_scale: Real) -> Self {
        self.time_scale = time_scale.max(0.0);
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: Option<usize>) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_relation_rebuild_interval(mut self, interval: usize) -> Self {
        self.relation_rebuild_interval = interval;
        self
    }

    /// Background grid spacing, equal to the kernel cutoff
    pub fn grid_spacing(&self) -> Real {
        2.0 * self.smoothing_length
    }

    pub fn validate(&self) -> SphResult<()> {
        if self.smoothing_length.is_nan() || self.smoothing_length <= 0.0 {
            return Err(SphError::config(format!(
                "smoothing length must be positive, got {}",
                self.smoothing_length
            )));
        }
        for (name, cfl) in [
            ("advection", self.advection_cfl),
            ("acoustic", self.acoustic_cfl),
        ] {
            if cfl.is_nan() || cfl <= 0.0 || cfl > 1.0 {
                return Err(SphError::config(format!(
                    "{name} CFL number {cfl} outside (0, 1]"
                )));
            }
        }
        if self.reference_speed < 0.0 {
            return Err(SphError::config("reference speed must be non-negative"));
        }
        if let Some(dt) = self.fixed_timestep {
            if dt.is_nan() || dt <= 0.0 {
                return Err(SphError::config(format!(
                    "fixed timestep must be positive, got {dt}"
                )));
            }
        }
        if self.time_scale < 0.0 {
            return Err(SphError::config("time scale must be non-negative"));
        }
        if self.worker_threads == Some(0) {
            return Err(SphError::config("worker thread count must be at least 1"));
        }
        if self.relation_rebuild_interval == 0 {
            return Err(SphError::config("relation rebuild interval must be at least 1"));
        }
        Ok(())
    }
}
