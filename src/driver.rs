// src/driver.rs
//! Step driver for one fluid body and its walls
//!
//! The driver owns the rebuild and step cadence: relations are rebuilt at
//! outer step boundaries only, and the acoustic second half is sub-stepped
//! inside every outer step with the acoustic time-step size.

use crate::config::SimulationConfig;
use crate::dynamics::{
    AcousticStep2ndHalfWithWall, AcousticTimeStep, AdvectionTimeStep, DeviceAcousticPipelines,
    DeviceAcousticStep, KernelCorrection, RiemannSolver, WallContact,
};
use crate::error::{SphError, SphResult};
use crate::execution::device::DeviceContext;
use crate::execution::{
    configure_worker_pool, Backend, ExecutionPolicy, OffloadPolicy, ParallelPolicy,
    SequencedPolicy,
};
use crate::kernel::{SmoothingKernel, WendlandC2};
use crate::materials::WeaklyCompressibleFluid;
use crate::math::{BoundingBox, Real, Vecd, DIMENSIONS, TINY_REAL};
use crate::mesh::Mesh;
use crate::particles::{BaseParticles, WallParticles};
use crate::relation::{build_contact, build_inner, CellLinkedList, NeighborRelation};
use std::time::{Duration, Instant};

/// Counters of the outer steps taken so far
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepStatistics {
    pub step_count: u64,
    pub sub_step_count: u64,
    pub physical_time: Real,
    pub accumulated_wall_time: Duration,
}

impl StepStatistics {
    pub fn record_step(&mut self, dt: Real, sub_steps: u64, wall_time: Duration) {
        self.step_count += 1;
        self.sub_step_count += sub_steps;
        self.physical_time += dt;
        self.accumulated_wall_time += wall_time;
    }

    /// Mean wall-clock time of one outer step
    pub fn average_step_time(&self) -> Duration {
        if self.step_count > 0 {
            self.accumulated_wall_time / self.step_count as u32
        } else {
            Duration::ZERO
        }
    }

    /// Outer steps per wall-clock second
    pub fn frequency(&self) -> f64 {
        let average = self.average_step_time().as_secs_f64();
        if average > 0.0 {
            1.0 / average
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

struct DeviceMirror {
    context: DeviceContext,
    pipelines: DeviceAcousticPipelines,
    step: Option<DeviceAcousticStep>,
}

fn bounding_box<'a>(positions: impl Iterator<Item = &'a Vecd>) -> Option<BoundingBox> {
    positions.fold(None, |bounds, p| {
        let mut bounds = bounds.unwrap_or(BoundingBox::new(*p, *p));
        for k in 0..DIMENSIONS {
            bounds.lower[k] = bounds.lower[k].min(p[k]);
            bounds.upper[k] = bounds.upper[k].max(p[k]);
        }
        Some(bounds)
    })
}

fn wall_contacts<'a>(
    relations: &'a [NeighborRelation],
    walls: &'a [WallParticles],
) -> Vec<WallContact<'a>> {
    relations
        .iter()
        .zip(walls)
        .map(|(relation, wall)| WallContact::new(relation, wall))
        .collect()
}

/// Advances a weakly compressible fluid body bounded by walls
pub struct FluidStepDriver<R, C> {
    config: SimulationConfig,
    fluid: WeaklyCompressibleFluid,
    kernel: WendlandC2,
    particles: BaseParticles,
    walls: Vec<WallParticles>,
    fluid_cells: CellLinkedList,
    wall_cells: Vec<CellLinkedList>,
    inner_relation: NeighborRelation,
    wall_relations: Vec<NeighborRelation>,
    step: AcousticStep2ndHalfWithWall<R, C>,
    advection: AdvectionTimeStep,
    acoustic: AcousticTimeStep,
    device: Option<DeviceMirror>,
    accumulated_time: Real,
    steps_since_rebuild: usize,
    statistics: StepStatistics,
}

impl<R: RiemannSolver, C: KernelCorrection> FluidStepDriver<R, C> {
    /// Builds the background grid, the cell lists and the first relations
    ///
    /// # Arguments
    /// * `config` - Validated before anything is allocated
    /// * `fluid` - Material of the fluid body
    /// * `particles` - Fluid particles, must not be empty
    /// * `walls` - Static wall bodies, each gets its own contact relation
    /// * `riemann` - Dissipation used by the Interact phases
    /// * `correction` - Kernel correction read by the Interact phases
    pub fn new(
        config: SimulationConfig,
        fluid: WeaklyCompressibleFluid,
        particles: BaseParticles,
        walls: Vec<WallParticles>,
        riemann: R,
        correction: C,
    ) -> SphResult<Self> {
        config.validate()?;
        particles.check_consistency()?;
        for wall in &walls {
            wall.check_consistency()?;
        }
        if particles.is_empty() {
            return Err(SphError::config("the fluid body has no particles"));
        }

        let positions = particles
            .position
            .iter()
            .chain(walls.iter().flat_map(|wall| wall.position.iter()));
        let bounds = bounding_box(positions)
            .ok_or_else(|| SphError::config("the fluid body has no particles"))?;

        let kernel = WendlandC2::new(config.smoothing_length);
        let mesh = Mesh::new(bounds, kernel.cutoff_radius(), config.buffer_width);
        log::info!(
            "Background grid built: {:?} cells of spacing {}",
            mesh.all_cells(),
            mesh.grid_spacing()
        );

        let mut wall_cells: Vec<CellLinkedList> = walls
            .iter()
            .map(|_| CellLinkedList::new(mesh.clone()))
            .collect();
        for (cells, wall) in wall_cells.iter_mut().zip(&walls) {
            cells.update(&wall.position);
        }

        let device = match config.backend {
            Backend::Offload => {
                let context = DeviceContext::new()?;
                let pipelines = DeviceAcousticPipelines::new(&context, false);
                Some(DeviceMirror {
                    context,
                    pipelines,
                    step: None,
                })
            }
            Backend::Parallel => {
                configure_worker_pool(config.worker_threads);
                None
            }
            Backend::Sequential => None,
        };
        log::info!("Stepping on the {} backend", config.backend);

        let h_min = config.smoothing_length;
        let advection = AdvectionTimeStep::new(h_min, config.reference_speed)
            .with_cfl(config.advection_cfl);
        let acoustic = AcousticTimeStep::new(fluid.reference_sound_speed(), h_min)
            .with_cfl(config.acoustic_cfl);
        let owners = particles.len();

        let mut driver = Self {
            config,
            fluid,
            kernel,
            fluid_cells: CellLinkedList::new(mesh),
            particles,
            wall_relations: vec![NeighborRelation::empty(owners, kernel.cutoff_radius()); walls.len()],
            walls,
            wall_cells,
            inner_relation: NeighborRelation::empty(owners, kernel.cutoff_radius()),
            step: AcousticStep2ndHalfWithWall::new(riemann, correction),
            advection,
            acoustic,
            device,
            accumulated_time: 0.0,
            steps_since_rebuild: 0,
            statistics: StepStatistics::default(),
        };
        driver.rebuild_relations()?;
        Ok(driver)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn fluid(&self) -> &WeaklyCompressibleFluid {
        &self.fluid
    }

    pub fn backend(&self) -> Backend {
        self.config.backend
    }

    pub fn mesh(&self) -> &Mesh {
        self.fluid_cells.mesh()
    }

    /// Fluid state after the last sub-step
    ///
    /// `force` holds the dissipative force of that sub-step. The driver never
    /// integrates it into velocity; the caller's momentum update consumes it.
    pub fn particles(&self) -> &BaseParticles {
        &self.particles
    }

    /// Host-side changes are pushed to the device at the next sub-step
    pub fn particles_mut(&mut self) -> &mut BaseParticles {
        &mut self.particles
    }

    pub fn walls(&self) -> &[WallParticles] {
        &self.walls
    }

    pub fn inner_relation(&self) -> &NeighborRelation {
        &self.inner_relation
    }

    pub fn wall_relations(&self) -> &[NeighborRelation] {
        &self.wall_relations
    }

    pub fn step(&self) -> &AcousticStep2ndHalfWithWall<R, C> {
        &self.step
    }

    /// For the pass that recomputes the correction tensors between steps
    pub fn correction_mut(&mut self) -> &mut C {
        self.step.inner_mut().correction_mut()
    }

    pub fn statistics(&self) -> StepStatistics {
        self.statistics
    }

    pub fn reset_statistics(&mut self) {
        self.statistics.reset();
    }

    /// Rebuilds the inner and wall-contact relations from the current positions
    ///
    /// Runs between steps, never inside a kernel phase. The device mirror is
    /// rebound to the new relations.
    pub fn rebuild_relations(&mut self) -> SphResult<()> {
        match self.config.backend {
            Backend::Sequential => self.rebuild_host_relations(&SequencedPolicy),
            Backend::Parallel | Backend::Offload => self.rebuild_host_relations(&ParallelPolicy),
        }

        if let Some(device) = &mut self.device {
            let contacts = wall_contacts(&self.wall_relations, &self.walls);
            device.step = Some(DeviceAcousticStep::new(
                &OffloadPolicy,
                &device.context,
                &device.pipelines,
                self.step.inner(),
                &self.particles,
                &self.inner_relation,
                &contacts,
            )?);
        }
        self.steps_since_rebuild = 0;

        log::debug!(
            "Relations rebuilt: {} inner neighbors, {} wall contacts",
            self.inner_relation.total_neighbors(),
            self.wall_relations
                .iter()
                .map(NeighborRelation::total_neighbors)
                .sum::<usize>()
        );
        Ok(())
    }

    fn rebuild_host_relations<P: ExecutionPolicy>(&mut self, policy: &P) {
        let bounds = self.fluid_cells.mesh().bounds();
        let escaped = self
            .particles
            .position
            .iter()
            .filter(|p| !bounds.contains(**p))
            .count();
        if escaped > 0 {
            log::warn!("{escaped} particles left the mesh and are binned into its boundary cells");
        }
        self.fluid_cells.update(&self.particles.position);
        self.inner_relation = build_inner(
            policy,
            &self.fluid_cells,
            &self.particles.position,
            &self.kernel,
        );
        self.wall_relations = self
            .wall_cells
            .iter()
            .zip(&self.walls)
            .map(|(cells, wall)| {
                build_contact(
                    policy,
                    &self.particles.position,
                    cells,
                    &wall.position,
                    &self.kernel,
                )
            })
            .collect();
    }

    /// Runs Initialize, Interact and Update once on the configured backend
    ///
    /// Device results are downloaded before returning.
    pub fn sub_step(&mut self, dt: Real) -> SphResult<()> {
        let contacts = wall_contacts(&self.wall_relations, &self.walls);
        match self.config.backend {
            Backend::Sequential => self.step.exec(
                &SequencedPolicy,
                &self.inner_relation,
                &contacts,
                &mut self.particles,
                dt,
            ),
            Backend::Parallel => self.step.exec(
                &ParallelPolicy,
                &self.inner_relation,
                &contacts,
                &mut self.particles,
                dt,
            ),
            Backend::Offload => {
                let device = self
                    .device
                    .as_mut()
                    .ok_or_else(|| SphError::config("offload backend without a device"))?;
                let step = device
                    .step
                    .as_mut()
                    .ok_or_else(|| SphError::config("device step used before binding"))?;
                step.refresh(&device.context, &self.particles, self.step.inner().correction())?;
                step.exec(&device.context, &device.pipelines, dt)?;
                step.download(&device.context, &mut self.particles)?;
            }
        }
        Ok(())
    }

    fn acoustic_dt(&self) -> Real {
        match self.config.backend {
            Backend::Sequential => self.acoustic.exec(&SequencedPolicy, &self.particles),
            _ => self.acoustic.exec(&ParallelPolicy, &self.particles),
        }
    }

    fn advection_dt(&self) -> Real {
        match self.config.backend {
            Backend::Sequential => self.advection.exec(&SequencedPolicy, &self.particles),
            _ => self.advection.exec(&ParallelPolicy, &self.particles),
        }
    }

    /// One outer step of size `dt`, sub-stepped with the acoustic step size
    fn outer_step(&mut self, dt: Real) -> SphResult<()> {
        let start = Instant::now();
        if self.steps_since_rebuild >= self.config.relation_rebuild_interval {
            self.rebuild_relations()?;
        }

        let mut remaining = dt;
        let mut sub_steps = 0;
        while remaining > 0.0 {
            let sub_dt = self.acoustic_dt().min(remaining);
            self.sub_step(sub_dt)?;
            remaining -= sub_dt;
            sub_steps += 1;
        }

        self.steps_since_rebuild += 1;
        self.statistics.record_step(dt, sub_steps, start.elapsed());
        log::debug!(
            "Outer step {} done: dt {:e}, {} acoustic sub-steps",
            self.statistics.step_count,
            dt,
            sub_steps
        );
        Ok(())
    }

    /// Advances the body by `delta_time` scaled with the configured time scale
    ///
    /// With a fixed timestep the scaled time is accumulated and whole steps are
    /// taken; the remainder carries over to the next call. Otherwise the
    /// advection criterion chooses every outer step.
    ///
    /// # Returns
    /// Number of outer steps taken
    pub fn advance(&mut self, delta_time: Real) -> SphResult<usize> {
        let scaled_delta = delta_time * self.config.time_scale;
        let mut steps = 0;

        if let Some(fixed_dt) = self.config.fixed_timestep {
            self.accumulated_time += scaled_delta;
            while self.accumulated_time >= fixed_dt {
                self.outer_step(fixed_dt)?;
                self.accumulated_time -= fixed_dt;
                steps += 1;
            }
        } else {
            let mut remaining = scaled_delta;
            while remaining > TINY_REAL {
                let dt = self.advection_dt().min(remaining);
                self.outer_step(dt)?;
                remaining -= dt;
                steps += 1;
            }
        }
        Ok(steps)
    }
}
