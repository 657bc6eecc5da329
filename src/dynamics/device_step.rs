// src/dynamics/device_step.rs
//! Offloaded acoustic second half
//!
//! Host fields are mirrored into device storage buffers once per relation
//! rebuild. A step encodes Initialize, the inner Interact, one Interact per
//! wall and Update as consecutive compute passes of a single submission.
//!
//! Device layout, per particle:
//! - `position`: `vec4`, `w` unused
//! - `velocity_volume`: velocity in `xyz`, volume in `w`
//! - `density`: `f32`
//! - `rates`: force in `xyz`, density rate in `w`
//! - `correction` and the plastic tensors: `mat3x3`
//!
//! A relation is a `u32` array holding the `n + 1` offsets followed by the
//! neighbor indices, plus a `vec4` array with `e_ij` in `xyz` and `dW` in `w`.

use super::acoustic_step::{AcousticStep2ndHalf, WallContact};
use super::correction::KernelCorrection;
use super::plastic_step::{PlasticAcousticStep2ndHalf, StressRateUpdate};
use super::riemann::{RiemannDeviceParams, RiemannSolver};
use crate::error::{SphError, SphResult};
use crate::execution::device::{
    binding_types, dispatch_size, BindGroupBuilder, BindGroupLayoutBuilder, ComputeDispatch,
    DeviceArray, DeviceContext, UniformBuffer, WORKGROUP_SIZE,
};
use crate::execution::OffloadPolicy;
use crate::materials::PlasticContinuum;
use crate::math::{
    mat3d_from_device, mat3d_to_device, matd_from_device, matd_to_device, vecd_from_device,
    vecd_to_device, vecd_with_scalar_to_device, DeviceMat, DeviceVec, Real,
};
use crate::particles::{BaseParticles, PlasticParticles, WallParticles};
use crate::relation::NeighborRelation;
use bytemuck::{Pod, Zeroable};

/// Uniform block shared by every pass of a step
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct StepUniforms {
    pub dt: f32,
    pub particle_count: u32,
    pub riemann_kind: u32,
    pub stress_rate_mode: u32,
    pub rho0c0_geo_ave: f32,
    pub inv_rho0c0_ave: f32,
    pub inv_c_ave: f32,
    pub integrate_stress: u32,
    pub shear_modulus: f32,
    pub bulk_modulus: f32,
    pub alpha_phi: f32,
    pub alpha_psi: f32,
    pub k_c: f32,
    pub pad0: f32,
    pub pad1: f32,
    pub pad2: f32,
}

impl StepUniforms {
    pub fn new(particle_count: usize, riemann: RiemannDeviceParams) -> Self {
        Self {
            particle_count: particle_count as u32,
            riemann_kind: riemann.kind,
            rho0c0_geo_ave: riemann.rho0c0_geo_ave,
            inv_rho0c0_ave: riemann.inv_rho0c0_ave,
            inv_c_ave: riemann.inv_c_ave,
            ..Default::default()
        }
    }

    pub fn with_plastic(
        mut self,
        material: &PlasticContinuum,
        stress_rate_update: StressRateUpdate,
        integrate_stress: bool,
    ) -> Self {
        self.stress_rate_mode = match stress_rate_update {
            StressRateUpdate::Overwrite => 0,
            StressRateUpdate::Accumulate => 1,
        };
        self.integrate_stress = integrate_stress as u32;
        self.shear_modulus = material.shear_modulus();
        self.bulk_modulus = material.bulk_modulus();
        self.alpha_phi = material.alpha_phi();
        self.alpha_psi = material.alpha_psi();
        self.k_c = material.k_c();
        self
    }
}

/// Wall particle as seen by the wall pass
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DeviceWallPoint {
    pub velocity_ave: DeviceVec,
    /// Normal in `xyz`, volume in `w`
    pub normal_volume: DeviceVec,
}

const PRELUDE: &str = r#"
struct StepUniforms {
    dt: f32,
    particle_count: u32,
    riemann_kind: u32,
    stress_rate_mode: u32,
    rho0c0_geo_ave: f32,
    inv_rho0c0_ave: f32,
    inv_c_ave: f32,
    integrate_stress: u32,
    shear_modulus: f32,
    bulk_modulus: f32,
    alpha_phi: f32,
    alpha_psi: f32,
    k_c: f32,
    pad0: f32,
    pad1: f32,
    pad2: f32,
}

const TINY_REAL: f32 = 1.0e-20;

@group(0) @binding(0) var<uniform> params: StepUniforms;

fn dissipative_p_jump(u: f32) -> f32 {
    if (params.riemann_kind == 1u) {
        let limiter = min(3.0 * max(u * params.inv_c_ave, 0.0), 1.0);
        return params.rho0c0_geo_ave * u * limiter;
    }
    if (params.riemann_kind == 2u) {
        return params.rho0c0_geo_ave * u;
    }
    return 0.0;
}

fn outer_product(a: vec3<f32>, b: vec3<f32>) -> mat3x3<f32> {
    return mat3x3<f32>(a * b.x, a * b.y, a * b.z);
}
"#;

const INITIALIZE: &str = r#"
@group(0) @binding(1) var<storage, read_write> position: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> velocity_volume: array<vec4<f32>>;

@compute @workgroup_size(WORKGROUP_SIZE, 1, 1)
fn initialize(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i >= params.particle_count) {
        return;
    }
    let r_i = position[i];
    position[i] = vec4<f32>(r_i.xyz + velocity_volume[i].xyz * (params.dt * 0.5), r_i.w);
}
"#;

const INNER_INTERACT: &str = r#"
@group(0) @binding(1) var<storage, read> velocity_volume: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> density: array<f32>;
@group(0) @binding(3) var<storage, read> correction: array<mat3x3<f32>>;
@group(0) @binding(4) var<storage, read> topology: array<u32>;
@group(0) @binding(5) var<storage, read> kernel_data: array<vec4<f32>>;
@group(0) @binding(6) var<storage, read_write> rates: array<vec4<f32>>;
GRADIENT_BINDING

@compute @workgroup_size(WORKGROUP_SIZE, 1, 1)
fn interact_inner(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i >= params.particle_count) {
        return;
    }
    let v_i = velocity_volume[i].xyz;
    let b_i = correction[i];
    let index_base = params.particle_count + 1u;
    var density_change_rate = 0.0;
    var p_dissipation = vec3<f32>(0.0);
    var gradient = mat3x3<f32>();

    for (var k = topology[i]; k < topology[i + 1u]; k++) {
        let j = topology[index_base + k];
        let kernel_j = kernel_data[k];
        let e_ij = b_i * kernel_j.xyz;
        let dw_ij_v_j = kernel_j.w * velocity_volume[j].w;
        let v_ij = v_i - velocity_volume[j].xyz;
        let u_jump = dot(v_ij, e_ij);
        density_change_rate += u_jump * dw_ij_v_j;
        p_dissipation -= e_ij * (dissipative_p_jump(u_jump) * dw_ij_v_j);
        gradient -= outer_product(v_ij, e_ij) * dw_ij_v_j;
    }

    rates[i] = vec4<f32>(p_dissipation * velocity_volume[i].w, density_change_rate * density[i]);
    GRADIENT_STORE
}
"#;

const WALL_INTERACT: &str = r#"
struct WallPoint {
    velocity_ave: vec4<f32>,
    normal_volume: vec4<f32>,
}

@group(0) @binding(1) var<storage, read> velocity_volume: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> density: array<f32>;
@group(0) @binding(3) var<storage, read> correction: array<mat3x3<f32>>;
@group(0) @binding(4) var<storage, read> topology: array<u32>;
@group(0) @binding(5) var<storage, read> kernel_data: array<vec4<f32>>;
@group(0) @binding(6) var<storage, read> wall_points: array<WallPoint>;
@group(0) @binding(7) var<storage, read_write> rates: array<vec4<f32>>;
GRADIENT_BINDING

@compute @workgroup_size(WORKGROUP_SIZE, 1, 1)
fn interact_wall(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i >= params.particle_count) {
        return;
    }
    let v_i = velocity_volume[i].xyz;
    let b_i = correction[i];
    let index_base = params.particle_count + 1u;
    var density_change_rate = 0.0;
    var p_dissipation = vec3<f32>(0.0);
    var gradient = mat3x3<f32>();

    for (var k = topology[i]; k < topology[i + 1u]; k++) {
        let j = topology[index_base + k];
        let kernel_j = kernel_data[k];
        let w_j = wall_points[j];
        let e_ij = b_i * kernel_j.xyz;
        let dw_ij_v_j = kernel_j.w * w_j.normal_volume.w;
        let n_j = w_j.normal_volume.xyz;
        let vel_in_wall = w_j.velocity_ave.xyz * 2.0 - v_i;
        let v_ij = v_i - vel_in_wall;
        density_change_rate += dot(v_ij, e_ij) * dw_ij_v_j;
        let u_jump = 2.0 * dot(v_i - w_j.velocity_ave.xyz, n_j);
        p_dissipation -= n_j * (dissipative_p_jump(u_jump) * dw_ij_v_j);
        gradient -= outer_product(v_ij, e_ij) * dw_ij_v_j;
    }

    rates[i] = rates[i] + vec4<f32>(p_dissipation * velocity_volume[i].w, density_change_rate * density[i]);
    GRADIENT_STORE
}
"#;

const FLUID_UPDATE: &str = r#"
@group(0) @binding(1) var<storage, read_write> density: array<f32>;
@group(0) @binding(2) var<storage, read> rates: array<vec4<f32>>;

@compute @workgroup_size(WORKGROUP_SIZE, 1, 1)
fn update(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i >= params.particle_count) {
        return;
    }
    density[i] = density[i] + rates[i].w * (params.dt * 0.5);
}
"#;

const PLASTIC_UPDATE: &str = r#"
@group(0) @binding(1) var<storage, read_write> density: array<f32>;
@group(0) @binding(2) var<storage, read> rates: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> velocity_gradient: array<mat3x3<f32>>;
@group(0) @binding(4) var<storage, read_write> stress: array<mat3x3<f32>>;
@group(0) @binding(5) var<storage, read_write> strain: array<mat3x3<f32>>;
@group(0) @binding(6) var<storage, read_write> stress_rate: array<mat3x3<f32>>;
@group(0) @binding(7) var<storage, read_write> strain_rate: array<mat3x3<f32>>;

fn identity3() -> mat3x3<f32> {
    return mat3x3<f32>(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
}

fn trace3(m: mat3x3<f32>) -> f32 {
    return m[0][0] + m[1][1] + m[2][2];
}

fn double_contraction(a: mat3x3<f32>, b: mat3x3<f32>) -> f32 {
    return dot(a[0], b[0]) + dot(a[1], b[1]) + dot(a[2], b[2]);
}

fn constitutive_relation(l: mat3x3<f32>, sigma: mat3x3<f32>) -> mat3x3<f32> {
    let identity = identity3();
    let g_mod = params.shear_modulus;
    let k_mod = params.bulk_modulus;

    let d = 0.5 * (l + transpose(l));
    let spin_rate = 0.5 * (l - transpose(l));
    let d_trace = trace3(d);
    let deviatoric_d = d - (d_trace / 3.0) * identity;
    let stress_rate_elastic = (2.0 * g_mod) * deviatoric_d
        + (k_mod * d_trace) * identity
        + sigma * transpose(spin_rate)
        + spin_rate * sigma;

    let s = sigma - (trace3(sigma) / 3.0) * identity;
    let j2 = 0.5 * double_contraction(s, transpose(s));
    let sqrt_j2 = sqrt(max(j2, 0.0));
    let yield_value = sqrt_j2 + params.alpha_phi * trace3(sigma) - params.k_c;
    if (yield_value < TINY_REAL || sqrt_j2 <= TINY_REAL) {
        return stress_rate_elastic;
    }

    let s_dot_d = double_contraction(s, d);
    let lambda_dot = (3.0 * params.alpha_phi * k_mod * d_trace + (g_mod / sqrt_j2) * s_dot_d)
        / (9.0 * params.alpha_phi * k_mod * params.alpha_psi + g_mod);
    let g = lambda_dot * ((3.0 * k_mod * params.alpha_psi) * identity + (g_mod / sqrt_j2) * s);
    return stress_rate_elastic - g;
}

fn return_mapping(trial: mat3x3<f32>) -> mat3x3<f32> {
    let identity = identity3();
    var sigma = trial;

    let i1_trial = trace3(sigma);
    if (-params.alpha_phi * i1_trial + params.k_c < 0.0) {
        sigma = sigma - ((i1_trial - params.k_c / params.alpha_phi) / 3.0) * identity;
    }

    let i1 = trace3(sigma);
    let s = sigma - (i1 / 3.0) * identity;
    let sqrt_j2 = sqrt(max(0.5 * double_contraction(s, transpose(s)), 0.0));
    let limit = -params.alpha_phi * i1 + params.k_c;
    if (limit < sqrt_j2) {
        sigma = (limit / (sqrt_j2 + TINY_REAL)) * s + (i1 / 3.0) * identity;
    }
    return sigma;
}

@compute @workgroup_size(WORKGROUP_SIZE, 1, 1)
fn update(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i >= params.particle_count) {
        return;
    }
    density[i] = density[i] + rates[i].w * (params.dt * 0.5);

    let l = velocity_gradient[i];
    let rate = constitutive_relation(l, stress[i]);
    if (params.stress_rate_mode == 0u) {
        stress_rate[i] = rate;
    } else {
        stress_rate[i] = stress_rate[i] + rate;
    }

    let d = 0.5 * (l + transpose(l));
    strain_rate[i] = d;
    if (params.integrate_stress != 0u) {
        stress[i] = return_mapping(stress[i] + stress_rate[i] * params.dt);
        strain[i] = strain[i] + d * params.dt;
    }
}
"#;

/// Which pass a shader source is assembled for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePassKind {
    Initialize,
    InnerInteract,
    WallInteract,
    Update,
}

impl DevicePassKind {
    pub fn entry_point(&self) -> &'static str {
        match self {
            DevicePassKind::Initialize => "initialize",
            DevicePassKind::InnerInteract => "interact_inner",
            DevicePassKind::WallInteract => "interact_wall",
            DevicePassKind::Update => "update",
        }
    }

    /// `read_only` flag of each storage binding after the uniform block
    pub fn storage_bindings(&self, plastic: bool) -> &'static [bool] {
        match (self, plastic) {
            (DevicePassKind::Initialize, _) => &[false, true],
            (DevicePassKind::InnerInteract, false) => &[true, true, true, true, true, false],
            (DevicePassKind::InnerInteract, true) => &[true, true, true, true, true, false, false],
            (DevicePassKind::WallInteract, false) => &[true, true, true, true, true, true, false],
            (DevicePassKind::WallInteract, true) => {
                &[true, true, true, true, true, true, false, false]
            }
            (DevicePassKind::Update, false) => &[false, true],
            (DevicePassKind::Update, true) => &[false, true, true, false, false, false, false],
        }
    }
}

/// Complete WGSL module for one pass
pub fn shader_source(kind: DevicePassKind, plastic: bool) -> String {
    let body = match kind {
        DevicePassKind::Initialize => INITIALIZE.to_string(),
        DevicePassKind::InnerInteract => gradient_variant(INNER_INTERACT, 7, plastic, false),
        DevicePassKind::WallInteract => gradient_variant(WALL_INTERACT, 8, plastic, true),
        DevicePassKind::Update if plastic => PLASTIC_UPDATE.to_string(),
        DevicePassKind::Update => FLUID_UPDATE.to_string(),
    };
    format!("const WORKGROUP_SIZE: u32 = {}u;\n{}{}", WORKGROUP_SIZE, PRELUDE, body)
}

fn gradient_variant(template: &str, binding: u32, plastic: bool, accumulate: bool) -> String {
    let (declaration, store) = if plastic {
        let declaration = format!(
            "@group(0) @binding({binding}) var<storage, read_write> velocity_gradient: array<mat3x3<f32>>;"
        );
        let store = if accumulate {
            "velocity_gradient[i] = velocity_gradient[i] + gradient;"
        } else {
            "velocity_gradient[i] = gradient;"
        };
        (declaration, store)
    } else {
        (String::new(), "")
    };
    template
        .replace("GRADIENT_BINDING", &declaration)
        .replace("GRADIENT_STORE", store)
}

/// Compiled pipeline together with its bind group layout
pub struct DevicePass {
    kind: DevicePassKind,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl DevicePass {
    pub fn new(context: &DeviceContext, kind: DevicePassKind, plastic: bool) -> Self {
        let label = format!("acoustic_step_{}", kind.entry_point());
        let layout = kind
            .storage_bindings(plastic)
            .iter()
            .fold(
                BindGroupLayoutBuilder::new().next_binding_compute(binding_types::uniform()),
                |builder, read_only| {
                    builder.next_binding_compute(binding_types::storage_buffer(*read_only))
                },
            )
            .create(context, &label);
        let pipeline = crate::execution::device::create_compute_pipeline(
            context,
            &label,
            &shader_source(kind, plastic),
            kind.entry_point(),
            &layout,
        );
        Self {
            kind,
            layout,
            pipeline,
        }
    }

    pub fn kind(&self) -> DevicePassKind {
        self.kind
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn pipeline(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }
}

/// The four pipelines of the fluid or of the plastic variant
pub struct DeviceAcousticPipelines {
    plastic: bool,
    initialize: DevicePass,
    inner: DevicePass,
    wall: DevicePass,
    update: DevicePass,
}

impl DeviceAcousticPipelines {
    pub fn new(context: &DeviceContext, plastic: bool) -> Self {
        let pipelines = Self {
            plastic,
            initialize: DevicePass::new(context, DevicePassKind::Initialize, plastic),
            inner: DevicePass::new(context, DevicePassKind::InnerInteract, plastic),
            wall: DevicePass::new(context, DevicePassKind::WallInteract, plastic),
            update: DevicePass::new(context, DevicePassKind::Update, plastic),
        };
        log::info!(
            "Compiled {} acoustic step pipelines",
            if plastic { "plastic" } else { "fluid" }
        );
        pipelines
    }

    pub fn is_plastic(&self) -> bool {
        self.plastic
    }
}

fn host_positions(particles: &BaseParticles) -> Vec<DeviceVec> {
    particles.position.iter().map(|p| vecd_to_device(*p)).collect()
}

fn host_velocity_volume(particles: &BaseParticles) -> Vec<DeviceVec> {
    particles
        .velocity
        .iter()
        .zip(&particles.volume)
        .map(|(v, vol)| vecd_with_scalar_to_device(*v, *vol))
        .collect()
}

fn host_rates(particles: &BaseParticles) -> Vec<DeviceVec> {
    particles
        .force
        .iter()
        .zip(&particles.density_rate)
        .map(|(f, drho)| vecd_with_scalar_to_device(*f, *drho))
        .collect()
}

/// Device mirror of the base fields and the correction tensors
pub struct DeviceFluidFields {
    pub position: DeviceArray<DeviceVec>,
    pub velocity_volume: DeviceArray<DeviceVec>,
    pub density: DeviceArray<Real>,
    pub rates: DeviceArray<DeviceVec>,
    pub correction: DeviceArray<DeviceMat>,
}

impl DeviceFluidFields {
    pub fn upload<C: KernelCorrection>(
        context: &DeviceContext,
        particles: &BaseParticles,
        correction: &C,
    ) -> Self {
        Self {
            position: DeviceArray::from_slice(context, "position", &host_positions(particles)),
            velocity_volume: DeviceArray::from_slice(
                context,
                "velocity_volume",
                &host_velocity_volume(particles),
            ),
            density: DeviceArray::from_slice(context, "density", &particles.density),
            rates: DeviceArray::from_slice(context, "rates", &host_rates(particles)),
            correction: DeviceArray::from_slice(
                context,
                "correction",
                &correction.device_matrices(particles.len()),
            ),
        }
    }

    /// Pushes the current host state; the particle count must be unchanged
    pub fn refresh<C: KernelCorrection>(
        &self,
        context: &DeviceContext,
        particles: &BaseParticles,
        correction: &C,
    ) -> SphResult<()> {
        self.position.write(context, &host_positions(particles))?;
        self.velocity_volume
            .write(context, &host_velocity_volume(particles))?;
        self.density.write(context, &particles.density)?;
        self.rates.write(context, &host_rates(particles))?;
        self.correction
            .write(context, &correction.device_matrices(particles.len()))
    }

    /// Reads back the fields a step writes
    pub fn download(&self, context: &DeviceContext, particles: &mut BaseParticles) -> SphResult<()> {
        let n = particles.len();
        let position = self.position.read(context)?;
        let density = self.density.read(context)?;
        let rates = self.rates.read(context)?;
        SphError::check_length("device position", n, position.len())?;
        SphError::check_length("device density", n, density.len())?;
        SphError::check_length("device rates", n, rates.len())?;

        for (host, device) in particles.position.iter_mut().zip(&position) {
            *host = vecd_from_device(*device);
        }
        particles.density.copy_from_slice(&density);
        for ((force, density_rate), device) in particles
            .force
            .iter_mut()
            .zip(particles.density_rate.iter_mut())
            .zip(&rates)
        {
            *force = vecd_from_device(*device);
            *density_rate = device[3];
        }
        Ok(())
    }
}

/// Device mirror of the plastic tensor fields
pub struct DevicePlasticFields {
    pub velocity_gradient: DeviceArray<DeviceMat>,
    pub stress: DeviceArray<DeviceMat>,
    pub strain: DeviceArray<DeviceMat>,
    pub stress_rate: DeviceArray<DeviceMat>,
    pub strain_rate: DeviceArray<DeviceMat>,
}

fn host_tensors(tensors: &[crate::math::Mat3d]) -> Vec<DeviceMat> {
    tensors.iter().map(mat3d_to_device).collect()
}

fn read_tensors(
    context: &DeviceContext,
    field: &'static str,
    array: &DeviceArray<DeviceMat>,
    host: &mut [crate::math::Mat3d],
) -> SphResult<()> {
    let device = array.read(context)?;
    SphError::check_length(field, host.len(), device.len())?;
    for (h, d) in host.iter_mut().zip(&device) {
        *h = mat3d_from_device(d);
    }
    Ok(())
}

impl DevicePlasticFields {
    pub fn upload(context: &DeviceContext, particles: &PlasticParticles) -> Self {
        let gradient: Vec<DeviceMat> = particles.velocity_gradient.iter().map(matd_to_device).collect();
        Self {
            velocity_gradient: DeviceArray::from_slice(context, "velocity_gradient", &gradient),
            stress: DeviceArray::from_slice(
                context,
                "stress",
                &host_tensors(&particles.stress_tensor_3d),
            ),
            strain: DeviceArray::from_slice(
                context,
                "strain",
                &host_tensors(&particles.strain_tensor_3d),
            ),
            stress_rate: DeviceArray::from_slice(
                context,
                "stress_rate",
                &host_tensors(&particles.stress_rate_3d),
            ),
            strain_rate: DeviceArray::from_slice(
                context,
                "strain_rate",
                &host_tensors(&particles.strain_rate_3d),
            ),
        }
    }

    pub fn refresh(&self, context: &DeviceContext, particles: &PlasticParticles) -> SphResult<()> {
        let gradient: Vec<DeviceMat> = particles.velocity_gradient.iter().map(matd_to_device).collect();
        self.velocity_gradient.write(context, &gradient)?;
        self.stress
            .write(context, &host_tensors(&particles.stress_tensor_3d))?;
        self.strain
            .write(context, &host_tensors(&particles.strain_tensor_3d))?;
        self.stress_rate
            .write(context, &host_tensors(&particles.stress_rate_3d))?;
        self.strain_rate
            .write(context, &host_tensors(&particles.strain_rate_3d))
    }

    pub fn download(&self, context: &DeviceContext, particles: &mut PlasticParticles) -> SphResult<()> {
        let gradient = self.velocity_gradient.read(context)?;
        SphError::check_length("device velocity_gradient", particles.len(), gradient.len())?;
        for (h, d) in particles.velocity_gradient.iter_mut().zip(&gradient) {
            *h = matd_from_device(d);
        }
        read_tensors(context, "device stress", &self.stress, &mut particles.stress_tensor_3d)?;
        read_tensors(context, "device strain", &self.strain, &mut particles.strain_tensor_3d)?;
        read_tensors(context, "device stress_rate", &self.stress_rate, &mut particles.stress_rate_3d)?;
        read_tensors(context, "device strain_rate", &self.strain_rate, &mut particles.strain_rate_3d)
    }
}

/// Device copy of one neighbor relation
pub struct DeviceRelation {
    pub topology: DeviceArray<u32>,
    pub kernel_data: DeviceArray<DeviceVec>,
}

impl DeviceRelation {
    pub fn upload(
        context: &DeviceContext,
        label: &str,
        relation: &NeighborRelation,
        owners: usize,
    ) -> SphResult<Self> {
        SphError::check_length("relation owners", owners, relation.owner_count())?;
        Ok(Self {
            topology: DeviceArray::from_slice(
                context,
                &format!("{label}_topology"),
                &relation.device_topology(),
            ),
            kernel_data: DeviceArray::from_slice(
                context,
                &format!("{label}_kernel_data"),
                &relation.device_kernel_data(),
            ),
        })
    }
}

fn device_wall_points(wall: &WallParticles) -> Vec<DeviceWallPoint> {
    (0..wall.len())
        .map(|j| DeviceWallPoint {
            velocity_ave: vecd_to_device(wall.average_velocity[j]),
            normal_volume: vecd_with_scalar_to_device(wall.normal[j], wall.volume[j]),
        })
        .collect()
}

/// One wall body with its contact relation
pub struct DeviceWall {
    pub relation: DeviceRelation,
    pub points: DeviceArray<DeviceWallPoint>,
}

impl DeviceWall {
    pub fn upload(context: &DeviceContext, contact: WallContact<'_>, owners: usize) -> SphResult<Self> {
        contact.wall.check_consistency()?;
        Ok(Self {
            relation: DeviceRelation::upload(context, "wall_contact", contact.relation, owners)?,
            points: DeviceArray::from_slice(context, "wall_points", &device_wall_points(contact.wall)),
        })
    }
}

/// Device-resident acoustic second half of one body
pub struct DeviceAcousticStep {
    particle_count: usize,
    step_uniforms: StepUniforms,
    uniforms: UniformBuffer<StepUniforms>,
    fields: DeviceFluidFields,
    plastic: Option<DevicePlasticFields>,
    inner: DeviceRelation,
    walls: Vec<DeviceWall>,
    initialize_group: wgpu::BindGroup,
    inner_group: wgpu::BindGroup,
    wall_groups: Vec<wgpu::BindGroup>,
    update_group: wgpu::BindGroup,
}

impl DeviceAcousticStep {
    /// Mirrors a fluid body and binds it to fluid pipelines
    pub fn new<R: RiemannSolver, C: KernelCorrection>(
        _policy: &OffloadPolicy,
        context: &DeviceContext,
        pipelines: &DeviceAcousticPipelines,
        step: &AcousticStep2ndHalf<R, C>,
        particles: &BaseParticles,
        inner_relation: &NeighborRelation,
        walls: &[WallContact<'_>],
    ) -> SphResult<Self> {
        if pipelines.is_plastic() {
            return Err(SphError::config("fluid body bound to plastic pipelines"));
        }
        particles.check_consistency()?;
        let uniforms = StepUniforms::new(particles.len(), step.riemann().device_params());
        let fields = DeviceFluidFields::upload(context, particles, step.correction());
        Self::build(context, pipelines, uniforms, fields, None, inner_relation, walls)
    }

    /// Mirrors a plastic body and binds it to plastic pipelines
    pub fn new_plastic<R: RiemannSolver, C: KernelCorrection>(
        _policy: &OffloadPolicy,
        context: &DeviceContext,
        pipelines: &DeviceAcousticPipelines,
        step: &PlasticAcousticStep2ndHalf<R, C>,
        particles: &PlasticParticles,
        inner_relation: &NeighborRelation,
        walls: &[WallContact<'_>],
    ) -> SphResult<Self> {
        if !pipelines.is_plastic() {
            return Err(SphError::config("plastic body bound to fluid pipelines"));
        }
        particles.check_consistency()?;
        let options = step.options();
        let uniforms = StepUniforms::new(particles.len(), step.riemann().device_params())
            .with_plastic(step.material(), options.stress_rate_update, options.integrate_stress);
        let fields = DeviceFluidFields::upload(context, &particles.base, step.correction());
        let plastic = DevicePlasticFields::upload(context, particles);
        Self::build(
            context,
            pipelines,
            uniforms,
            fields,
            Some(plastic),
            inner_relation,
            walls,
        )
    }

    fn build(
        context: &DeviceContext,
        pipelines: &DeviceAcousticPipelines,
        step_uniforms: StepUniforms,
        fields: DeviceFluidFields,
        plastic: Option<DevicePlasticFields>,
        inner_relation: &NeighborRelation,
        walls: &[WallContact<'_>],
    ) -> SphResult<Self> {
        let particle_count = step_uniforms.particle_count as usize;
        let uniforms = UniformBuffer::new_with_data(context, &step_uniforms);
        let inner = DeviceRelation::upload(context, "inner", inner_relation, particle_count)?;
        let walls = walls
            .iter()
            .map(|contact| DeviceWall::upload(context, *contact, particle_count))
            .collect::<SphResult<Vec<_>>>()?;

        let initialize_group = BindGroupBuilder::new()
            .resource(uniforms.binding_resource())
            .resource(fields.position.binding_resource())
            .resource(fields.velocity_volume.binding_resource())
            .create(context, pipelines.initialize.layout(), "initialize_bind_group");

        let inner_group = Self::interaction_group(
            context,
            pipelines.inner.layout(),
            &uniforms,
            &fields,
            plastic.as_ref(),
            &inner,
            None,
        );
        let wall_groups = walls
            .iter()
            .map(|wall| {
                Self::interaction_group(
                    context,
                    pipelines.wall.layout(),
                    &uniforms,
                    &fields,
                    plastic.as_ref(),
                    &wall.relation,
                    Some(&wall.points),
                )
            })
            .collect();

        let builder = BindGroupBuilder::new()
            .resource(uniforms.binding_resource())
            .resource(fields.density.binding_resource())
            .resource(fields.rates.binding_resource());
        let builder = match &plastic {
            Some(tensors) => builder
                .resource(tensors.velocity_gradient.binding_resource())
                .resource(tensors.stress.binding_resource())
                .resource(tensors.strain.binding_resource())
                .resource(tensors.stress_rate.binding_resource())
                .resource(tensors.strain_rate.binding_resource()),
            None => builder,
        };
        let update_group = builder.create(context, pipelines.update.layout(), "update_bind_group");

        log::debug!(
            "Device step bound: {} particles, {} inner neighbors, {} walls",
            particle_count,
            inner_relation.total_neighbors(),
            walls.len()
        );

        Ok(Self {
            particle_count,
            step_uniforms,
            uniforms,
            fields,
            plastic,
            inner,
            walls,
            initialize_group,
            inner_group,
            wall_groups,
            update_group,
        })
    }

    fn interaction_group(
        context: &DeviceContext,
        layout: &wgpu::BindGroupLayout,
        uniforms: &UniformBuffer<StepUniforms>,
        fields: &DeviceFluidFields,
        plastic: Option<&DevicePlasticFields>,
        relation: &DeviceRelation,
        wall_points: Option<&DeviceArray<DeviceWallPoint>>,
    ) -> wgpu::BindGroup {
        let builder = BindGroupBuilder::new()
            .resource(uniforms.binding_resource())
            .resource(fields.velocity_volume.binding_resource())
            .resource(fields.density.binding_resource())
            .resource(fields.correction.binding_resource())
            .resource(relation.topology.binding_resource())
            .resource(relation.kernel_data.binding_resource());
        let builder = match wall_points {
            Some(points) => builder.resource(points.binding_resource()),
            None => builder,
        };
        let builder = builder.resource(fields.rates.binding_resource());
        let builder = match plastic {
            Some(tensors) => builder.resource(tensors.velocity_gradient.binding_resource()),
            None => builder,
        };
        let label = if wall_points.is_some() {
            "wall_interact_bind_group"
        } else {
            "inner_interact_bind_group"
        };
        builder.create(context, layout, label)
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    pub fn wall_count(&self) -> usize {
        self.walls.len()
    }

    pub fn inner_neighbor_count(&self) -> usize {
        self.inner.kernel_data.len()
    }

    pub fn fields(&self) -> &DeviceFluidFields {
        &self.fields
    }

    /// Encodes and submits one sub-step; does not wait for completion
    pub fn exec(
        &mut self,
        context: &DeviceContext,
        pipelines: &DeviceAcousticPipelines,
        dt: Real,
    ) -> SphResult<()> {
        if pipelines.is_plastic() != self.plastic.is_some() {
            return Err(SphError::config("device step and pipelines disagree on the material"));
        }
        self.step_uniforms.dt = dt;
        self.uniforms.update_content(context, self.step_uniforms);

        let workgroups = dispatch_size(self.particle_count);
        let mut passes = Vec::with_capacity(3 + self.wall_groups.len());
        passes.push(ComputeDispatch {
            label: "initialize",
            pipeline: pipelines.initialize.pipeline(),
            bind_group: &self.initialize_group,
            workgroups,
        });
        passes.push(ComputeDispatch {
            label: "interact_inner",
            pipeline: pipelines.inner.pipeline(),
            bind_group: &self.inner_group,
            workgroups,
        });
        for group in &self.wall_groups {
            passes.push(ComputeDispatch {
                label: "interact_wall",
                pipeline: pipelines.wall.pipeline(),
                bind_group: group,
                workgroups,
            });
        }
        passes.push(ComputeDispatch {
            label: "update",
            pipeline: pipelines.update.pipeline(),
            bind_group: &self.update_group,
            workgroups,
        });

        context.run_passes("acoustic_step_2nd_half", &passes);
        Ok(())
    }

    /// Pushes host state changed outside the step, e.g. by the first half
    pub fn refresh<C: KernelCorrection>(
        &self,
        context: &DeviceContext,
        particles: &BaseParticles,
        correction: &C,
    ) -> SphResult<()> {
        self.fields.refresh(context, particles, correction)
    }

    pub fn refresh_plastic<C: KernelCorrection>(
        &self,
        context: &DeviceContext,
        particles: &PlasticParticles,
        correction: &C,
    ) -> SphResult<()> {
        self.fields.refresh(context, &particles.base, correction)?;
        match &self.plastic {
            Some(tensors) => tensors.refresh(context, particles),
            None => Err(SphError::config("device step holds no plastic fields")),
        }
    }

    /// Blocks until the step finished and copies its results to the host
    pub fn download(&self, context: &DeviceContext, particles: &mut BaseParticles) -> SphResult<()> {
        self.fields.download(context, particles)
    }

    pub fn download_plastic(
        &self,
        context: &DeviceContext,
        particles: &mut PlasticParticles,
    ) -> SphResult<()> {
        self.fields.download(context, &mut particles.base)?;
        match &self.plastic {
            Some(tensors) => tensors.download(context, particles),
            None => Err(SphError::config("device step holds no plastic fields")),
        }
    }
}
