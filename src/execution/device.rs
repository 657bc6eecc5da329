// src/execution/device.rs
//! Offload device plumbing on top of wgpu
//!
//! Provides the device context, typed storage and uniform buffers, bind
//! group builders and a compute pipeline helper. All readbacks block the
//! calling thread until the device is idle.

use crate::error::{SphError, SphResult};
use bytemuck::Pod;
use std::marker::PhantomData;
use wgpu::util::DeviceExt;

/// Threads per workgroup used by every particle kernel
pub const WORKGROUP_SIZE: u32 = 64;

/// Storage buffers bound by the widest particle kernel
pub const REQUIRED_STORAGE_BUFFERS: u32 = 8;

/// Number of workgroups covering `n` invocations
pub fn dispatch_size(n: usize) -> u32 {
    (n as u32).div_ceil(WORKGROUP_SIZE)
}

/// Instance, adapter, device and queue for offloaded execution
pub struct DeviceContext {
    adapter_info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl DeviceContext {
    /// Picks a high-performance adapter and opens a device on it
    pub fn new() -> SphResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> SphResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| SphError::AdapterUnavailable(e.to_string()))?;

        let limits = adapter.limits();
        if limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
            return Err(SphError::DeviceLimits {
                available: limits.max_storage_buffers_per_shader_stage,
                required: REQUIRED_STORAGE_BUFFERS,
            });
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("SPH Compute Device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits,
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Compute device selected: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        Ok(Self {
            adapter_info,
            device,
            queue,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Encodes one compute pass per entry, in order, and submits them together
    ///
    /// Dispatches in one submission observe each other's storage writes in
    /// submission order, which is the phase barrier on the device.
    pub fn run_passes(&self, label: &str, passes: &[ComputeDispatch<'_>]) {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });

        for pass in passes {
            if pass.workgroups == 0 {
                continue;
            }
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(pass.label),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(pass.pipeline);
            compute_pass.set_bind_group(0, pass.bind_group, &[]);
            compute_pass.dispatch_workgroups(pass.workgroups, 1, 1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Blocks until all submitted work has finished
    pub fn wait_idle(&self) -> SphResult<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| SphError::DevicePoll(format!("{e:?}")))
    }
}

/// One pipeline dispatch inside [`DeviceContext::run_passes`]
pub struct ComputeDispatch<'a> {
    pub label: &'a str,
    pub pipeline: &'a wgpu::ComputePipeline,
    pub bind_group: &'a wgpu::BindGroup,
    pub workgroups: u32,
}

fn type_name<T>() -> &'static str {
    let type_name = std::any::type_name::<T>();
    match type_name.rfind(':') {
        Some(pos) => &type_name[(pos + 1)..],
        None => type_name,
    }
}

/// Typed device-resident storage array
pub struct DeviceArray<T> {
    buffer: wgpu::Buffer,
    len: usize,
    label: String,
    content_type: PhantomData<T>,
}

impl<T: Pod> DeviceArray<T> {
    /// Uploads `data`; empty arrays still allocate one element
    pub fn from_slice(context: &DeviceContext, label: &str, data: &[T]) -> Self {
        let label = format!("{}<{}>", label, type_name::<T>());
        let padding = vec![T::zeroed()];
        let contents: &[T] = if data.is_empty() { &padding } else { data };

        let buffer = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&label),
                contents: bytemuck::cast_slice(contents),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            });

        Self {
            buffer,
            len: data.len(),
            label,
            content_type: PhantomData,
        }
    }

    pub fn zeroed(context: &DeviceContext, label: &str, len: usize) -> Self {
        Self::from_slice(context, label, &vec![T::zeroed(); len])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn binding_resource(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }

    fn byte_size(&self) -> u64 {
        (self.len.max(1) * std::mem::size_of::<T>()) as u64
    }

    /// Overwrites the array; the length must not change
    pub fn write(&self, context: &DeviceContext, data: &[T]) -> SphResult<()> {
        SphError::check_length("device array", self.len, data.len())?;
        if !data.is_empty() {
            context
                .queue
                .write_buffer(&self.buffer, 0, bytemuck::cast_slice(data));
        }
        Ok(())
    }

    /// Copies the array back to the host (blocking)
    pub fn read(&self, context: &DeviceContext) -> SphResult<Vec<T>> {
        if self.len == 0 {
            return Ok(Vec::new());
        }

        let size = self.byte_size();
        let staging_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging_buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("copy_encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging_buffer, 0, size);
        context.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging_buffer.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        context.wait_idle()?;

        match futures::executor::block_on(rx) {
            Ok(Ok(())) => {
                let mapped = slice.get_mapped_range();
                let mut result: Vec<T> = bytemuck::cast_slice(&mapped).to_vec();
                drop(mapped);
                staging_buffer.unmap();
                result.truncate(self.len);
                Ok(result)
            }
            Ok(Err(e)) => Err(SphError::Readback {
                label: self.label.clone(),
                message: e.to_string(),
            }),
            Err(e) => Err(SphError::Readback {
                label: self.label.clone(),
                message: e.to_string(),
            }),
        }
    }
}

/// Uniform buffer holding one `Content` value
pub struct UniformBuffer<Content> {
    buffer: wgpu::Buffer,
    content_type: PhantomData<Content>,
    previous_content: Vec<u8>,
}

impl<Content: Pod> UniformBuffer<Content> {
    pub fn new_with_data(context: &DeviceContext, initial_content: &Content) -> Self {
        let bytes = bytemuck::bytes_of(initial_content);
        let buffer = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("UniformBuffer: {}", type_name::<Content>())),
                contents: bytes,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

        Self {
            buffer,
            content_type: PhantomData,
            previous_content: bytes.to_vec(),
        }
    }

    /// Writes new content, skipping the upload when nothing changed
    pub fn update_content(&mut self, context: &DeviceContext, content: Content) {
        let new_content = bytemuck::bytes_of(&content);
        if self.previous_content == new_content {
            return;
        }
        context.queue.write_buffer(&self.buffer, 0, new_content);
        self.previous_content = new_content.to_vec();
    }

    pub fn binding_resource(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

pub mod binding_types {
    pub fn storage_buffer(read_only: bool) -> wgpu::BindingType {
        wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        }
    }

    pub fn storage_buffer_read_only() -> wgpu::BindingType {
        storage_buffer(true)
    }

    pub fn storage_buffer_read_write() -> wgpu::BindingType {
        storage_buffer(false)
    }

    pub fn uniform() -> wgpu::BindingType {
        wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        }
    }
}

/// Collects compute-stage layout entries with consecutive binding numbers
#[derive(Default)]
pub struct BindGroupLayoutBuilder {
    entries: Vec<wgpu::BindGroupLayoutEntry>,
}

impl BindGroupLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_binding_compute(mut self, ty: wgpu::BindingType) -> Self {
        self.entries.push(wgpu::BindGroupLayoutEntry {
            binding: self.entries.len() as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        });
        self
    }

    pub fn binding_count(&self) -> usize {
        self.entries.len()
    }

    pub fn create(self, context: &DeviceContext, label: &str) -> wgpu::BindGroupLayout {
        context
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &self.entries,
            })
    }
}

/// Collects bind group resources in binding order
#[derive(Default)]
pub struct BindGroupBuilder<'a> {
    entries: Vec<wgpu::BindGroupEntry<'a>>,
}

impl<'a> BindGroupBuilder<'a> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn resource(mut self, resource: wgpu::BindingResource<'a>) -> Self {
        self.entries.push(wgpu::BindGroupEntry {
            binding: self.entries.len() as u32,
            resource,
        });
        self
    }

    pub fn create(
        self,
        context: &DeviceContext,
        layout: &wgpu::BindGroupLayout,
        label: &str,
    ) -> wgpu::BindGroup {
        context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &self.entries,
        })
    }
}

/// Compiles a WGSL module and builds a single-layout compute pipeline
pub fn create_compute_pipeline(
    context: &DeviceContext,
    label: &str,
    shader_source: &str,
    entry_point: &str,
    bind_group_layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let shader = context
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(shader_source.into()),
        });

    let pipeline_layout = context
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[bind_group_layout],
            push_constant_ranges: &[],
        });

    context
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_size_rounds_up() {
        assert_eq!(dispatch_size(0), 0);
        assert_eq!(dispatch_size(1), 1);
        assert_eq!(dispatch_size(64), 1);
        assert_eq!(dispatch_size(65), 2);
    }

    #[test]
    fn test_layout_builder_numbers_bindings() {
        let builder = BindGroupLayoutBuilder::new()
            .next_binding_compute(binding_types::uniform())
            .next_binding_compute(binding_types::storage_buffer_read_only())
            .next_binding_compute(binding_types::storage_buffer_read_write());
        assert_eq!(builder.binding_count(), 3);
        assert_eq!(builder.entries[2].binding, 2);
    }

    #[test]
    fn test_device_array_round_trip() {
        let _ = env_logger::builder().is_test(true).try_init();
        let context = match DeviceContext::new() {
            Ok(context) => context,
            Err(e) => {
                log::warn!("skipping device test: {}", e);
                return;
            }
        };

        let data: Vec<[f32; 4]> = (0..100).map(|i| [i as f32, 1.0, 2.0, 3.0]).collect();
        let array = DeviceArray::from_slice(&context, "test", &data);
        assert_eq!(array.read(&context).unwrap_or_default(), data);

        let empty: DeviceArray<u32> = DeviceArray::from_slice(&context, "empty", &[]);
        assert!(empty.is_empty());
        assert!(empty.read(&context).unwrap_or_default().is_empty());
        assert!(array.write(&context, &data[..10]).is_err());
    }
}
