//! wgpu backend: Vulkan, Metal, DX12 and GL adapters.
//!
//! Programs are WGSL. Memory parameters are bound as storage buffers in
//! declared order, followed by one read-only storage array holding the
//! dispatch geometry, the extents of every memory parameter and the scalars
//! (see `shaders::pack_params`). Image allocations
//! are storage buffers flagged with image semantics. Kernels operate on
//! `f32` elements; other element types can be allocated, copied and
//! transferred but not dispatched.

use std::sync::Arc;

use tracing::{debug, trace};
use wgpu::util::DeviceExt;

use super::{
    AsAny, CapabilityVersion, CompiledKernel, Device, DeviceBackend, DeviceKind, DeviceMemory,
    DeviceQueue, DispatchArg, MemoryLayout,
};
use crate::kernel::{KernelId, KernelSignature, Program};
use crate::{ComputeError, ComputeResult, shaders};
use voxl_core::ElementType;

/// Threads per workgroup along x, matching `@workgroup_size(64)`.
const WORKGROUP_SIZE: usize = 64;

/// Reported capability of fully WebGPU-compliant adapters.
const FULL_CAPABILITY: CapabilityVersion = CapabilityVersion::new(2, 0);
/// Reported capability of downlevel adapters.
const DOWNLEVEL_CAPABILITY: CapabilityVersion = CapabilityVersion::new(1, 1);

// =============================================================================
// Backend
// =============================================================================

/// Enumerates wgpu adapters.
pub struct WgpuBackend {
    instance: wgpu::Instance,
}

impl WgpuBackend {
    pub const NAME: &'static str = "wgpu";

    pub fn new() -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        Self { instance }
    }

    fn adapters(&self) -> Vec<wgpu::Adapter> {
        self.instance.enumerate_adapters(wgpu::Backends::all())
    }
}

impl Default for WgpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probe(&self) -> ComputeResult<Vec<Device>> {
        Ok(self
            .adapters()
            .iter()
            .enumerate()
            .map(|(ordinal, adapter)| {
                let info = adapter.get_info();
                let limits = adapter.limits();
                let version = if adapter.get_downlevel_capabilities().is_webgpu_compliant() {
                    FULL_CAPABILITY
                } else {
                    DOWNLEVEL_CAPABILITY
                };
                let kind = match info.device_type {
                    wgpu::DeviceType::Cpu => DeviceKind::Cpu,
                    _ => DeviceKind::Accelerator,
                };
                Device {
                    name: info.name.clone(),
                    version,
                    kind,
                    image_support: true,
                    max_alloc_bytes: limits.max_buffer_size.min(limits.max_storage_buffer_binding_size as u64),
                    global_memory_bytes: estimate_memory(&info, limits.max_buffer_size),
                    backend: Self::NAME,
                    ordinal,
                }
            })
            .collect())
    }

    fn open(&self, device: &Device) -> ComputeResult<Box<dyn DeviceQueue>> {
        let adapter = self
            .adapters()
            .into_iter()
            .nth(device.ordinal)
            .filter(|a| a.get_info().name == device.name)
            .ok_or_else(|| ComputeError::OperationFailed(format!("adapter '{}' disappeared", device.name)))?;

        let (gpu, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("voxl_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            },
            None,
        ))
        .map_err(|e| ComputeError::OperationFailed(format!("device creation failed: {e}")))?;

        debug!(device = %device.name, "opened wgpu device");
        Ok(Box::new(WgpuQueue {
            device: gpu,
            queue,
            name: device.name.clone(),
        }))
    }
}

/// Rough device memory estimate from adapter type and buffer limit.
fn estimate_memory(info: &wgpu::AdapterInfo, max_buffer_bytes: u64) -> u64 {
    let from_buffer = max_buffer_bytes.saturating_mul(2);
    match info.device_type {
        wgpu::DeviceType::DiscreteGpu => from_buffer.clamp(2u64 << 30, 24u64 << 30),
        wgpu::DeviceType::IntegratedGpu => from_buffer.clamp(512u64 << 20, 4u64 << 30),
        wgpu::DeviceType::VirtualGpu => from_buffer.clamp(1u64 << 30, 8u64 << 30),
        _ => from_buffer.clamp(256u64 << 20, 2u64 << 30),
    }
}

// =============================================================================
// Memory / kernels
// =============================================================================

struct WgpuMemory {
    layout: MemoryLayout,
    buffer: wgpu::Buffer,
}

impl AsAny for WgpuMemory {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl DeviceMemory for WgpuMemory {
    fn layout(&self) -> &MemoryLayout {
        &self.layout
    }
}

fn wgpu_memory(memory: &dyn DeviceMemory) -> ComputeResult<&WgpuMemory> {
    memory
        .as_any()
        .downcast_ref::<WgpuMemory>()
        .ok_or_else(|| ComputeError::OperationFailed("memory does not belong to the wgpu backend".into()))
}

/// Storage buffer sizes must be non-zero multiples of 4.
fn padded_size(bytes: u64) -> u64 {
    bytes.max(4).next_multiple_of(4)
}

struct WgpuKernel {
    id: KernelId,
    signature: KernelSignature,
    pipeline: wgpu::ComputePipeline,
}

impl AsAny for WgpuKernel {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl CompiledKernel for WgpuKernel {
    fn id(&self) -> &KernelId {
        &self.id
    }

    fn signature(&self) -> &KernelSignature {
        &self.signature
    }
}

// =============================================================================
// Queue
// =============================================================================

struct WgpuQueue {
    device: wgpu::Device,
    queue: wgpu::Queue,
    name: String,
}

impl WgpuQueue {
    fn wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Run `f` inside an error scope and turn a captured error into `err`.
    fn scoped<T>(
        &self,
        filter: wgpu::ErrorFilter,
        f: impl FnOnce() -> T,
        err: impl FnOnce(String) -> ComputeError,
    ) -> ComputeResult<T> {
        self.device.push_error_scope(filter);
        let value = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(err(e.to_string())),
            None => Ok(value),
        }
    }
}

impl DeviceQueue for WgpuQueue {
    fn allocate(&self, layout: &MemoryLayout) -> ComputeResult<Box<dyn DeviceMemory>> {
        let requested = layout.size_bytes();
        let size = padded_size(requested);
        if size > self.device.limits().max_buffer_size {
            return Err(ComputeError::AllocationFailed {
                requested,
                reason: format!("exceeds max buffer size of {}", self.device.limits().max_buffer_size),
            });
        }
        let buffer = self.scoped(
            wgpu::ErrorFilter::OutOfMemory,
            || {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("voxl_memory"),
                    size,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            },
            |reason| ComputeError::AllocationFailed { requested, reason },
        )?;
        Ok(Box::new(WgpuMemory { layout: *layout, buffer }))
    }

    fn write(&self, memory: &dyn DeviceMemory, bytes: &[u8]) -> ComputeResult<()> {
        let mem = wgpu_memory(memory)?;
        if bytes.len() as u64 != mem.layout.size_bytes() {
            return Err(ComputeError::LayoutMismatch(format!(
                "expected {} bytes, got {}",
                mem.layout.size_bytes(),
                bytes.len()
            )));
        }
        let size = padded_size(bytes.len() as u64) as usize;
        if size == bytes.len() {
            self.queue.write_buffer(&mem.buffer, 0, bytes);
        } else {
            let mut padded = bytes.to_vec();
            padded.resize(size, 0);
            self.queue.write_buffer(&mem.buffer, 0, &padded);
        }
        Ok(())
    }

    fn read(&self, memory: &dyn DeviceMemory) -> ComputeResult<Vec<u8>> {
        let mem = wgpu_memory(memory)?;
        let size = mem.buffer.size();

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("voxl_staging"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_buffer_to_buffer(&mem.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        self.wait();

        rx.recv()
            .map_err(|_| ComputeError::OperationFailed("map channel closed".into()))?
            .map_err(|e| ComputeError::OperationFailed(format!("map failed: {e}")))?;

        let data = slice.get_mapped_range();
        let mut bytes = data.to_vec();
        drop(data);
        staging.unmap();

        bytes.truncate(mem.layout.size_bytes() as usize);
        Ok(bytes)
    }

    fn copy(&self, src: &dyn DeviceMemory, dst: &dyn DeviceMemory) -> ComputeResult<()> {
        let src = wgpu_memory(src)?;
        let dst = wgpu_memory(dst)?;
        if std::ptr::eq(src, dst) {
            return Ok(());
        }
        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_buffer_to_buffer(&src.buffer, 0, &dst.buffer, 0, src.buffer.size().min(dst.buffer.size()));
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn build(&self, id: &KernelId, program: &Program) -> ComputeResult<Arc<dyn CompiledKernel>> {
        let source = program.wgsl.as_deref().ok_or_else(|| ComputeError::KernelBuildFailed {
            kernel: id.to_string(),
            reason: format!("no WGSL source for device '{}'", self.name),
        })?;
        let label = id.to_string();

        let pipeline = self.scoped(
            wgpu::ErrorFilter::Validation,
            || {
                let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label.as_str()),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                });
                self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label.as_str()),
                    layout: None,
                    module: &module,
                    entry_point: Some(id.kernel.as_str()),
                    compilation_options: Default::default(),
                    cache: None,
                })
            },
            |reason| ComputeError::KernelBuildFailed {
                kernel: label.clone(),
                reason,
            },
        )?;

        Ok(Arc::new(WgpuKernel {
            id: id.clone(),
            signature: program.signature.clone(),
            pipeline,
        }))
    }

    fn dispatch(
        &self,
        kernel: &dyn CompiledKernel,
        args: &[DispatchArg<'_>],
        global: [usize; 3],
        blocking: bool,
    ) -> ComputeResult<()> {
        let fail = |reason: String| ComputeError::DispatchFailed {
            kernel: kernel.id().to_string(),
            reason,
        };
        let kernel = kernel
            .as_any()
            .downcast_ref::<WgpuKernel>()
            .ok_or_else(|| fail("kernel was not built by the wgpu backend".into()))?;

        let mut memories = Vec::new();
        let mut scalars = Vec::new();
        for arg in args {
            match arg {
                DispatchArg::Memory(m) => {
                    let mem = wgpu_memory(*m)?;
                    if mem.layout.element_type != ElementType::F32 {
                        return Err(fail(format!(
                            "wgpu kernels take f32 memory, got {}",
                            mem.layout.element_type
                        )));
                    }
                    memories.push(mem);
                }
                DispatchArg::Scalar(s) => scalars.push(s.as_f64()),
            }
        }
        let extents: Vec<[usize; 3]> = memories.iter().map(|m| m.layout.dims.padded()).collect();
        let params = shaders::pack_params(global, &extents, &scalars);

        let max_groups = self.device.limits().max_compute_workgroups_per_dimension as usize;
        let groups = [global[0].div_ceil(WORKGROUP_SIZE), global[1], global[2]];
        if groups.iter().any(|&g| g > max_groups) {
            return Err(fail(format!("dispatch {global:?} exceeds workgroup limit {max_groups}")));
        }

        let params_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("voxl_params"),
            contents: bytemuck::cast_slice(&params),
            usage: wgpu::BufferUsages::STORAGE,
        });

        self.scoped(
            wgpu::ErrorFilter::Validation,
            || {
                let mut entries: Vec<wgpu::BindGroupEntry<'_>> = memories
                    .iter()
                    .enumerate()
                    .map(|(i, m)| wgpu::BindGroupEntry {
                        binding: i as u32,
                        resource: m.buffer.as_entire_binding(),
                    })
                    .collect();
                entries.push(wgpu::BindGroupEntry {
                    binding: memories.len() as u32,
                    resource: params_buf.as_entire_binding(),
                });

                let layout = kernel.pipeline.get_bind_group_layout(0);
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("voxl_bind_group"),
                    layout: &layout,
                    entries: &entries,
                });

                let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("voxl_dispatch"),
                });
                {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("voxl_pass"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(&kernel.pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.dispatch_workgroups(groups[0] as u32, groups[1] as u32, groups[2] as u32);
                }
                self.queue.submit(std::iter::once(encoder.finish()));
            },
            fail,
        )?;

        trace!(kernel = %kernel.id, ?global, ?groups, "wgpu dispatch");
        if blocking {
            self.wait();
        }
        Ok(())
    }

    fn finish(&self) -> ComputeResult<()> {
        self.wait();
        Ok(())
    }

    fn close(&self) {
        self.wait();
        self.device.destroy();
        trace!(device = %self.name, "wgpu device destroyed");
    }
}
