//! Host backend: runs kernels on the CPU with rayon.
//!
//! Memory lives in RAM, kernels are plain Rust functions registered in the
//! [`ProgramLibrary`](crate::ProgramLibrary). Dispatch is always synchronous,
//! so the `blocking` flag has no effect here.

use std::sync::{Arc, RwLock};

use rayon::prelude::*;
use tracing::trace;

use super::{
    AsAny, CapabilityVersion, CompiledKernel, Device, DeviceBackend, DeviceKind, DeviceMemory,
    DeviceQueue, DispatchArg, MemoryLayout,
};
use crate::kernel::{KernelId, KernelSignature, Program, Scalar};
use crate::{ComputeError, ComputeResult};

/// Native kernel body run by the host backend.
pub type HostKernelFn = fn(&HostInvocation<'_>) -> ComputeResult<()>;

/// Fallback when system memory cannot be detected.
const FALLBACK_MEMORY: u64 = 8 * 1024 * 1024 * 1024;

// =============================================================================
// Devices
// =============================================================================

/// Description of one virtual host device.
#[derive(Debug, Clone)]
pub struct HostDeviceSpec {
    pub name: String,
    pub version: CapabilityVersion,
    pub kind: DeviceKind,
    pub image_support: bool,
    /// Overrides the default single-allocation limit (a quarter of RAM).
    pub max_alloc_bytes: Option<u64>,
}

impl HostDeviceSpec {
    pub fn new(name: impl Into<String>, version: CapabilityVersion, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            version,
            kind,
            image_support: true,
            max_alloc_bytes: None,
        }
    }

    /// Device without image storage.
    pub fn without_images(mut self) -> Self {
        self.image_support = false;
        self
    }

    /// Limit single allocations to `bytes`.
    pub fn with_max_alloc(mut self, bytes: u64) -> Self {
        self.max_alloc_bytes = Some(bytes);
        self
    }
}

/// CPU backend. By default exposes a single CPU device; tests and tools can
/// describe several virtual devices to exercise selection and switching.
pub struct HostBackend {
    specs: Vec<HostDeviceSpec>,
    memory: u64,
}

impl HostBackend {
    pub const NAME: &'static str = "host";

    /// Single host CPU device.
    pub fn new() -> Self {
        let threads = rayon::current_num_threads();
        Self::with_devices(vec![HostDeviceSpec::new(
            format!("Host CPU ({threads} threads)"),
            CapabilityVersion::new(1, 2),
            DeviceKind::Cpu,
        )])
    }

    /// Custom set of virtual devices.
    pub fn with_devices(specs: Vec<HostDeviceSpec>) -> Self {
        let memory = sys_info::mem_info()
            .map(|m| m.total * 1024) // KB to bytes
            .unwrap_or(FALLBACK_MEMORY);
        Self { specs, memory }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for HostBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn probe(&self) -> ComputeResult<Vec<Device>> {
        Ok(self
            .specs
            .iter()
            .enumerate()
            .map(|(ordinal, spec)| Device {
                name: spec.name.clone(),
                version: spec.version,
                kind: spec.kind,
                image_support: spec.image_support,
                max_alloc_bytes: spec.max_alloc_bytes.unwrap_or(self.memory / 4),
                global_memory_bytes: self.memory,
                backend: Self::NAME,
                ordinal,
            })
            .collect())
    }

    fn open(&self, device: &Device) -> ComputeResult<Box<dyn DeviceQueue>> {
        match self.specs.get(device.ordinal) {
            Some(spec) if spec.name == device.name => Ok(Box::new(HostQueue {
                device: device.name.clone(),
            })),
            _ => Err(ComputeError::OperationFailed(format!(
                "host device '{}' is not provided by this backend",
                device.name
            ))),
        }
    }
}

// =============================================================================
// Memory
// =============================================================================

/// RAM-backed allocation.
pub(crate) struct HostMemory {
    layout: MemoryLayout,
    data: RwLock<Vec<u8>>,
}

impl HostMemory {
    fn bytes(&self) -> ComputeResult<Vec<u8>> {
        self.data
            .read()
            .map(|d| d.clone())
            .map_err(|_| ComputeError::OperationFailed("host memory lock poisoned".into()))
    }

    fn store(&self, bytes: &[u8]) -> ComputeResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|_| ComputeError::OperationFailed("host memory lock poisoned".into()))?;
        if data.len() != bytes.len() {
            return Err(ComputeError::LayoutMismatch(format!(
                "expected {} bytes, got {}",
                data.len(),
                bytes.len()
            )));
        }
        data.copy_from_slice(bytes);
        Ok(())
    }
}

impl AsAny for HostMemory {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl DeviceMemory for HostMemory {
    fn layout(&self) -> &MemoryLayout {
        &self.layout
    }
}

fn host_memory(memory: &dyn DeviceMemory) -> ComputeResult<&HostMemory> {
    memory
        .as_any()
        .downcast_ref::<HostMemory>()
        .ok_or_else(|| ComputeError::OperationFailed("memory does not belong to the host backend".into()))
}

// =============================================================================
// Kernels
// =============================================================================

struct HostKernel {
    id: KernelId,
    signature: KernelSignature,
    body: HostKernelFn,
}

impl AsAny for HostKernel {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl CompiledKernel for HostKernel {
    fn id(&self) -> &KernelId {
        &self.id
    }

    fn signature(&self) -> &KernelSignature {
        &self.signature
    }
}

/// Arguments of one host kernel run, addressed by parameter name.
pub struct HostInvocation<'a> {
    kernel: &'a KernelId,
    signature: &'a KernelSignature,
    args: &'a [DispatchArg<'a>],
    global: [usize; 3],
}

impl<'a> HostInvocation<'a> {
    /// Dispatch geometry.
    pub fn global_size(&self) -> [usize; 3] {
        self.global
    }

    /// Kernel being run.
    pub fn kernel(&self) -> &KernelId {
        self.kernel
    }

    fn fail(&self, reason: impl Into<String>) -> ComputeError {
        ComputeError::DispatchFailed {
            kernel: self.kernel.to_string(),
            reason: reason.into(),
        }
    }

    fn arg(&self, name: &str) -> ComputeResult<&DispatchArg<'a>> {
        self.signature
            .position(name)
            .and_then(|i| self.args.get(i))
            .ok_or_else(|| self.fail(format!("no argument '{name}'")))
    }

    fn memory(&self, name: &str) -> ComputeResult<&HostMemory> {
        match self.arg(name)? {
            DispatchArg::Memory(m) => host_memory(*m),
            DispatchArg::Scalar(_) => Err(self.fail(format!("'{name}' is a scalar"))),
        }
    }

    /// Layout of a memory argument.
    pub fn layout(&self, name: &str) -> ComputeResult<MemoryLayout> {
        Ok(self.memory(name)?.layout)
    }

    /// Scalar argument.
    pub fn scalar(&self, name: &str) -> ComputeResult<Scalar> {
        match self.arg(name)? {
            DispatchArg::Scalar(s) => Ok(*s),
            DispatchArg::Memory(_) => Err(self.fail(format!("'{name}' is not a scalar"))),
        }
    }

    /// Scalar argument as `f64`.
    pub fn float(&self, name: &str) -> ComputeResult<f64> {
        Ok(self.scalar(name)?.as_f64())
    }

    /// Snapshot of a memory argument's raw bytes.
    pub fn read_bytes(&self, name: &str) -> ComputeResult<Vec<u8>> {
        self.memory(name)?.bytes()
    }

    /// Overwrite a memory argument's raw bytes.
    pub fn write_bytes(&self, name: &str, bytes: &[u8]) -> ComputeResult<()> {
        self.memory(name)?.store(bytes)
    }

    /// Snapshot of a memory argument widened to `f64`.
    pub fn read_f64(&self, name: &str) -> ComputeResult<Vec<f64>> {
        let mem = self.memory(name)?;
        let t = mem.layout.element_type;
        let bytes = mem.bytes()?;
        Ok(bytes
            .par_chunks_exact(t.size_bytes())
            .map(|b| t.decode(b))
            .collect())
    }

    /// Overwrite a memory argument from `f64` values, converting to its
    /// element type (integers round and saturate).
    pub fn write_f64(&self, name: &str, values: &[f64]) -> ComputeResult<()> {
        let mem = self.memory(name)?;
        let t = mem.layout.element_type;
        let count = mem.layout.dims.element_count();
        if values.len() != count {
            return Err(self.fail(format!(
                "'{name}' holds {count} elements, kernel produced {}",
                values.len()
            )));
        }
        let mut bytes = vec![0u8; count * t.size_bytes()];
        bytes
            .par_chunks_exact_mut(t.size_bytes())
            .zip(values.par_iter())
            .for_each(|(out, v)| t.encode(*v, out));
        mem.store(&bytes)
    }
}

// =============================================================================
// Queue
// =============================================================================

struct HostQueue {
    device: String,
}

impl DeviceQueue for HostQueue {
    fn allocate(&self, layout: &MemoryLayout) -> ComputeResult<Box<dyn DeviceMemory>> {
        let size = usize::try_from(layout.size_bytes()).map_err(|_| ComputeError::AllocationFailed {
            requested: layout.size_bytes(),
            reason: "exceeds host address space".into(),
        })?;
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| ComputeError::AllocationFailed {
                requested: layout.size_bytes(),
                reason: e.to_string(),
            })?;
        data.resize(size, 0);
        Ok(Box::new(HostMemory {
            layout: *layout,
            data: RwLock::new(data),
        }))
    }

    fn write(&self, memory: &dyn DeviceMemory, bytes: &[u8]) -> ComputeResult<()> {
        host_memory(memory)?.store(bytes)
    }

    fn read(&self, memory: &dyn DeviceMemory) -> ComputeResult<Vec<u8>> {
        host_memory(memory)?.bytes()
    }

    fn copy(&self, src: &dyn DeviceMemory, dst: &dyn DeviceMemory) -> ComputeResult<()> {
        let src = host_memory(src)?;
        let dst = host_memory(dst)?;
        if std::ptr::eq(src, dst) {
            return Ok(());
        }
        let bytes = src.bytes()?;
        dst.store(&bytes)
    }

    fn build(&self, id: &KernelId, program: &Program) -> ComputeResult<Arc<dyn CompiledKernel>> {
        let body = program.host.ok_or_else(|| ComputeError::KernelBuildFailed {
            kernel: id.to_string(),
            reason: format!("no host implementation for device '{}'", self.device),
        })?;
        Ok(Arc::new(HostKernel {
            id: id.clone(),
            signature: program.signature.clone(),
            body,
        }))
    }

    fn dispatch(
        &self,
        kernel: &dyn CompiledKernel,
        args: &[DispatchArg<'_>],
        global: [usize; 3],
        _blocking: bool,
    ) -> ComputeResult<()> {
        let kernel = kernel
            .as_any()
            .downcast_ref::<HostKernel>()
            .ok_or_else(|| ComputeError::DispatchFailed {
                kernel: kernel.id().to_string(),
                reason: "kernel was not built by the host backend".into(),
            })?;
        trace!(kernel = %kernel.id, ?global, "host dispatch");
        let invocation = HostInvocation {
            kernel: &kernel.id,
            signature: &kernel.signature,
            args,
            global,
        };
        (kernel.body)(&invocation).map_err(|e| match e {
            ComputeError::DispatchFailed { .. } => e,
            other => ComputeError::DispatchFailed {
                kernel: kernel.id.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn finish(&self) -> ComputeResult<()> {
        Ok(())
    }

    fn close(&self) {
        trace!(device = %self.device, "host queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AccessMode, MemoryKind};
    use voxl_core::{Dimensions, ElementType};

    fn layout(w: usize, h: usize) -> MemoryLayout {
        MemoryLayout {
            dims: Dimensions::d2(w, h).unwrap(),
            element_type: ElementType::U16,
            access: AccessMode::ReadWrite,
            kind: MemoryKind::Buffer,
        }
    }

    #[test]
    fn test_default_device_listed() {
        let backend = HostBackend::new();
        let devices = backend.probe().unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].is_cpu());
        assert_eq!(devices[0].backend, "host");
        assert!(devices[0].max_alloc_bytes > 0);
    }

    #[test]
    fn test_open_rejects_foreign_device() {
        let backend = HostBackend::new();
        let mut device = backend.probe().unwrap().remove(0);
        device.name = "Somebody else's GPU".into();
        assert!(backend.open(&device).is_err());
    }

    #[test]
    fn test_queue_write_read_copy() {
        let backend = HostBackend::new();
        let device = backend.probe().unwrap().remove(0);
        let queue = backend.open(&device).unwrap();

        let a = queue.allocate(&layout(2, 2)).unwrap();
        let b = queue.allocate(&layout(2, 2)).unwrap();
        assert_eq!(queue.read(&*b).unwrap(), vec![0u8; 8]);

        let bytes: Vec<u8> = (0..8).collect();
        queue.write(&*a, &bytes).unwrap();
        queue.copy(&*a, &*b).unwrap();
        assert_eq!(queue.read(&*b).unwrap(), bytes);

        assert!(queue.write(&*a, &[1, 2, 3]).is_err());
    }
}
