//! Compute devices and the backends that provide them.
//!
//! # Architecture
//!
//! ```text
//! DeviceRegistry
//!     +-- HostBackend  (rayon, always available)
//!     +-- WgpuBackend  (Vulkan/Metal/DX12, feature "wgpu")
//!             |
//!             open(Device) -> Box<dyn DeviceQueue>
//!                                 +-- allocate / read / write / copy
//!                                 +-- build / dispatch / finish
//! ```
//!
//! Backends only need to report a name and a capability version per device;
//! everything above them is backend-agnostic.

mod host;
mod registry;

#[cfg(feature = "wgpu")]
mod wgpu_backend;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use voxl_core::{Dimensions, ElementType};

use crate::ComputeResult;
use crate::kernel::{KernelId, KernelSignature, Program, Scalar};

pub use host::{HostBackend, HostDeviceSpec, HostInvocation, HostKernelFn};
pub use registry::{DeviceRegistry, available_device_names, describe_devices};

#[cfg(feature = "wgpu")]
pub use wgpu_backend::WgpuBackend;

// =============================================================================
// Device description
// =============================================================================

/// Compute API capability level of a device, e.g. `1.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityVersion {
    pub major: u16,
    pub minor: u16,
}

impl CapabilityVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for CapabilityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for CapabilityVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (major, minor) = s.split_once('.').unwrap_or((s, "0"));
        let major = major.parse().map_err(|_| format!("bad version '{s}'"))?;
        let minor = minor.parse().map_err(|_| format!("bad version '{s}'"))?;
        Ok(Self { major, minor })
    }
}

/// Device category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// CPU or CPU-like (software) device.
    Cpu,
    /// GPU or other accelerator.
    Accelerator,
}

/// One enumerated compute device. Immutable once probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Display name.
    pub name: String,
    /// Capability version.
    pub version: CapabilityVersion,
    /// CPU-like vs accelerator.
    pub kind: DeviceKind,
    /// Whether image storage is available.
    pub image_support: bool,
    /// Largest single allocation in bytes.
    pub max_alloc_bytes: u64,
    /// Total device memory in bytes.
    pub global_memory_bytes: u64,
    /// Name of the backend that enumerated this device.
    pub backend: &'static str,
    /// Index within its backend.
    pub ordinal: usize,
}

impl Device {
    /// Whether this is a CPU-like device.
    pub fn is_cpu(&self) -> bool {
        self.kind == DeviceKind::Cpu
    }

    pub fn capability_version(&self) -> CapabilityVersion {
        self.version
    }

    pub fn supports_images(&self) -> bool {
        self.image_support
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, v{})", self.name, self.backend, self.version)
    }
}

// =============================================================================
// Memory description
// =============================================================================

/// Storage semantics of a device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Linear buffer.
    Buffer,
    /// Single-channel image/texture.
    Image,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buffer => "buffer",
            Self::Image => "image",
        })
    }
}

/// Kernel access mode of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

/// Shape, type and semantics of one device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryLayout {
    pub dims: Dimensions,
    pub element_type: ElementType,
    pub access: AccessMode,
    pub kind: MemoryKind,
}

impl MemoryLayout {
    /// Size in bytes, `None` if it does not fit in `u64`.
    pub fn checked_size_bytes(&self) -> Option<u64> {
        u64::try_from(self.dims.element_count())
            .ok()?
            .checked_mul(self.element_type.size_bytes() as u64)
    }

    /// Size in bytes, saturating at `u64::MAX`.
    ///
    /// Exact for every allocated layout; the allocator rejects layouts
    /// without a checked size.
    pub fn size_bytes(&self) -> u64 {
        self.checked_size_bytes().unwrap_or(u64::MAX)
    }

    /// Same dimensions and element type (kind and access may differ).
    pub fn is_equivalent(&self, other: &MemoryLayout) -> bool {
        self.dims == other.dims && self.element_type == other.element_type
    }
}

// =============================================================================
// Backend traits
// =============================================================================

/// Helper trait for downcasting.
pub trait AsAny: 'static {
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Backend-owned storage of one buffer or image.
pub trait DeviceMemory: Send + Sync + AsAny {
    /// Layout the memory was allocated with.
    fn layout(&self) -> &MemoryLayout;
}

/// Backend-compiled kernel, ready to dispatch.
pub trait CompiledKernel: Send + Sync + AsAny {
    /// Identity the kernel was built from.
    fn id(&self) -> &KernelId;

    /// Declared parameters in binding order.
    fn signature(&self) -> &KernelSignature;
}

/// One bound kernel argument, in declared order.
#[derive(Clone, Copy)]
pub enum DispatchArg<'a> {
    Memory(&'a dyn DeviceMemory),
    Scalar(Scalar),
}

/// Live queue on an opened device.
///
/// Everything a [`ComputeContext`](crate::ComputeContext) does on the device
/// goes through this trait. Implementations may assume the caller checked
/// that the context is still open.
pub trait DeviceQueue: Send + Sync {
    /// Allocate uninitialized (zeroed where cheap) memory.
    fn allocate(&self, layout: &MemoryLayout) -> ComputeResult<Box<dyn DeviceMemory>>;

    /// Upload `bytes` (exactly `layout.size_bytes()` long).
    fn write(&self, memory: &dyn DeviceMemory, bytes: &[u8]) -> ComputeResult<()>;

    /// Download the whole allocation.
    fn read(&self, memory: &dyn DeviceMemory) -> ComputeResult<Vec<u8>>;

    /// Device-side copy between two allocations of equal byte size.
    fn copy(&self, src: &dyn DeviceMemory, dst: &dyn DeviceMemory) -> ComputeResult<()>;

    /// Compile `program` for this device.
    fn build(&self, id: &KernelId, program: &Program) -> ComputeResult<Arc<dyn CompiledKernel>>;

    /// Run `kernel` over `global` with `args` in declared order.
    fn dispatch(
        &self,
        kernel: &dyn CompiledKernel,
        args: &[DispatchArg<'_>],
        global: [usize; 3],
        blocking: bool,
    ) -> ComputeResult<()>;

    /// Wait for all submitted work.
    fn finish(&self) -> ComputeResult<()>;

    /// Release the queue and device.
    fn close(&self);
}

/// Device enumeration backend.
pub trait DeviceBackend: Send + Sync {
    /// Backend name, stored in [`Device::backend`].
    fn name(&self) -> &'static str;

    /// Enumerate devices.
    fn probe(&self) -> ComputeResult<Vec<Device>>;

    /// Open a queue on one of the probed devices.
    fn open(&self, device: &Device) -> ComputeResult<Box<dyn DeviceQueue>>;
}
