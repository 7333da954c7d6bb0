//! Device context, memory and kernel dispatch for GPU image processing.
//!
//! Lets an imaging application offload pixel/voxel work to a compute device:
//! pick a device, own its context, allocate device-resident buffers and
//! images, run named kernels against named parameters and move data between
//! host arrays and device memory.
//!
//! # Architecture
//!
//! ```text
//! ContextManager (owns the one active context)
//!     └── DeviceRegistry ── DeviceBackend (host/rayon, wgpu)
//!             └── ComputeContext (device + queue)
//!                     ├── Buffer / Image       (memory.rs)
//!                     ├── EquivalenceCache     (buffer -> image mirror)
//!                     └── KernelExecutor       (get-or-build, bind, dispatch)
//! ConversionRegistry (HostArray <-> Buffer <-> Image)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use voxl_compute::{AccessMode, ContextManager, KernelExecutor, ops};
//! use voxl_core::{Dimensions, ElementType};
//!
//! let mut manager = ContextManager::detect();
//! let ctx = manager.get_or_create(None)?;
//! let dims = Dimensions::d2(512, 512)?;
//! let src = ctx.create_buffer(dims, ElementType::F32, AccessMode::ReadWrite)?;
//! let dst = ctx.create_buffer_like(&src)?;
//!
//! let mut exec = KernelExecutor::with_builtins();
//! ops::copy(&mut exec, &ctx, &src, &dst)?;
//! ```

pub mod config;
pub mod context;
pub mod convert;
pub mod device;
pub mod equivalence;
pub mod host_bridge;
pub mod kernel;
pub mod memory;
pub mod ops;
mod shaders;

pub use config::{ComputeConfig, ImageRouting};
pub use context::{ComputeContext, ContextManager, ContextState, OperationClass};
pub use convert::{ConversionRegistry, Converter, TypeTag, Value};
pub use device::{
    AccessMode, CapabilityVersion, Device, DeviceBackend, DeviceKind, DeviceRegistry,
    HostBackend, HostDeviceSpec, MemoryKind, MemoryLayout, available_device_names,
    describe_devices,
};
#[cfg(feature = "wgpu")]
pub use device::WgpuBackend;
pub use equivalence::EquivalenceCache;
pub use kernel::{
    KernelArg, KernelExecutor, KernelId, KernelSignature, ParamDecl, ParamKind,
    ParameterBinding, Program, ProgramLibrary, Scalar,
};
pub use memory::{AllocationStats, Buffer, Image, MemoryId};

use thiserror::Error;

/// Errors raised by the compute core.
///
/// Device selection and conversion failures go straight back to the caller.
/// Kernel build/dispatch failures are additionally recorded by the
/// [`KernelExecutor`] as a retrievable diagnostic.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("No compute device found")]
    NoDeviceFound,

    #[error("No device name contains '{0}'")]
    NoMatchingDevice(String),

    #[error("Allocation of {requested} bytes failed: {reason}")]
    AllocationFailed { requested: u64, reason: String },

    #[error("Failed to build kernel {kernel}: {reason}")]
    KernelBuildFailed { kernel: String, reason: String },

    #[error("Failed to dispatch kernel {kernel}: {reason}")]
    DispatchFailed { kernel: String, reason: String },

    #[error("No converter registered from {from} to {to}")]
    NoConverterRegistered { from: String, to: String },

    #[error("Device context is closed")]
    ContextClosed,

    #[error("Invalid parameters for kernel {kernel}: {reason}")]
    InvalidParameterBinding { kernel: String, reason: String },

    #[error("Layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Device operation failed: {0}")]
    OperationFailed(String),

    #[error(transparent)]
    Core(#[from] voxl_core::Error),
}

pub type ComputeResult<T> = Result<T, ComputeError>;
