//! Device-resident buffers and images, and the allocator that creates them.
//!
//! Both handle types own their device memory exclusively. Releasing is
//! explicit via `close(self)` (or implicit on drop), so a handle can only be
//! released once. Using a handle after its context was closed or switched
//! away fails with [`ComputeError::ContextClosed`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;
use voxl_core::{Dimensions, ElementType, HostArray};

use crate::context::{ComputeContext, ContextShared};
use crate::device::{AccessMode, DeviceMemory, MemoryKind, MemoryLayout};
use crate::{ComputeError, ComputeResult};

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a buffer or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryId(u64);

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Allocation statistics
// =============================================================================

/// Snapshot of a context's allocation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationStats {
    pub buffers_allocated: u64,
    pub images_allocated: u64,
    pub released: u64,
    pub live_bytes: u64,
}

impl AllocationStats {
    /// Allocations not yet released.
    pub fn live(&self) -> u64 {
        self.buffers_allocated + self.images_allocated - self.released
    }
}

#[derive(Default)]
pub(crate) struct AllocationCounters {
    buffers: AtomicU64,
    images: AtomicU64,
    released: AtomicU64,
    live_bytes: AtomicU64,
}

impl AllocationCounters {
    fn allocated(&self, layout: &MemoryLayout) {
        match layout.kind {
            MemoryKind::Buffer => self.buffers.fetch_add(1, Ordering::Relaxed),
            MemoryKind::Image => self.images.fetch_add(1, Ordering::Relaxed),
        };
        self.live_bytes.fetch_add(layout.size_bytes(), Ordering::Relaxed);
    }

    fn released(&self, layout: &MemoryLayout) {
        self.released.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(layout.size_bytes(), Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> AllocationStats {
        AllocationStats {
            buffers_allocated: self.buffers.load(Ordering::Relaxed),
            images_allocated: self.images.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Shared memory object
// =============================================================================

/// Callback run with the memory id when an allocation is released.
pub(crate) type ReleaseHook = Box<dyn FnOnce(MemoryId) + Send>;

/// Allocation plus the context it was made in.
pub(crate) struct MemoryObject {
    id: MemoryId,
    layout: MemoryLayout,
    storage: Box<dyn DeviceMemory>,
    context: Arc<ContextShared>,
    /// Channels and frames of the host array last written, reapplied on read.
    structure: Mutex<(usize, usize)>,
    release_hooks: Mutex<Vec<ReleaseHook>>,
}

impl MemoryObject {
    pub(crate) fn id(&self) -> MemoryId {
        self.id
    }

    pub(crate) fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub(crate) fn storage(&self) -> &dyn DeviceMemory {
        &*self.storage
    }

    pub(crate) fn context_id(&self) -> u64 {
        self.context.id()
    }

    pub(crate) fn ensure_open(&self) -> ComputeResult<()> {
        self.context.ensure_open()
    }

    /// Run `hook` when this allocation is released (close or drop).
    pub(crate) fn on_release(&self, hook: ReleaseHook) {
        self.release_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    fn structure(&self) -> (usize, usize) {
        *self.structure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_structure(&self, structure: (usize, usize)) {
        *self.structure.lock().unwrap_or_else(PoisonError::into_inner) = structure;
    }

    fn read_bytes(&self) -> ComputeResult<Vec<u8>> {
        self.context.queue()?.read(self.storage())
    }

    fn write_bytes(&self, bytes: &[u8]) -> ComputeResult<()> {
        if bytes.len() as u64 != self.layout.size_bytes() {
            return Err(ComputeError::LayoutMismatch(format!(
                "{} {} holds {} bytes, got {}",
                self.layout.kind,
                self.id,
                self.layout.size_bytes(),
                bytes.len()
            )));
        }
        self.context.queue()?.write(self.storage(), bytes)
    }

    fn write_host(&self, array: &HostArray) -> ComputeResult<()> {
        if array.dims() != self.layout.dims || array.element_type() != self.layout.element_type {
            return Err(ComputeError::LayoutMismatch(format!(
                "host array {} {} does not match {} {} {}",
                array.dims(),
                array.element_type(),
                self.layout.kind,
                self.layout.dims,
                self.layout.element_type
            )));
        }
        self.write_bytes(array.as_bytes())?;
        self.set_structure((array.channels(), array.frames()));
        Ok(())
    }

    fn read_host(&self) -> ComputeResult<HostArray> {
        let bytes = self.read_bytes()?;
        let (channels, frames) = self.structure();
        let array = HostArray::from_bytes(self.layout.dims, self.layout.element_type, &bytes)?;
        Ok(array.with_structure(channels, frames)?)
    }
}

impl Drop for MemoryObject {
    fn drop(&mut self) {
        let hooks = std::mem::take(self.release_hooks.get_mut().unwrap_or_else(PoisonError::into_inner));
        for hook in hooks {
            hook(self.id);
        }
        self.context.counters().released(&self.layout);
        trace!(id = %self.id, kind = %self.layout.kind, bytes = self.layout.size_bytes(), "released");
    }
}

// =============================================================================
// Buffer / Image
// =============================================================================

macro_rules! memory_handle {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        pub struct $name {
            obj: MemoryObject,
        }

        impl $name {
            pub(crate) fn object(&self) -> &MemoryObject {
                &self.obj
            }

            /// Identity, stable for the lifetime of the handle.
            pub fn id(&self) -> MemoryId {
                self.obj.id
            }

            pub fn layout(&self) -> &MemoryLayout {
                &self.obj.layout
            }

            pub fn dims(&self) -> Dimensions {
                self.obj.layout.dims
            }

            pub fn element_type(&self) -> ElementType {
                self.obj.layout.element_type
            }

            pub fn access(&self) -> AccessMode {
                self.obj.layout.access
            }

            pub fn width(&self) -> usize {
                self.obj.layout.dims.width()
            }

            pub fn height(&self) -> usize {
                self.obj.layout.dims.height()
            }

            pub fn depth(&self) -> usize {
                self.obj.layout.dims.depth()
            }

            pub fn size_bytes(&self) -> u64 {
                self.obj.layout.size_bytes()
            }

            /// Whether the owning context is still open.
            pub fn is_usable(&self) -> bool {
                self.obj.ensure_open().is_ok()
            }

            /// Upload raw native-order bytes.
            pub fn write_bytes(&self, bytes: &[u8]) -> ComputeResult<()> {
                self.obj.write_bytes(bytes)
            }

            /// Download raw native-order bytes.
            pub fn read_bytes(&self) -> ComputeResult<Vec<u8>> {
                self.obj.read_bytes()
            }

            /// Upload a host array with identical dimensions and element type.
            ///
            /// Its channel and frame counts are kept and restored by
            /// [`read_host`](Self::read_host).
            pub fn write_host(&self, array: &HostArray) -> ComputeResult<()> {
                self.obj.write_host(array)
            }

            /// Download into a new host array.
            pub fn read_host(&self) -> ComputeResult<HostArray> {
                self.obj.read_host()
            }

            /// Release the device memory.
            pub fn close(self) {
                drop(self);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("id", &self.obj.id)
                    .field("dims", &self.obj.layout.dims)
                    .field("element_type", &self.obj.layout.element_type)
                    .field("access", &self.obj.layout.access)
                    .finish()
            }
        }
    };
}

memory_handle!(Buffer, "Linear, typed, 1-3D device allocation.");
memory_handle!(
    Image,
    "Single-channel device allocation with image semantics, required by some kernels."
);

// =============================================================================
// Allocator
// =============================================================================

impl ComputeContext {
    fn allocate(&self, layout: MemoryLayout) -> ComputeResult<MemoryObject> {
        let queue = self.shared().queue()?;
        let device = self.device();
        let requested = layout.checked_size_bytes().ok_or_else(|| ComputeError::AllocationFailed {
            requested: u64::MAX,
            reason: format!("size of {} {} elements overflows", layout.dims, layout.element_type),
        })?;

        if layout.kind == MemoryKind::Image && !device.image_support {
            return Err(ComputeError::AllocationFailed {
                requested,
                reason: format!("device '{}' has no image support", device.name),
            });
        }
        let limit = match self.config().max_alloc_bytes {
            Some(cap) => cap.min(device.max_alloc_bytes),
            None => device.max_alloc_bytes,
        };
        if requested > limit {
            return Err(ComputeError::AllocationFailed {
                requested,
                reason: format!("exceeds single allocation limit of {limit} bytes"),
            });
        }

        let storage = queue.allocate(&layout)?;
        let id = MemoryId(NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed));
        self.shared().counters().allocated(&layout);
        trace!(%id, kind = %layout.kind, dims = %layout.dims, ty = %layout.element_type, "allocated");

        Ok(MemoryObject {
            id,
            layout,
            storage,
            context: self.shared().clone(),
            structure: Mutex::new((1, 1)),
            release_hooks: Mutex::new(Vec::new()),
        })
    }

    /// Allocate a zero-initialized buffer.
    pub fn create_buffer(&self, dims: Dimensions, element_type: ElementType, access: AccessMode) -> ComputeResult<Buffer> {
        let obj = self.allocate(MemoryLayout {
            dims,
            element_type,
            access,
            kind: MemoryKind::Buffer,
        })?;
        Ok(Buffer { obj })
    }

    /// Allocate a single-channel read/write image.
    pub fn create_image(&self, dims: Dimensions, element_type: ElementType) -> ComputeResult<Image> {
        let obj = self.allocate(MemoryLayout {
            dims,
            element_type,
            access: AccessMode::ReadWrite,
            kind: MemoryKind::Image,
        })?;
        Ok(Image { obj })
    }

    /// Buffer with the same dimensions, element type and access as `other`.
    pub fn create_buffer_like(&self, other: &Buffer) -> ComputeResult<Buffer> {
        self.create_buffer(other.dims(), other.element_type(), other.access())
    }

    /// Image with the same dimensions and element type as `other`.
    pub fn create_image_like(&self, other: &Image) -> ComputeResult<Image> {
        self.create_image(other.dims(), other.element_type())
    }

    /// Image equivalent to `buffer` (same dimensions and element type).
    pub fn create_image_for(&self, buffer: &Buffer) -> ComputeResult<Image> {
        self.create_image(buffer.dims(), buffer.element_type())
    }

    /// Buffer equivalent to `image`.
    pub fn create_buffer_for(&self, image: &Image) -> ComputeResult<Buffer> {
        self.create_buffer(image.dims(), image.element_type(), AccessMode::ReadWrite)
    }

    /// Allocate a buffer and upload `array` into it.
    pub fn upload_buffer(&self, array: &HostArray) -> ComputeResult<Buffer> {
        let buffer = self.create_buffer(array.dims(), array.element_type(), AccessMode::ReadWrite)?;
        buffer.write_host(array)?;
        Ok(buffer)
    }

    /// Allocate an image and upload `array` into it.
    pub fn upload_image(&self, array: &HostArray) -> ComputeResult<Image> {
        let image = self.create_image(array.dims(), array.element_type())?;
        image.write_host(array)?;
        Ok(image)
    }

    fn copy_objects(&self, src: &MemoryObject, dst: &MemoryObject) -> ComputeResult<()> {
        self.check_owned(src)?;
        self.check_owned(dst)?;
        if !src.layout.is_equivalent(&dst.layout) {
            return Err(ComputeError::LayoutMismatch(format!(
                "cannot copy {} {} {} into {} {} {}",
                src.layout.kind,
                src.layout.dims,
                src.layout.element_type,
                dst.layout.kind,
                dst.layout.dims,
                dst.layout.element_type
            )));
        }
        trace!(src = %src.id, dst = %dst.id, "device copy");
        self.shared().queue()?.copy(src.storage(), dst.storage())?;
        dst.set_structure(src.structure());
        Ok(())
    }

    /// Device-side copy from a buffer into an equivalent image.
    pub fn copy_buffer_to_image(&self, buffer: &Buffer, image: &Image) -> ComputeResult<()> {
        self.copy_objects(&buffer.obj, &image.obj)
    }

    /// Device-side copy from an image into an equivalent buffer.
    pub fn copy_image_to_buffer(&self, image: &Image, buffer: &Buffer) -> ComputeResult<()> {
        self.copy_objects(&image.obj, &buffer.obj)
    }

    /// Device-side copy between equivalent buffers.
    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer) -> ComputeResult<()> {
        self.copy_objects(&src.obj, &dst.obj)
    }

    /// Fails unless `obj` was allocated in this (open) context.
    pub(crate) fn check_owned(&self, obj: &MemoryObject) -> ComputeResult<()> {
        obj.ensure_open()?;
        if obj.context_id() != self.id() {
            return Err(ComputeError::OperationFailed(format!(
                "{} {} belongs to another context",
                obj.layout.kind, obj.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextManager;

    fn dims(w: usize, h: usize, d: usize) -> Dimensions {
        Dimensions::d3(w, h, d).unwrap()
    }

    #[test]
    fn test_create_like_copies_shape_and_type() {
        let mut manager = ContextManager::host();
        let ctx = manager.get_or_create(None).unwrap();
        for t in ElementType::ALL {
            for d in [Dimensions::new(&[7]).unwrap(), dims(3, 2, 1), dims(4, 5, 6)] {
                let a = ctx.create_buffer(d, t, AccessMode::ReadOnly).unwrap();
                let b = ctx.create_buffer_like(&a).unwrap();
                assert_eq!(b.dims(), a.dims());
                assert_eq!(b.element_type(), a.element_type());
                assert_eq!(b.access(), AccessMode::ReadOnly);
                assert_ne!(a.id(), b.id());

                let i = ctx.create_image(d, t).unwrap();
                let j = ctx.create_image_like(&i).unwrap();
                assert_eq!(j.dims(), i.dims());
                assert_eq!(j.element_type(), i.element_type());
            }
        }
    }

    #[test]
    fn test_release_updates_stats() {
        let mut manager = ContextManager::host();
        let ctx = manager.get_or_create(None).unwrap();
        let a = ctx.create_buffer(dims(2, 2, 1), ElementType::F32, AccessMode::ReadWrite).unwrap();
        let b = ctx.create_image(dims(2, 2, 1), ElementType::F32).unwrap();
        let stats = ctx.stats();
        assert_eq!(stats.buffers_allocated, 1);
        assert_eq!(stats.images_allocated, 1);
        assert_eq!(stats.live_bytes, 32);

        a.close();
        b.close();
        let stats = ctx.stats();
        assert_eq!(stats.released, 2);
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.live_bytes, 0);
    }

    #[test]
    fn test_allocation_over_limit_fails() {
        use crate::ComputeConfig;
        let mut manager = ContextManager::new(
            crate::DeviceRegistry::with_backend(crate::HostBackend::new()),
            ComputeConfig::default().with_max_alloc_bytes(1024),
        );
        let ctx = manager.get_or_create(None).unwrap();
        let err = ctx
            .create_buffer(dims(1024, 1, 1), ElementType::U16, AccessMode::ReadWrite)
            .unwrap_err();
        assert!(matches!(err, ComputeError::AllocationFailed { requested: 2048, .. }));
        assert_eq!(ctx.stats().buffers_allocated, 0);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_allocation_size_overflow_fails() {
        let mut manager = ContextManager::host();
        let ctx = manager.get_or_create(None).unwrap();
        // 2^62 elements fit in usize, 2^64 bytes do not fit in u64
        let huge = dims(1 << 22, 1 << 22, 1 << 18);
        let err = ctx
            .create_buffer(huge, ElementType::U32, AccessMode::ReadWrite)
            .unwrap_err();
        assert!(matches!(err, ComputeError::AllocationFailed { requested: u64::MAX, .. }));
        assert!(matches!(
            ctx.create_image(huge, ElementType::F32),
            Err(ComputeError::AllocationFailed { .. })
        ));

        // Fits in u64 but far above any device limit
        let large = dims(1 << 22, 1 << 22, 1 << 10);
        assert!(matches!(
            ctx.create_buffer(large, ElementType::U8, AccessMode::ReadWrite),
            Err(ComputeError::AllocationFailed { .. })
        ));
        assert_eq!(ctx.stats().buffers_allocated, 0);
        assert_eq!(ctx.stats().images_allocated, 0);
    }

    #[test]
    fn test_host_roundtrip_and_mismatch() {
        let mut manager = ContextManager::host();
        let ctx = manager.get_or_create(None).unwrap();
        let arr = HostArray::from_vec(vec![1i32, -2, 3, -4], Dimensions::d2(2, 2).unwrap()).unwrap();
        let buf = ctx.upload_buffer(&arr).unwrap();
        assert_eq!(buf.read_host().unwrap(), arr);

        let other = HostArray::from_vec(vec![1u8, 2, 3, 4], Dimensions::d2(2, 2).unwrap()).unwrap();
        assert!(matches!(buf.write_host(&other), Err(ComputeError::LayoutMismatch(_))));
    }

    #[test]
    fn test_structure_survives_device_copies() {
        let mut manager = ContextManager::host();
        let ctx = manager.get_or_create(None).unwrap();
        let data: Vec<u16> = (0..24).collect();
        let arr = HostArray::from_vec(data, dims(2, 2, 6)).unwrap().with_structure(3, 2).unwrap();

        let buf = ctx.upload_buffer(&arr).unwrap();
        let img = ctx.create_image_for(&buf).unwrap();
        ctx.copy_buffer_to_image(&buf, &img).unwrap();
        let back = img.read_host().unwrap();
        assert_eq!((back.channels(), back.frames()), (3, 2));
        assert_eq!(back, arr);

        // Fresh allocations read back as a single channel and frame
        let fresh = ctx.create_buffer_like(&buf).unwrap();
        let plain = fresh.read_host().unwrap();
        assert_eq!((plain.channels(), plain.frames()), (1, 1));
    }

    #[test]
    fn test_copy_requires_equivalent_layout() {
        let mut manager = ContextManager::host();
        let ctx = manager.get_or_create(None).unwrap();
        let buf = ctx.create_buffer(dims(2, 2, 1), ElementType::U8, AccessMode::ReadWrite).unwrap();
        buf.write_bytes(&[1, 2, 3, 4]).unwrap();

        let img = ctx.create_image_for(&buf).unwrap();
        ctx.copy_buffer_to_image(&buf, &img).unwrap();
        assert_eq!(img.read_bytes().unwrap(), vec![1, 2, 3, 4]);

        let wrong = ctx.create_image(dims(4, 1, 1), ElementType::U8).unwrap();
        assert!(matches!(
            ctx.copy_buffer_to_image(&buf, &wrong),
            Err(ComputeError::LayoutMismatch(_))
        ));
    }
}
