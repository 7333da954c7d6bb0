//! Buffer to image mirroring.
//!
//! Some kernels only behave correctly on image storage. The cache lets an
//! operation ask for "the image view of this buffer" without the caller ever
//! seeing the image: the first request allocates an equivalent [`Image`],
//! later requests for the same buffer return it again.
//!
//! The cache never synchronizes contents on its own. Callers copy explicitly
//! with [`copy_buffer_to_image`](EquivalenceCache::copy_buffer_to_image) and
//! [`copy_image_to_buffer`](EquivalenceCache::copy_image_to_buffer).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::ComputeResult;
use crate::context::ComputeContext;
use crate::memory::{Buffer, Image, MemoryId};

type Mirrors = Mutex<HashMap<MemoryId, Arc<Image>>>;

fn lock(mirrors: &Mirrors) -> MutexGuard<'_, HashMap<MemoryId, Arc<Image>>> {
    mirrors.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lazily created image mirrors keyed by buffer identity.
///
/// Entries follow their buffer: releasing the buffer by any path
/// (`close`, drop or [`release`](Self::release)) removes its mirror, and the
/// image is freed once no caller still holds it.
#[derive(Debug, Default)]
pub struct EquivalenceCache {
    entries: Arc<Mirrors>,
    allocations: u64,
    hits: u64,
}

impl EquivalenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image mirroring `buffer`, allocated on first request.
    pub fn image_view_of(&mut self, ctx: &ComputeContext, buffer: &Buffer) -> ComputeResult<Arc<Image>> {
        ctx.check_owned(buffer.object())?;
        let existing = lock(&self.entries).get(&buffer.id()).cloned();
        if let Some(image) = existing {
            self.hits += 1;
            trace!(buffer = %buffer.id(), image = %image.id(), "image view hit");
            return Ok(image);
        }

        let image = Arc::new(ctx.create_image_for(buffer)?);
        self.allocations += 1;
        trace!(buffer = %buffer.id(), image = %image.id(), "image view miss");

        let mirrors = Arc::downgrade(&self.entries);
        buffer.object().on_release(Box::new(move |id| {
            if let Some(mirrors) = mirrors.upgrade() {
                let removed = lock(&mirrors).remove(&id);
                if let Some(image) = removed {
                    trace!(buffer = %id, image = %image.id(), "image view dropped with buffer");
                }
            }
        }));
        lock(&self.entries).insert(buffer.id(), Arc::clone(&image));
        Ok(image)
    }

    /// Mirror of `buffer` if one was created.
    pub fn cached(&self, buffer: &Buffer) -> Option<Arc<Image>> {
        lock(&self.entries).get(&buffer.id()).cloned()
    }

    /// Explicit device-side copy from the buffer into its mirror.
    pub fn copy_buffer_to_image(&self, ctx: &ComputeContext, buffer: &Buffer, image: &Image) -> ComputeResult<()> {
        ctx.copy_buffer_to_image(buffer, image)
    }

    /// Explicit device-side copy from a mirror back into its buffer.
    pub fn copy_image_to_buffer(&self, ctx: &ComputeContext, image: &Image, buffer: &Buffer) -> ComputeResult<()> {
        ctx.copy_image_to_buffer(image, buffer)
    }

    /// Drop the mirror of `buffer`. Returns whether one existed.
    pub fn invalidate(&mut self, buffer: &Buffer) -> bool {
        let removed = lock(&self.entries).remove(&buffer.id());
        match removed {
            Some(image) => {
                trace!(buffer = %buffer.id(), image = %image.id(), "image view invalidated");
                true
            }
            None => false,
        }
    }

    /// Release `buffer` together with its mirror.
    pub fn release(&mut self, buffer: Buffer) {
        self.invalidate(&buffer);
        buffer.close();
    }

    /// Drop mirrors whose context is no longer open.
    pub fn purge_closed(&mut self) -> usize {
        let stale: Vec<Arc<Image>> = {
            let mut entries = lock(&self.entries);
            let ids: Vec<MemoryId> = entries
                .iter()
                .filter(|(_, image)| !image.is_usable())
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };
        stale.len()
    }

    /// Images allocated by this cache so far.
    pub fn allocation_count(&self) -> u64 {
        self.allocations
    }

    pub fn hit_count(&self) -> u64 {
        self.hits
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Release every mirror.
    pub fn clear(&mut self) {
        let drained = std::mem::take(&mut *lock(&self.entries));
        drop(drained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AccessMode;
    use crate::{ComputeError, ContextManager};
    use voxl_core::{Dimensions, ElementType};

    fn buffer(ctx: &ComputeContext) -> Buffer {
        ctx.create_buffer(Dimensions::d3(2, 2, 1).unwrap(), ElementType::F32, AccessMode::ReadWrite)
            .unwrap()
    }

    #[test]
    fn test_second_request_hits() {
        let mut m = ContextManager::host();
        let ctx = m.get_or_create(None).unwrap();
        let buf = buffer(&ctx);
        let mut cache = EquivalenceCache::new();

        let first = cache.image_view_of(&ctx, &buf).unwrap().id();
        let second = cache.image_view_of(&ctx, &buf).unwrap().id();
        assert_eq!(first, second);
        assert_eq!(cache.allocation_count(), 1);
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(ctx.stats().images_allocated, 1);

        let image = cache.cached(&buf).unwrap();
        assert_eq!(image.id(), first);
        assert_eq!(image.dims(), buf.dims());
        assert_eq!(image.element_type(), buf.element_type());
    }

    #[test]
    fn test_release_then_new_buffer_allocates_fresh() {
        let mut m = ContextManager::host();
        let ctx = m.get_or_create(None).unwrap();
        let mut cache = EquivalenceCache::new();

        let a = buffer(&ctx);
        let first = cache.image_view_of(&ctx, &a).unwrap().id();
        cache.release(a);
        assert!(cache.is_empty());
        assert_eq!(ctx.stats().live(), 0);

        let b = buffer(&ctx);
        let second = cache.image_view_of(&ctx, &b).unwrap().id();
        assert_ne!(first, second);
        assert_eq!(cache.allocation_count(), 2);
    }

    #[test]
    fn test_no_implicit_sync() {
        let mut m = ContextManager::host();
        let ctx = m.get_or_create(None).unwrap();
        let mut cache = EquivalenceCache::new();
        let buf = buffer(&ctx);
        buf.write_bytes(bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0])).unwrap();

        cache.image_view_of(&ctx, &buf).unwrap();
        let image = cache.cached(&buf).unwrap();
        assert_eq!(image.read_bytes().unwrap(), vec![0u8; 16]);

        cache.copy_buffer_to_image(&ctx, &buf, &image).unwrap();
        assert_eq!(image.read_bytes().unwrap(), buf.read_bytes().unwrap());
    }

    #[test]
    fn test_buffer_from_closed_context() {
        let mut m = ContextManager::host();
        let ctx = m.get_or_create(None).unwrap();
        let buf = buffer(&ctx);
        m.close();
        let fresh = m.get_or_create(None).unwrap();
        let mut cache = EquivalenceCache::new();
        assert!(matches!(
            cache.image_view_of(&fresh, &buf),
            Err(ComputeError::ContextClosed)
        ));
        assert_eq!(cache.allocation_count(), 0);
    }

    #[test]
    fn test_mirror_follows_buffer_close() {
        let mut m = ContextManager::host();
        let ctx = m.get_or_create(None).unwrap();
        let mut cache = EquivalenceCache::new();

        let closed = buffer(&ctx);
        cache.image_view_of(&ctx, &closed).unwrap();
        let dropped = buffer(&ctx);
        cache.image_view_of(&ctx, &dropped).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(ctx.stats().live(), 4);

        closed.close();
        assert_eq!(cache.len(), 1);
        drop(dropped);
        assert!(cache.is_empty());
        assert_eq!(ctx.stats().live(), 0);
    }

    #[test]
    fn test_held_view_outlives_entry() {
        let mut m = ContextManager::host();
        let ctx = m.get_or_create(None).unwrap();
        let mut cache = EquivalenceCache::new();
        let buf = buffer(&ctx);

        let view = cache.image_view_of(&ctx, &buf).unwrap();
        buf.close();
        assert!(cache.is_empty());
        assert!(view.is_usable());
        assert_eq!(ctx.stats().live(), 1);
        drop(view);
        assert_eq!(ctx.stats().live(), 0);
    }

    #[test]
    fn test_buffer_outlives_cache() {
        let mut m = ContextManager::host();
        let ctx = m.get_or_create(None).unwrap();
        let buf = buffer(&ctx);
        {
            let mut cache = EquivalenceCache::new();
            cache.image_view_of(&ctx, &buf).unwrap();
        }
        assert_eq!(ctx.stats().live(), 1);
        buf.close();
        assert_eq!(ctx.stats().live(), 0);
    }
}
