//! Device context lifecycle.
//!
//! A [`ComputeContext`] is an opened device plus its queue. At most one
//! context is active per [`ContextManager`]; asking the manager for a
//! different device closes the old context and every buffer, image and
//! compiled kernel tied to it becomes unusable ([`ComputeError::ContextClosed`]).
//!
//! Most applications want one manager for the whole process, available via
//! [`ContextManager::global`]. Tests and tools can own private managers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, info, warn};

use crate::config::{ComputeConfig, ImageRouting};
use crate::device::{Device, DeviceQueue, DeviceRegistry, HostBackend};
use crate::memory::{AllocationCounters, AllocationStats};
use crate::{ComputeError, ComputeResult};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);
static GLOBAL: OnceLock<Mutex<ContextManager>> = OnceLock::new();

/// Category of an operation, used to pick a storage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// Rotation, scaling, affine resampling.
    GeometricTransform,
    /// Everything else.
    General,
}

// =============================================================================
// ComputeContext
// =============================================================================

pub(crate) struct ContextShared {
    id: u64,
    device: Device,
    queue: Box<dyn DeviceQueue>,
    config: ComputeConfig,
    closed: AtomicBool,
    counters: AllocationCounters,
}

impl ContextShared {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn ensure_open(&self) -> ComputeResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(ComputeError::ContextClosed)
        } else {
            Ok(())
        }
    }

    /// Queue of an open context.
    pub(crate) fn queue(&self) -> ComputeResult<&dyn DeviceQueue> {
        self.ensure_open()?;
        Ok(&*self.queue)
    }

    pub(crate) fn counters(&self) -> &AllocationCounters {
        &self.counters
    }
}

/// Opened device and its queue.
///
/// Cheap to clone; clones share the same device session.
#[derive(Clone)]
pub struct ComputeContext {
    shared: Arc<ContextShared>,
}

impl ComputeContext {
    /// Open `device` through `registry`.
    pub fn open(registry: &DeviceRegistry, device: Device, config: ComputeConfig) -> ComputeResult<Self> {
        let queue = registry.open(&device)?;
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        info!(context = id, device = %device, "opened compute context");
        Ok(Self {
            shared: Arc::new(ContextShared {
                id,
                device,
                queue,
                config,
                closed: AtomicBool::new(false),
                counters: AllocationCounters::default(),
            }),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<ContextShared> {
        &self.shared
    }

    /// Process-unique context identity.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn device(&self) -> &Device {
        &self.shared.device
    }

    /// Name of the selected device.
    pub fn device_name(&self) -> &str {
        &self.shared.device.name
    }

    pub fn config(&self) -> &ComputeConfig {
        &self.shared.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Fails with [`ComputeError::ContextClosed`] once the context is closed.
    pub fn ensure_open(&self) -> ComputeResult<()> {
        self.shared.ensure_open()
    }

    /// Wait for every submitted command to complete.
    pub fn finish(&self) -> ComputeResult<()> {
        self.shared.queue()?.finish()
    }

    /// Allocation counters of this context.
    pub fn stats(&self) -> AllocationStats {
        self.shared.counters.snapshot()
    }

    /// Whether operations of `class` should run on image storage.
    ///
    /// Only geometric transforms are routed. Under [`ImageRouting::Auto`] the
    /// device must support images and reach the configured capability
    /// version.
    pub fn prefers_image_path(&self, class: OperationClass) -> bool {
        if class != OperationClass::GeometricTransform || !self.shared.device.image_support {
            return false;
        }
        match self.shared.config.image_routing {
            ImageRouting::Always => true,
            ImageRouting::Never => false,
            ImageRouting::Auto => self.shared.device.version >= self.shared.config.image_min_version,
        }
    }

    /// Whether `self` and `other` are the same device session.
    pub fn same_session(&self, other: &ComputeContext) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Close the session. Idempotent.
    pub(crate) fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.shared.queue.finish() {
            warn!(context = self.shared.id, error = %e, "finish before close failed");
        }
        self.shared.queue.close();
        info!(context = self.shared.id, device = %self.shared.device.name, "closed compute context");
    }
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("id", &self.shared.id)
            .field("device", &self.shared.device.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// ContextManager
// =============================================================================

/// Lifecycle state of a [`ContextManager`].
#[derive(Debug, Clone)]
pub enum ContextState {
    Uninitialized,
    Active(ComputeContext),
    Closed,
}

/// Owns the single active device context.
pub struct ContextManager {
    registry: DeviceRegistry,
    config: ComputeConfig,
    state: ContextState,
}

impl ContextManager {
    pub fn new(registry: DeviceRegistry, config: ComputeConfig) -> Self {
        Self {
            registry,
            config,
            state: ContextState::Uninitialized,
        }
    }

    /// Every backend compiled into this build, configured from the environment.
    pub fn detect() -> Self {
        Self::new(DeviceRegistry::detect(), ComputeConfig::from_env())
    }

    /// Host backend only, default configuration.
    pub fn host() -> Self {
        Self::new(DeviceRegistry::with_backend(HostBackend::new()), ComputeConfig::default())
    }

    /// Process-wide manager, created with [`detect`](Self::detect) on first use.
    pub fn global() -> &'static Mutex<ContextManager> {
        GLOBAL.get_or_init(|| Mutex::new(Self::detect()))
    }

    /// Return the active context, opening or switching devices as needed.
    ///
    /// Without a hint (or with the configured default hint) an active
    /// context is reused as is. With a hint the registry resolves it to a
    /// device; if that differs from the active device the old context is
    /// closed and a new one becomes active. Selection or open failures leave
    /// the current context untouched.
    pub fn get_or_create(&mut self, hint: Option<&str>) -> ComputeResult<ComputeContext> {
        let explicit = hint.filter(|h| !h.is_empty());

        if let (ContextState::Active(ctx), None) = (&self.state, explicit) {
            return Ok(ctx.clone());
        }

        let hint = explicit.or(self.config.default_device.as_deref());
        let device = self.registry.select_device(hint)?;

        if let ContextState::Active(ctx) = &self.state {
            if *ctx.device() == device {
                return Ok(ctx.clone());
            }
        }

        let next = ComputeContext::open(&self.registry, device, self.config.clone())?;
        if let ContextState::Active(previous) = &self.state {
            debug!(from = %previous.device_name(), to = %next.device_name(), "switching device");
            previous.close();
        }
        self.state = ContextState::Active(next.clone());
        Ok(next)
    }

    /// Active context, if any.
    pub fn active(&self) -> Option<&ComputeContext> {
        match &self.state {
            ContextState::Active(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Close the active context. No-op if nothing is active.
    pub fn close(&mut self) {
        if let ContextState::Active(ctx) = &self.state {
            ctx.close();
            self.state = ContextState::Closed;
        }
    }

    pub fn state(&self) -> &ContextState {
        &self.state
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }
}

impl Drop for ContextManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AccessMode, CapabilityVersion, DeviceKind, HostDeviceSpec};
    use voxl_core::{Dimensions, ElementType};

    fn manager(config: ComputeConfig) -> ContextManager {
        ContextManager::new(
            DeviceRegistry::with_backend(HostBackend::with_devices(vec![
                HostDeviceSpec::new("Virtual GPU A", CapabilityVersion::new(3, 0), DeviceKind::Accelerator),
                HostDeviceSpec::new("Virtual GPU B", CapabilityVersion::new(1, 1), DeviceKind::Accelerator),
                HostDeviceSpec::new("Virtual CPU", CapabilityVersion::new(2, 0), DeviceKind::Cpu).without_images(),
            ])),
            config,
        )
    }

    #[test]
    fn test_lazy_creation_and_reuse() {
        let mut m = manager(ComputeConfig::default());
        assert!(matches!(m.state(), ContextState::Uninitialized));
        let a = m.get_or_create(None).unwrap();
        assert_eq!(a.device_name(), "Virtual GPU A");
        let b = m.get_or_create(None).unwrap();
        assert!(a.same_session(&b));
        let c = m.get_or_create(Some("GPU A")).unwrap();
        assert!(a.same_session(&c));
    }

    #[test]
    fn test_switch_closes_previous() {
        let mut m = manager(ComputeConfig::default());
        let a = m.get_or_create(None).unwrap();
        let buf = a
            .create_buffer(Dimensions::d2(2, 2).unwrap(), ElementType::F32, AccessMode::ReadWrite)
            .unwrap();

        let b = m.get_or_create(Some("GPU B")).unwrap();
        assert_eq!(b.device_name(), "Virtual GPU B");
        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert!(matches!(buf.read_bytes(), Err(ComputeError::ContextClosed)));
        assert!(matches!(a.finish(), Err(ComputeError::ContextClosed)));
    }

    #[test]
    fn test_failed_switch_keeps_context() {
        let mut m = manager(ComputeConfig::default());
        let a = m.get_or_create(None).unwrap();
        let err = m.get_or_create(Some("NO_SUCH_DEVICE_XYZ")).unwrap_err();
        assert!(matches!(err, ComputeError::NoMatchingDevice(_)));
        assert!(!a.is_closed());
        assert!(m.active().unwrap().same_session(&a));
    }

    #[test]
    fn test_default_device_from_config() {
        let mut m = manager(ComputeConfig::default().with_default_device("CPU"));
        assert_eq!(m.get_or_create(None).unwrap().device_name(), "Virtual CPU");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut m = manager(ComputeConfig::default());
        m.close();
        assert!(matches!(m.state(), ContextState::Uninitialized));
        let a = m.get_or_create(None).unwrap();
        m.close();
        m.close();
        assert!(a.is_closed());
        assert!(matches!(m.state(), ContextState::Closed));
        assert!(m.active().is_none());

        let again = m.get_or_create(None).unwrap();
        assert!(!again.is_closed());
    }

    #[test]
    fn test_image_routing() {
        let mut m = manager(ComputeConfig::default());
        let a = m.get_or_create(Some("GPU A")).unwrap();
        assert!(a.prefers_image_path(OperationClass::GeometricTransform));
        assert!(!a.prefers_image_path(OperationClass::General));

        let b = m.get_or_create(Some("GPU B")).unwrap();
        assert!(!b.prefers_image_path(OperationClass::GeometricTransform));

        let cpu = m.get_or_create(Some("CPU")).unwrap();
        assert!(!cpu.prefers_image_path(OperationClass::GeometricTransform));

        let mut forced = manager(ComputeConfig::default().with_image_routing(ImageRouting::Always));
        let b = forced.get_or_create(Some("GPU B")).unwrap();
        assert!(b.prefers_image_path(OperationClass::GeometricTransform));

        let mut never = manager(ComputeConfig::default().with_image_routing(ImageRouting::Never));
        let a = never.get_or_create(Some("GPU A")).unwrap();
        assert!(!a.prefers_image_path(OperationClass::GeometricTransform));
    }
}
