//! Device selection and context lifecycle tests for voxl-compute.

use voxl_compute::{
    AccessMode, CapabilityVersion, ComputeConfig, ComputeError, ContextManager, ContextState, DeviceKind,
    DeviceRegistry, EquivalenceCache, HostBackend, HostDeviceSpec, ImageRouting, OperationClass, describe_devices,
};
use voxl_core::{Dimensions, ElementType};

fn registry() -> DeviceRegistry {
    DeviceRegistry::with_backend(HostBackend::with_devices(vec![
        HostDeviceSpec::new("Test Accelerator One", CapabilityVersion::new(2, 0), DeviceKind::Accelerator),
        HostDeviceSpec::new("Test Accelerator Two", CapabilityVersion::new(1, 1), DeviceKind::Accelerator),
        HostDeviceSpec::new("Test Host CPU", CapabilityVersion::new(1, 2), DeviceKind::Cpu).without_images(),
    ]))
}

fn manager() -> ContextManager {
    ContextManager::new(registry(), ComputeConfig::default())
}

#[test]
fn test_host_backend_always_available() {
    let registry = DeviceRegistry::with_backend(HostBackend::new());
    let devices = registry.list_devices().unwrap();
    assert!(!devices.is_empty());
    assert!(devices[0].is_cpu());
}

#[test]
fn test_describe_devices() {
    let desc = describe_devices(&registry()).unwrap();
    println!("{desc}");
    assert!(desc.contains("Test Accelerator One"));
    assert!(desc.contains("Test Host CPU"));
}

#[test]
fn test_selection_by_substring() {
    let r = registry();
    assert_eq!(r.select_device(Some("Two")).unwrap().name, "Test Accelerator Two");
    assert_eq!(r.select_device(Some("CPU")).unwrap().name, "Test Host CPU");
    // Matching is case-sensitive
    assert!(matches!(r.select_device(Some("cpu")), Err(ComputeError::NoMatchingDevice(_))));
}

#[test]
fn test_unknown_device_leaves_context_unchanged() {
    let mut m = manager();
    let ctx = m.get_or_create(None).unwrap();
    let name = ctx.device_name().to_string();

    let err = m.get_or_create(Some("NO_SUCH_DEVICE_XYZ")).unwrap_err();
    assert!(matches!(err, ComputeError::NoMatchingDevice(ref h) if h == "NO_SUCH_DEVICE_XYZ"));

    let still = m.active().unwrap();
    assert!(still.same_session(&ctx));
    assert_eq!(still.device_name(), name);
    assert!(!ctx.is_closed());
}

#[test]
fn test_unknown_device_creates_no_context() {
    let mut m = manager();
    let err = m.get_or_create(Some("NO_SUCH_DEVICE_XYZ")).unwrap_err();
    assert!(matches!(err, ComputeError::NoMatchingDevice(_)));
    assert!(matches!(m.state(), ContextState::Uninitialized));
    assert!(m.active().is_none());

    // A later valid request still works from the untouched state
    assert!(!m.get_or_create(None).unwrap().is_closed());
}

#[test]
fn test_switch_invalidates_old_memory() {
    let mut m = manager();
    let a = m.get_or_create(Some("One")).unwrap();
    let dims = Dimensions::d2(4, 4).unwrap();
    let buffer = a.create_buffer(dims, ElementType::F32, AccessMode::ReadWrite).unwrap();
    let image = a.create_image(dims, ElementType::F32).unwrap();
    assert!(buffer.is_usable());

    let b = m.get_or_create(Some("Two")).unwrap();
    assert!(!a.same_session(&b));
    assert!(!buffer.is_usable());
    assert!(matches!(buffer.read_bytes(), Err(ComputeError::ContextClosed)));
    assert!(matches!(image.read_host(), Err(ComputeError::ContextClosed)));
    assert!(matches!(
        a.create_buffer(dims, ElementType::F32, AccessMode::ReadWrite),
        Err(ComputeError::ContextClosed)
    ));

    // The layout of closed memory can still be reused, its storage cannot
    assert!(b.create_buffer_like(&buffer).is_ok());
    let mut cache = EquivalenceCache::new();
    assert!(matches!(cache.image_view_of(&b, &buffer), Err(ComputeError::ContextClosed)));
}

#[test]
fn test_close_then_reopen() {
    let mut m = manager();
    let first = m.get_or_create(None).unwrap();
    m.close();
    assert!(matches!(m.state(), ContextState::Closed));
    assert!(first.is_closed());

    let second = m.get_or_create(None).unwrap();
    assert!(!second.is_closed());
    assert!(!first.same_session(&second));
    assert_eq!(first.device_name(), second.device_name());
}

#[test]
fn test_image_routing_by_capability() {
    let mut m = manager();
    let modern = m.get_or_create(Some("One")).unwrap();
    assert!(modern.prefers_image_path(OperationClass::GeometricTransform));
    assert!(!modern.prefers_image_path(OperationClass::General));

    let legacy = m.get_or_create(Some("Two")).unwrap();
    assert!(!legacy.prefers_image_path(OperationClass::GeometricTransform));

    // Version is high enough but the device has no image support
    let cpu = m.get_or_create(Some("CPU")).unwrap();
    assert!(!cpu.prefers_image_path(OperationClass::GeometricTransform));
}

#[test]
fn test_image_routing_overrides() {
    let mut never = ContextManager::new(registry(), ComputeConfig::default().with_image_routing(ImageRouting::Never));
    let ctx = never.get_or_create(Some("One")).unwrap();
    assert!(!ctx.prefers_image_path(OperationClass::GeometricTransform));

    let mut always = ContextManager::new(registry(), ComputeConfig::default().with_image_routing(ImageRouting::Always));
    let ctx = always.get_or_create(Some("Two")).unwrap();
    assert!(ctx.prefers_image_path(OperationClass::GeometricTransform));
}

#[test]
fn test_images_rejected_without_support() {
    let mut m = manager();
    let ctx = m.get_or_create(Some("CPU")).unwrap();
    let dims = Dimensions::d2(2, 2).unwrap();
    assert!(ctx.create_buffer(dims, ElementType::U8, AccessMode::ReadOnly).is_ok());
    assert!(matches!(
        ctx.create_image(dims, ElementType::U8),
        Err(ComputeError::AllocationFailed { .. })
    ));
}
