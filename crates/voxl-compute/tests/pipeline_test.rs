//! Memory, kernel dispatch and conversion tests for voxl-compute.

use approx::assert_relative_eq;
use voxl_compute::{
    AccessMode, CapabilityVersion, ComputeConfig, ComputeContext, ComputeError, ContextManager, ConversionRegistry,
    DeviceKind, DeviceRegistry, EquivalenceCache, HostBackend, HostDeviceSpec, KernelExecutor, KernelId,
    ParameterBinding, TypeTag, Value, ops,
};
use voxl_core::{Dimensions, ElementType, HostArray};

fn manager() -> ContextManager {
    ContextManager::new(
        DeviceRegistry::with_backend(HostBackend::with_devices(vec![
            HostDeviceSpec::new("Pipeline Device", CapabilityVersion::new(2, 0), DeviceKind::Accelerator),
            HostDeviceSpec::new("Pipeline Fallback", CapabilityVersion::new(1, 0), DeviceKind::Accelerator),
        ])),
        ComputeConfig::default(),
    )
}

fn context() -> (ContextManager, ComputeContext) {
    let mut m = manager();
    let ctx = m.get_or_create(None).unwrap();
    (m, ctx)
}

fn copy_id() -> KernelId {
    KernelId::builtin("copy.cl", "copy")
}

fn fill_id() -> KernelId {
    KernelId::builtin("fill.cl", "fill")
}

#[test]
fn test_create_like_all_types() {
    let (_m, ctx) = context();
    let shapes = [
        Dimensions::new(&[7]).unwrap(),
        Dimensions::d2(5, 3).unwrap(),
        Dimensions::d3(4, 3, 2).unwrap(),
    ];
    for ty in ElementType::ALL {
        for dims in shapes {
            let buffer = ctx.create_buffer(dims, ty, AccessMode::ReadOnly).unwrap();
            let like = ctx.create_buffer_like(&buffer).unwrap();
            assert_eq!(like.dims(), dims);
            assert_eq!(like.element_type(), ty);
            assert_eq!(like.access(), AccessMode::ReadOnly);
            assert_ne!(like.id(), buffer.id());

            let image = ctx.create_image_for(&buffer).unwrap();
            assert!(image.layout().is_equivalent(buffer.layout()));
            let image_like = ctx.create_image_like(&image).unwrap();
            assert_eq!(image_like.dims(), dims);
            assert_eq!(image_like.element_type(), ty);
        }
    }
}

#[test]
fn test_image_view_reused_until_release() {
    let (_m, ctx) = context();
    let mut cache = EquivalenceCache::new();
    let buffer = ctx
        .create_buffer(Dimensions::d2(2, 2).unwrap(), ElementType::F32, AccessMode::ReadWrite)
        .unwrap();

    let first = cache.image_view_of(&ctx, &buffer).unwrap().id();
    let second = cache.image_view_of(&ctx, &buffer).unwrap().id();
    assert_eq!(first, second);
    assert_eq!(cache.allocation_count(), 1);
    assert_eq!(cache.hit_count(), 1);

    cache.release(buffer);
    assert!(cache.is_empty());

    let fresh = ctx
        .create_buffer(Dimensions::d2(2, 2).unwrap(), ElementType::F32, AccessMode::ReadWrite)
        .unwrap();
    let third = cache.image_view_of(&ctx, &fresh).unwrap().id();
    assert_ne!(third, first);
    assert_eq!(cache.allocation_count(), 2);
}

#[test]
fn test_closing_buffer_drops_its_view() {
    let (_m, ctx) = context();
    let mut cache = EquivalenceCache::new();
    let buffer = ctx
        .create_buffer(Dimensions::d2(2, 2).unwrap(), ElementType::F32, AccessMode::ReadWrite)
        .unwrap();
    cache.image_view_of(&ctx, &buffer).unwrap();
    assert_eq!(cache.len(), 1);

    buffer.close();
    assert_eq!(cache.len(), 0);
    assert_eq!(ctx.stats().live(), 0);
}

#[test]
fn test_executor_rebuilds_on_kernel_change() {
    let (_m, ctx) = context();
    let mut exec = KernelExecutor::with_builtins();
    let buffer = ctx
        .create_buffer(Dimensions::d2(4, 4).unwrap(), ElementType::F32, AccessMode::ReadWrite)
        .unwrap();
    let other = ctx.create_buffer_like(&buffer).unwrap();

    let fill = ParameterBinding::new().with("dst", &buffer).with("value", 2.0f64);
    let copy = ParameterBinding::new().with("src", &buffer).with("dst", &other);

    exec.execute(&ctx, fill_id(), None, &fill).unwrap();
    exec.execute(&ctx, fill_id(), None, &fill).unwrap();
    assert_eq!(exec.build_count(), 1);

    exec.execute(&ctx, copy_id(), None, &copy).unwrap();
    exec.execute(&ctx, fill_id(), None, &fill).unwrap();
    assert_eq!(exec.build_count(), 3);
    assert_eq!(exec.cached_kernel(), Some(&fill_id()));

    let out = other.read_host().unwrap();
    assert!(out.to_f64().iter().all(|&v| v == 2.0));
}

#[test]
fn test_identity_copy_in_place() {
    let (_m, ctx) = context();
    let data: Vec<i32> = vec![-3, 0, 7, i32::MAX, i32::MIN, 42];
    let array = HostArray::from_vec(data, Dimensions::d3(3, 2, 1).unwrap()).unwrap();
    let buffer = ctx.upload_buffer(&array).unwrap();

    let mut exec = KernelExecutor::with_builtins();
    exec.configure(copy_id(), None);
    let binding = ParameterBinding::new().with("src", &buffer).with("dst", &buffer);
    exec.enqueue(&ctx, &binding, true).unwrap();
    assert!(exec.last_failure().is_none());

    let back = buffer.read_host().unwrap();
    assert_eq!(back.as_bytes(), array.as_bytes());
}

#[test]
fn test_failed_enqueue_is_recorded() {
    let (_m, ctx) = context();
    let buffer = ctx
        .create_buffer(Dimensions::d2(2, 2).unwrap(), ElementType::F32, AccessMode::ReadWrite)
        .unwrap();
    let mut exec = KernelExecutor::with_builtins();
    exec.configure(fill_id(), None);

    let missing = ParameterBinding::new().with("dst", &buffer);
    let err = exec.enqueue(&ctx, &missing, true).unwrap_err();
    assert!(matches!(err, ComputeError::InvalidParameterBinding { .. }));
    assert!(exec.last_failure().unwrap().contains("value"));

    let ok = ParameterBinding::new().with("dst", &buffer).with("value", 1.0f64);
    exec.enqueue(&ctx, &ok, true).unwrap();
    assert!(exec.last_failure().is_none());
}

#[test]
fn test_unknown_program_fails_build() {
    let (_m, ctx) = context();
    let buffer = ctx
        .create_buffer(Dimensions::d2(2, 2).unwrap(), ElementType::F32, AccessMode::ReadWrite)
        .unwrap();
    let mut exec = KernelExecutor::with_builtins();
    let binding = ParameterBinding::new().with("dst", &buffer);
    let err = exec
        .execute(&ctx, KernelId::builtin("missing.cl", "missing"), None, &binding)
        .unwrap_err();
    assert!(matches!(err, ComputeError::KernelBuildFailed { .. }));
    assert_eq!(exec.build_count(), 0);
}

#[test]
fn test_conversion_round_trip() {
    let (_m, ctx) = context();
    let conversions = ConversionRegistry::with_host_bridge();

    let ints = HostArray::from_vec(vec![1u16, 2, 3, 60000, 0, 9], Dimensions::d2(3, 2).unwrap()).unwrap();
    let buffer = conversions.to_buffer(&ctx, ints.clone()).unwrap();
    assert_eq!(conversions.to_host(&ctx, Value::Buffer(buffer)).unwrap(), ints);

    let floats = HostArray::from_vec(vec![0.5f32, -1.25, 3.0, 1e-3], Dimensions::d2(2, 2).unwrap()).unwrap();
    let image = conversions
        .convert(&ctx, Value::Host(floats.clone()), TypeTag::Image)
        .unwrap();
    assert_eq!(image.tag(), TypeTag::Image);
    let buffer = conversions.convert(&ctx, image, TypeTag::Buffer).unwrap();
    assert_eq!(conversions.to_host(&ctx, buffer).unwrap(), floats);
}

#[test]
fn test_missing_converter() {
    let (_m, ctx) = context();
    let conversions = ConversionRegistry::new();
    let array = HostArray::zeros(Dimensions::d2(2, 2).unwrap(), ElementType::U8);
    let err = conversions.to_buffer(&ctx, array).unwrap_err();
    assert!(matches!(err, ComputeError::NoConverterRegistered { .. }));
}

#[test]
fn test_pipeline_statistics() {
    let (_m, ctx) = context();
    let mut exec = KernelExecutor::with_builtins();
    let dims = Dimensions::d2(8, 4).unwrap();

    let data: Vec<f32> = (0..dims.element_count()).map(|i| i as f32).collect();
    let input = ctx.upload_buffer(&HostArray::from_vec(data, dims).unwrap()).unwrap();
    let ones = ctx.create_buffer_like(&input).unwrap();
    let sum = ctx.create_buffer_like(&input).unwrap();

    ops::fill(&mut exec, &ctx, &ones, 1.0).unwrap();
    ops::add_images(&mut exec, &ctx, &input, &ones, &sum).unwrap();

    // 0..32 plus one each: 32 * 33 / 2
    assert_relative_eq!(ops::sum_pixels(&mut exec, &ctx, &sum).unwrap(), 528.0);
    assert_relative_eq!(ops::mean_of_all_pixels(&mut exec, &ctx, &sum).unwrap(), 16.5);
}

#[test]
fn test_rotation_paths_agree() {
    let dims = Dimensions::d2(5, 5).unwrap();
    let data: Vec<f32> = (0..25).map(|i| i as f32).collect();
    let array = HostArray::from_vec(data, dims).unwrap();

    let mut results = Vec::new();
    for hint in ["Pipeline Device", "Pipeline Fallback"] {
        let mut m = manager();
        let ctx = m.get_or_create(Some(hint)).unwrap();
        let mut exec = KernelExecutor::with_builtins();
        let mut cache = EquivalenceCache::new();

        let src = ctx.upload_buffer(&array).unwrap();
        let dst = ctx.create_buffer_like(&src).unwrap();
        ops::rotate_2d(&mut exec, &mut cache, &ctx, &src, &dst, 90.0, true).unwrap();
        results.push(dst.read_host().unwrap());
    }
    assert_eq!(results[0], results[1]);
}
