//! Operations built on the built-in kernels.
//!
//! Each operation allocates what it needs, binds its typed arguments by name
//! and runs one kernel through a [`KernelExecutor`]. Geometric transforms
//! may detour through image storage via an [`EquivalenceCache`], depending
//! on [`ComputeContext::prefers_image_path`].

use tracing::debug;
use voxl_core::{Dimensions, ElementType};

use crate::context::{ComputeContext, OperationClass};
use crate::device::AccessMode;
use crate::equivalence::EquivalenceCache;
use crate::kernel::{KernelExecutor, ParameterBinding, builtins};
use crate::memory::Buffer;
use crate::{ComputeError, ComputeResult};

/// Copy `src` into `dst` element by element.
pub fn copy(exec: &mut KernelExecutor, ctx: &ComputeContext, src: &Buffer, dst: &Buffer) -> ComputeResult<()> {
    let binding = ParameterBinding::new().with("src", src).with("dst", dst);
    exec.execute(ctx, builtins::id(builtins::COPY), Some(dst.dims()), &binding)
}

/// Set every element of `dst` to `value`.
pub fn fill(exec: &mut KernelExecutor, ctx: &ComputeContext, dst: &Buffer, value: f64) -> ComputeResult<()> {
    let binding = ParameterBinding::new().with("dst", dst).with("value", value);
    exec.execute(ctx, builtins::id(builtins::FILL), None, &binding)
}

/// `dst = a + b`, element-wise.
pub fn add_images(
    exec: &mut KernelExecutor,
    ctx: &ComputeContext,
    a: &Buffer,
    b: &Buffer,
    dst: &Buffer,
) -> ComputeResult<()> {
    let binding = ParameterBinding::new()
        .with("src1", a)
        .with("src2", b)
        .with("dst", dst);
    exec.execute(ctx, builtins::id(builtins::ADD_IMAGES), None, &binding)
}

/// Sum of all elements of `src`.
pub fn sum_pixels(exec: &mut KernelExecutor, ctx: &ComputeContext, src: &Buffer) -> ComputeResult<f64> {
    let out = ctx.create_buffer(Dimensions::new(&[1])?, ElementType::F32, AccessMode::ReadWrite)?;
    let binding = ParameterBinding::new().with("src", src).with("dst", &out);
    exec.execute(ctx, builtins::id(builtins::SUM_PIXELS), None, &binding)?;

    let sum = out
        .read_host()?
        .get(0)
        .ok_or_else(|| ComputeError::OperationFailed("empty sum result".into()))?;
    out.close();
    Ok(sum)
}

/// Arithmetic mean of all elements of `src`.
pub fn mean_of_all_pixels(exec: &mut KernelExecutor, ctx: &ComputeContext, src: &Buffer) -> ComputeResult<f64> {
    let sum = sum_pixels(exec, ctx, src)?;
    Ok(sum / src.dims().element_count() as f64)
}

/// Inverse (output to source) matrix of an in-plane rotation by `degrees`.
///
/// Rotating around the center uses `(width / 2, height / 2)` as pivot,
/// otherwise the origin.
pub fn rotation_matrix(dims: Dimensions, degrees: f64, around_center: bool) -> [f64; 6] {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (cx, cy) = if around_center {
        ((dims.width() / 2) as f64, (dims.height() / 2) as f64)
    } else {
        (0.0, 0.0)
    };
    [
        cos,
        -sin,
        cx - cos * cx + sin * cy,
        sin,
        cos,
        cy - sin * cx - cos * cy,
    ]
}

/// Rotate `src` in plane into `dst` (nearest neighbour, outside reads 0).
///
/// On devices that prefer image storage for geometric transforms the work
/// runs on cached image mirrors of both buffers: `src` is copied into its
/// mirror, the image kernel runs, and the result is copied back into `dst`.
pub fn rotate_2d(
    exec: &mut KernelExecutor,
    cache: &mut EquivalenceCache,
    ctx: &ComputeContext,
    src: &Buffer,
    dst: &Buffer,
    degrees: f64,
    around_center: bool,
) -> ComputeResult<()> {
    let matrix = rotation_matrix(src.dims(), degrees, around_center);
    let use_images = ctx.prefers_image_path(OperationClass::GeometricTransform);
    debug!(degrees, around_center, use_images, "rotate_2d");

    if !use_images {
        let binding = with_matrix(ParameterBinding::new().with("src", src).with("dst", dst), &matrix);
        return exec.execute(ctx, builtins::id(builtins::AFFINE_BUFFER), Some(dst.dims()), &binding);
    }

    let src_image = cache.image_view_of(ctx, src)?;
    let dst_image = cache.image_view_of(ctx, dst)?;

    cache.copy_buffer_to_image(ctx, src, &src_image)?;
    let binding = with_matrix(
        ParameterBinding::new().with("src", &*src_image).with("dst", &*dst_image),
        &matrix,
    );
    exec.execute(ctx, builtins::id(builtins::AFFINE_IMAGE), Some(dst.dims()), &binding)?;
    cache.copy_image_to_buffer(ctx, &dst_image, dst)
}

fn with_matrix<'a>(mut binding: ParameterBinding<'a>, matrix: &[f64; 6]) -> ParameterBinding<'a> {
    for (name, value) in builtins::AFFINE_MATRIX.iter().zip(matrix) {
        binding.set(name, *value);
    }
    binding
}
