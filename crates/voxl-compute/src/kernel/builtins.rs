//! Built-in kernels: host bodies, signatures and WGSL sources.

use rayon::prelude::*;
use voxl_core::Dimensions;

use super::{KernelId, KernelSignature, ParamKind, Program, ProgramLibrary};
use crate::device::HostInvocation;
use crate::{ComputeError, ComputeResult, shaders};

pub(crate) const COPY: (&str, &str) = ("copy.cl", "copy");
pub(crate) const FILL: (&str, &str) = ("fill.cl", "fill");
pub(crate) const SUM_PIXELS: (&str, &str) = ("sum.cl", "sum_pixels");
pub(crate) const ADD_IMAGES: (&str, &str) = ("add.cl", "add_images");
pub(crate) const AFFINE_BUFFER: (&str, &str) = ("affine_buffer.cl", "affine_transform_2d");
pub(crate) const AFFINE_IMAGE: (&str, &str) = ("affine_image.cl", "affine_transform_2d");

/// Inverse-matrix scalar names of the affine kernels, row-major.
pub(crate) const AFFINE_MATRIX: [&str; 6] = ["m00", "m01", "m02", "m10", "m11", "m12"];

pub(crate) fn id((program, kernel): (&str, &str)) -> KernelId {
    KernelId::builtin(program, kernel)
}

pub(super) fn register(lib: &mut ProgramLibrary) {
    lib.register(
        id(COPY),
        Program::new(
            KernelSignature::default()
                .param("src", ParamKind::Memory)
                .param("dst", ParamKind::Memory),
        )
        .with_wgsl(shaders::COPY)
        .with_host(copy),
    );
    lib.register(
        id(FILL),
        Program::new(
            KernelSignature::default()
                .param("dst", ParamKind::Memory)
                .param("value", ParamKind::Scalar),
        )
        .with_wgsl(shaders::FILL)
        .with_host(fill),
    );
    lib.register(
        id(SUM_PIXELS),
        Program::new(
            KernelSignature::default()
                .param("src", ParamKind::Memory)
                .param("dst", ParamKind::Buffer),
        )
        .with_wgsl(shaders::SUM_PIXELS)
        .with_host(sum_pixels),
    );
    lib.register(
        id(ADD_IMAGES),
        Program::new(
            KernelSignature::default()
                .param("src1", ParamKind::Memory)
                .param("src2", ParamKind::Memory)
                .param("dst", ParamKind::Memory),
        )
        .with_wgsl(shaders::ADD_IMAGES)
        .with_host(add_images),
    );
    for (entry, kind) in [(AFFINE_BUFFER, ParamKind::Buffer), (AFFINE_IMAGE, ParamKind::Image)] {
        let signature = AFFINE_MATRIX.iter().fold(
            KernelSignature::default().param("src", kind).param("dst", kind),
            |sig, name| sig.param(name, ParamKind::Scalar),
        );
        lib.register(
            id(entry),
            Program::new(signature)
                .with_wgsl(shaders::AFFINE_TRANSFORM_2D)
                .with_host(affine_transform_2d),
        );
    }
}

fn fail(inv: &HostInvocation<'_>, reason: String) -> ComputeError {
    ComputeError::DispatchFailed {
        kernel: inv.kernel().to_string(),
        reason,
    }
}

/// Coordinates of linear index `i` in `dims` if inside the `global` range.
fn in_range(dims: Dimensions, global: [usize; 3], i: usize) -> Option<[usize; 3]> {
    let [w, h, _] = dims.padded();
    let (x, y, z) = (i % w, (i / w) % h, i / (w * h));
    (x < global[0] && y < global[1] && z < global[2]).then_some([x, y, z])
}

fn contains(dims: Dimensions, [x, y, z]: [usize; 3]) -> bool {
    x < dims.width() && y < dims.height() && z < dims.depth()
}

fn copy(inv: &HostInvocation<'_>) -> ComputeResult<()> {
    let src = inv.layout("src")?;
    let dst = inv.layout("dst")?;
    let global = inv.global_size();

    if src.is_equivalent(&dst) && global == src.dims.padded() {
        let bytes = inv.read_bytes("src")?;
        return inv.write_bytes("dst", &bytes);
    }

    let values = inv.read_f64("src")?;
    let mut out = inv.read_f64("dst")?;
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        if let Some(p) = in_range(dst.dims, global, i).filter(|&p| contains(src.dims, p)) {
            *o = values[src.dims.index(p[0], p[1], p[2])];
        }
    });
    inv.write_f64("dst", &out)
}

fn fill(inv: &HostInvocation<'_>) -> ComputeResult<()> {
    let dst = inv.layout("dst")?;
    let value = inv.float("value")?;
    let global = inv.global_size();

    let mut out = inv.read_f64("dst")?;
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        if in_range(dst.dims, global, i).is_some() {
            *o = value;
        }
    });
    inv.write_f64("dst", &out)
}

fn sum_pixels(inv: &HostInvocation<'_>) -> ComputeResult<()> {
    let sum: f64 = inv.read_f64("src")?.par_iter().sum();
    let mut out = inv.read_f64("dst")?;
    match out.first_mut() {
        Some(first) => *first = sum,
        None => return Err(fail(inv, "'dst' is empty".into())),
    }
    inv.write_f64("dst", &out)
}

fn add_images(inv: &HostInvocation<'_>) -> ComputeResult<()> {
    let dst = inv.layout("dst")?;
    let a = inv.read_f64("src1")?;
    let b = inv.read_f64("src2")?;
    let mut out = inv.read_f64("dst")?;
    if a.len() != out.len() || b.len() != out.len() {
        return Err(fail(
            inv,
            format!("element counts differ: {} + {} -> {}", a.len(), b.len(), out.len()),
        ));
    }
    let global = inv.global_size();
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        if in_range(dst.dims, global, i).is_some() {
            *o = a[i] + b[i];
        }
    });
    inv.write_f64("dst", &out)
}

fn affine_transform_2d(inv: &HostInvocation<'_>) -> ComputeResult<()> {
    let src = inv.layout("src")?;
    let dst = inv.layout("dst")?;
    let mut m = [0.0; 6];
    for (slot, name) in m.iter_mut().zip(AFFINE_MATRIX) {
        *slot = inv.float(name)?;
    }
    let global = inv.global_size();
    let (sw, sh) = (src.dims.width() as f64, src.dims.height() as f64);

    let values = inv.read_f64("src")?;
    let mut out = inv.read_f64("dst")?;
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        let Some([x, y, z]) = in_range(dst.dims, global, i) else {
            return;
        };
        let (xf, yf) = (x as f64, y as f64);
        let sx = (m[0] * xf + m[1] * yf + m[2]).round();
        let sy = (m[3] * xf + m[4] * yf + m[5]).round();
        *o = if sx >= 0.0 && sy >= 0.0 && sx < sw && sy < sh && z < src.dims.depth() {
            values[src.dims.index(sx as usize, sy as usize, z)]
        } else {
            0.0
        };
    });
    inv.write_f64("dst", &out)
}
