//! WGSL sources of the built-in kernels.
//!
//! Binding convention shared with the wgpu backend: memory parameters take
//! bindings `0..n` in declared order, followed by one read-only `params`
//! array. Its layout is a header of `[gx, gy, gz, 0]`, then
//! `[width, height, depth, 0]` for every memory parameter in declared order,
//! then the scalars. Elements are `f32`.

#![cfg_attr(not(feature = "wgpu"), allow(dead_code))]

/// Offset of the first scalar for a kernel with `memory_params` memory
/// parameters.
pub(crate) const fn scalar_offset(memory_params: usize) -> usize {
    4 + 4 * memory_params
}

/// Pack the `params` array: dispatch geometry, per-memory extents, scalars.
pub(crate) fn pack_params(global: [usize; 3], extents: &[[usize; 3]], scalars: &[f64]) -> Vec<f32> {
    let mut params = Vec::with_capacity(scalar_offset(extents.len()) + scalars.len());
    params.extend([global[0] as f32, global[1] as f32, global[2] as f32, 0.0]);
    for e in extents {
        params.extend([e[0] as f32, e[1] as f32, e[2] as f32, 0.0]);
    }
    params.extend(scalars.iter().map(|&s| s as f32));
    params
}

/// Element-wise copy over the global range. Source and destination are
/// indexed with their own extents; positions outside either are skipped.
pub const COPY: &str = r#"
@group(0) @binding(0) var<storage, read_write> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<storage, read> params: array<f32>;

fn extents(at: u32) -> vec3<u32> {
    return vec3<u32>(u32(params[at]), u32(params[at + 1u]), u32(params[at + 2u]));
}

@compute @workgroup_size(64)
fn copy(@builtin(global_invocation_id) id: vec3<u32>) {
    let g = extents(0u);
    let s = extents(4u);
    let d = extents(8u);
    if any(id >= g) || any(id >= d) || any(id >= s) { return; }

    dst[(id.z * d.y + id.y) * d.x + id.x] = src[(id.z * s.y + id.y) * s.x + id.x];
}
"#;

/// Set every element to `value`.
pub const FILL: &str = r#"
@group(0) @binding(0) var<storage, read_write> dst: array<f32>;
@group(0) @binding(1) var<storage, read> params: array<f32>;

fn extents(at: u32) -> vec3<u32> {
    return vec3<u32>(u32(params[at]), u32(params[at + 1u]), u32(params[at + 2u]));
}

@compute @workgroup_size(64)
fn fill(@builtin(global_invocation_id) id: vec3<u32>) {
    let g = extents(0u);
    let d = extents(4u);
    if any(id >= g) || any(id >= d) { return; }

    dst[(id.z * d.y + id.y) * d.x + id.x] = params[8];
}
"#;

/// Sum of all source elements into `dst[0]`. Single invocation.
pub const SUM_PIXELS: &str = r#"
@group(0) @binding(0) var<storage, read_write> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<storage, read> params: array<f32>;

fn extents(at: u32) -> vec3<u32> {
    return vec3<u32>(u32(params[at]), u32(params[at + 1u]), u32(params[at + 2u]));
}

@compute @workgroup_size(64)
fn sum_pixels(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x != 0u || id.y != 0u || id.z != 0u { return; }

    let s = extents(4u);
    let total = s.x * s.y * s.z;
    var acc = 0.0;
    for (var i = 0u; i < total; i = i + 1u) {
        acc = acc + src[i];
    }
    dst[0] = acc;
}
"#;

/// Element-wise `dst = src1 + src2` over the destination's extents.
pub const ADD_IMAGES: &str = r#"
@group(0) @binding(0) var<storage, read_write> src1: array<f32>;
@group(0) @binding(1) var<storage, read_write> src2: array<f32>;
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
@group(0) @binding(3) var<storage, read> params: array<f32>;

fn extents(at: u32) -> vec3<u32> {
    return vec3<u32>(u32(params[at]), u32(params[at + 1u]), u32(params[at + 2u]));
}

@compute @workgroup_size(64)
fn add_images(@builtin(global_invocation_id) id: vec3<u32>) {
    let g = extents(0u);
    let d = extents(12u);
    if any(id >= g) || any(id >= d) { return; }

    let i = (id.z * d.y + id.y) * d.x + id.x;
    dst[i] = src1[i] + src2[i];
}
"#;

/// Nearest-neighbour 2D affine resampling, slice by slice.
///
/// Scalars are the inverse matrix `m00 m01 m02 m10 m11 m12` mapping output
/// to source coordinates. Samples outside the source read as 0.
pub const AFFINE_TRANSFORM_2D: &str = r#"
@group(0) @binding(0) var<storage, read_write> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<storage, read> params: array<f32>;

fn extents(at: u32) -> vec3<u32> {
    return vec3<u32>(u32(params[at]), u32(params[at + 1u]), u32(params[at + 2u]));
}

@compute @workgroup_size(64)
fn affine_transform_2d(@builtin(global_invocation_id) id: vec3<u32>) {
    let g = extents(0u);
    let s = extents(4u);
    let d = extents(8u);
    if any(id >= g) || any(id >= d) { return; }

    let x = f32(id.x);
    let y = f32(id.y);
    let sx = round(params[12] * x + params[13] * y + params[14]);
    let sy = round(params[15] * x + params[16] * y + params[17]);

    var v = 0.0;
    if sx >= 0.0 && sy >= 0.0 && sx < f32(s.x) && sy < f32(s.y) && id.z < s.z {
        v = src[(id.z * s.y + u32(sy)) * s.x + u32(sx)];
    }
    dst[(id.z * d.y + id.y) * d.x + id.x] = v;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_params_layout() {
        let params = pack_params([4, 2, 1], &[[8, 3, 1], [4, 2, 1]], &[1.5, -2.0]);
        assert_eq!(
            params,
            [4.0, 2.0, 1.0, 0.0, 8.0, 3.0, 1.0, 0.0, 4.0, 2.0, 1.0, 0.0, 1.5, -2.0]
        );
        assert_eq!(scalar_offset(2), 12);
    }

    #[test]
    fn test_sources_read_scalars_after_extents() {
        // fill: one memory parameter, value is the first scalar
        assert!(FILL.contains(&format!("params[{}]", scalar_offset(1))));
        // affine: two memory parameters, six matrix entries
        for k in 0..6 {
            assert!(AFFINE_TRANSFORM_2D.contains(&format!("params[{}]", scalar_offset(2) + k)));
        }
        // source extents are used for source indexing
        assert!(COPY.contains("src[(id.z * s.y + id.y) * s.x + id.x]"));
        assert!(AFFINE_TRANSFORM_2D.contains("sx < f32(s.x)"));
    }
}
