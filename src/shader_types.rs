//! Records read by the ray tracing shaders. Field order and size are part of
//! the shader contract, so every struct is `#[repr(C)]`, tightly packed and `Pod`.

use bytemuck::{Pod, Zeroable};

/// One row of the scene-wide materials buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct GpuMaterial {
    pub base_color: [f32; 3],
    pub roughness: f32,
    pub metallic: f32,
    pub texture_index: i32,
    pub normal_index: i32,
    pub emission: [f32; 3],
}

/// Per-instance window into the global UV, material-ID and index buffers.
/// Row `i` belongs to the instance whose custom index is `i`.
///
/// When `has_material_ids == 0`, `material_id_offset` is not an offset at all:
/// it is the global material index used for every triangle of the instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceMetadata {
    pub uv_offset: i32,
    pub material_id_offset: i32,
    pub has_uv: i32,
    pub has_material_ids: i32,
    pub vertex_count: i32,
    pub triangle_count: i32,
    pub index_offset: i32,
    pub padding: i32,
}
