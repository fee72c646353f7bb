//! The graphics backend the scene talks to. Everything the scene needs from the
//! GPU goes through [`RayTracingBackend`], so the aggregation logic never sees a
//! Vulkan handle and can run against an in-memory backend.

use crate::error::BackendError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex positions read by a bottom-level build.
    Vertex,
    /// Triangle indices read by a bottom-level build and by shaders.
    Index,
    /// Plain storage buffer read by shaders.
    Storage,
}

/// Instance flags, mirroring `VkGeometryInstanceFlagBitsKHR`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct InstanceFlags(u8);

impl InstanceFlags {
    pub const NONE: Self = Self(0);
    pub const TRIANGLE_FACING_CULL_DISABLE: Self = Self(0x1);
    pub const TRIANGLE_FLIP_FACING: Self = Self(0x2);
    pub const FORCE_OPAQUE: Self = Self(0x4);
    pub const FORCE_NO_OPAQUE: Self = Self(0x8);

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Triangle input of a bottom-level build. Positions are three `f32`s at the
/// start of every `vertex_stride` bytes, indices are `u32`.
pub struct TriangleGeometry<'a, B: RayTracingBackend + ?Sized> {
    pub vertex_buffer: &'a B::Buffer,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub index_buffer: &'a B::Buffer,
    pub index_count: u32,
}

pub struct RayTracingInstance<'a, B: RayTracingBackend + ?Sized> {
    pub bottom_level: &'a B::BottomLevel,
    /// Row-major affine transform.
    pub transform: [[f32; 4]; 3],
    /// Only the low 24 bits are visible to shaders.
    pub custom_index: u32,
    pub mask: u8,
    pub shader_binding_table_offset: u32,
    pub flags: InstanceFlags,
}

pub trait RayTracingBackend {
    type Buffer;
    type Image;
    type BottomLevel;
    type TopLevel;

    fn create_buffer(&self, data: &[u8], usage: BufferUsage) -> Result<Self::Buffer, BackendError>;

    /// `pixels` holds `width * height` tightly packed RGBA8 texels.
    fn create_image_rgba8(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Self::Image, BackendError>;

    fn create_bottom_level(
        &self,
        geometry: TriangleGeometry<'_, Self>,
    ) -> Result<Self::BottomLevel, BackendError>;

    fn create_top_level(
        &self,
        instances: &[RayTracingInstance<'_, Self>],
    ) -> Result<Self::TopLevel, BackendError>;

    /// Refits `top_level` in place. The instance count has to match the one the
    /// structure was created with.
    fn update_top_level(
        &self,
        top_level: &mut Self::TopLevel,
        instances: &[RayTracingInstance<'_, Self>],
    ) -> Result<(), BackendError>;
}
