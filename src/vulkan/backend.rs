use std::sync::Arc;

use ash::vk;

use super::{
    acceleration_structure::{self, BottomLevel, TopLevel, TriangleInput},
    buffer::Buffer,
    command_pool::CommandPool,
    context::Context,
    image::Image,
};
use crate::{
    backend::{BufferUsage, RayTracingBackend, RayTracingInstance, TriangleGeometry},
    error::BackendError,
};

/// [`RayTracingBackend`] on a headless Vulkan device. Every call blocks until
/// the GPU work it records has finished.
pub struct VulkanBackend {
    command_pool: CommandPool,
}

impl VulkanBackend {
    pub fn new() -> Result<Self, BackendError> {
        let context = Arc::new(Context::new()?);
        Ok(Self {
            command_pool: CommandPool::new(context)?,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        self.command_pool.context()
    }
}

fn buffer_usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    match usage {
        BufferUsage::Vertex => {
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
        }
        BufferUsage::Index => {
            vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
        }
        BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
    }
}

fn instance_record(
    instance: &RayTracingInstance<'_, VulkanBackend>,
) -> vk::AccelerationStructureInstanceKHR {
    let m = &instance.transform;
    vk::AccelerationStructureInstanceKHR {
        transform: vk::TransformMatrixKHR {
            matrix: [
                m[0][0], m[0][1], m[0][2], m[0][3], //
                m[1][0], m[1][1], m[1][2], m[1][3], //
                m[2][0], m[2][1], m[2][2], m[2][3],
            ],
        },
        instance_custom_index_and_mask: vk::Packed24_8::new(instance.custom_index, instance.mask),
        instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
            instance.shader_binding_table_offset,
            instance.flags.bits(),
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: instance.bottom_level.structure.device_address,
        },
    }
}

impl RayTracingBackend for VulkanBackend {
    type Buffer = Buffer;
    type Image = Image;
    type BottomLevel = BottomLevel;
    type TopLevel = TopLevel;

    fn create_buffer(&self, data: &[u8], usage: BufferUsage) -> Result<Buffer, BackendError> {
        Buffer::with_data(
            self.context().clone(),
            "scene data",
            data,
            buffer_usage_flags(usage),
        )
    }

    fn create_image_rgba8(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Image, BackendError> {
        Image::new_rgba8(&self.command_pool, width, height, pixels)
    }

    fn create_bottom_level(
        &self,
        geometry: TriangleGeometry<'_, Self>,
    ) -> Result<BottomLevel, BackendError> {
        acceleration_structure::build_bottom_level(
            &self.command_pool,
            TriangleInput {
                vertex_buffer: geometry.vertex_buffer,
                vertex_count: geometry.vertex_count,
                vertex_stride: geometry.vertex_stride,
                index_buffer: geometry.index_buffer,
                index_count: geometry.index_count,
            },
        )
    }

    fn create_top_level(
        &self,
        instances: &[RayTracingInstance<'_, Self>],
    ) -> Result<TopLevel, BackendError> {
        let records: Vec<_> = instances.iter().map(instance_record).collect();
        acceleration_structure::build_top_level(&self.command_pool, &records)
    }

    fn update_top_level(
        &self,
        top_level: &mut TopLevel,
        instances: &[RayTracingInstance<'_, Self>],
    ) -> Result<(), BackendError> {
        let records: Vec<_> = instances.iter().map(instance_record).collect();
        acceleration_structure::update_top_level(&self.command_pool, top_level, &records)
    }
}
