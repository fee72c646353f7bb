use std::sync::Arc;

use ash::vk::{
    self, AccessFlags2, Extent3D, Format, ImageCreateFlags, ImageLayout, ImageMemoryBarrier2,
    ImageSubresourceRange, ImageTiling, ImageType, ImageUsageFlags, PipelineStageFlags2,
    SampleCountFlags, SharingMode,
};
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};
use log::error;

use super::{buffer::Buffer, command_pool::CommandPool, context::Context};
use crate::error::BackendError;

/// Sampled 2D image with a single mip level and its view.
pub struct Image {
    pub inner: vk::Image,
    pub view: vk::ImageView,

    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub layout: vk::ImageLayout,

    allocation: Option<Allocation>,
    context: Arc<Context>,
}

impl Image {
    pub fn new(
        context: Arc<Context>,
        create_info: &vk::ImageCreateInfo,
    ) -> Result<Image, BackendError> {
        let device = &context.device;

        let image = unsafe { device.create_image(create_info, None) }?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = context.allocator().lock().allocate(&AllocationCreateDesc {
            name: "texture",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err.into());
            }
        };

        let mut result = Self {
            inner: image,
            view: vk::ImageView::null(),
            format: create_info.format,
            extent: create_info.extent,
            layout: create_info.initial_layout,
            allocation: None,
            context,
        };
        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        result.allocation = Some(allocation);
        let device = &result.context.device;
        unsafe { device.bind_image_memory(result.inner, memory, offset) }?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(result.inner)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(result.format)
            .subresource_range(result.full_subresource_range(vk::ImageAspectFlags::COLOR));
        result.view = unsafe { device.create_image_view(&view_info, None) }?;

        Ok(result)
    }

    /// Device local RGBA8 texture holding `pixels`, ready for shader reads.
    pub fn new_rgba8(
        command_pool: &CommandPool,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Image, BackendError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(BackendError::InvalidInput(format!(
                "{width}x{height} RGBA8 image needs {expected} bytes, got {}",
                pixels.len()
            )));
        }

        let context = command_pool.context();
        let create_info = vk::ImageCreateInfo {
            format: Format::R8G8B8A8_UNORM,
            extent: Extent3D {
                width,
                height,
                depth: 1,
            },
            usage: ImageUsageFlags::SAMPLED | ImageUsageFlags::TRANSFER_DST,
            ..simple_image_create_info()
        };
        let mut image = Image::new(context.clone(), &create_info)?;

        let staging = Buffer::with_data(
            context.clone(),
            "texture staging",
            pixels,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        command_pool.one_time_submit(|device, command_buffer| {
            image.copy_from_buffer(device, command_buffer, &staging)
        })?;
        image.layout = ImageLayout::SHADER_READ_ONLY_OPTIMAL;

        Ok(image)
    }

    fn copy_from_buffer(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        buffer: &Buffer,
    ) {
        let range = self.full_subresource_range(vk::ImageAspectFlags::COLOR);

        self.insert_image_memory_barrier(
            device,
            command_buffer,
            ImageLayout::UNDEFINED,
            ImageLayout::TRANSFER_DST_OPTIMAL,
            PipelineStageFlags2::NONE,
            PipelineStageFlags2::COPY,
            AccessFlags2::empty(),
            AccessFlags2::TRANSFER_WRITE,
            range,
        );

        let buffer_image_copy = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: self.extent,
        };

        unsafe {
            device.cmd_copy_buffer_to_image(
                command_buffer,
                buffer.inner,
                self.inner,
                ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&buffer_image_copy),
            )
        };

        self.insert_image_memory_barrier(
            device,
            command_buffer,
            ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            PipelineStageFlags2::COPY,
            PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            AccessFlags2::TRANSFER_WRITE,
            AccessFlags2::SHADER_READ,
            range,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_image_memory_barrier(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_stage_mask: PipelineStageFlags2,
        dst_stage_mask: PipelineStageFlags2,
        src_access_mask: vk::AccessFlags2,
        dst_access_mask: vk::AccessFlags2,
        subresource_range: ImageSubresourceRange,
    ) {
        let barrier = vk::ImageMemoryBarrier2 {
            old_layout,
            new_layout,
            src_stage_mask,
            dst_stage_mask,
            src_access_mask,
            dst_access_mask,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: self.inner,
            subresource_range,
            ..ImageMemoryBarrier2::default()
        };

        let dependency_info =
            vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));

        unsafe { device.cmd_pipeline_barrier2(command_buffer, &dependency_info) };
    }

    pub fn full_subresource_range(
        &self,
        aspect_mask: vk::ImageAspectFlags,
    ) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

pub fn simple_image_create_info() -> vk::ImageCreateInfo {
    vk::ImageCreateInfo {
        flags: ImageCreateFlags::empty(),
        image_type: ImageType::TYPE_2D,
        format: Format::UNDEFINED,
        extent: Extent3D {
            width: 0,
            height: 0,
            depth: 0,
        },
        mip_levels: 1,
        array_layers: 1,
        samples: SampleCountFlags::TYPE_1,
        tiling: ImageTiling::OPTIMAL,
        usage: ImageUsageFlags::empty(),
        sharing_mode: SharingMode::EXCLUSIVE,
        initial_layout: ImageLayout::UNDEFINED,
        ..Default::default()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let device = &self.context.device;
        unsafe { device.destroy_image_view(self.view, None) };
        unsafe { device.destroy_image(self.inner, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(err) = self.context.allocator().lock().free(allocation) {
                error!("Failed to free image memory: {err}");
            }
        }
    }
}
