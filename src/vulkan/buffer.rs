use std::sync::Arc;

use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};
use log::error;

use super::context::Context;
use crate::error::BackendError;

pub struct Buffer {
    pub inner: vk::Buffer,
    pub usage: vk::BufferUsageFlags,
    pub size: vk::DeviceSize,
    pub device_address: vk::DeviceAddress,
    allocation: Option<Allocation>,
    context: Arc<Context>,
}

impl Buffer {
    pub fn new(
        context: Arc<Context>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Buffer, BackendError> {
        let device = &context.device;
        let usage = usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

        // Zero sized buffers are not allowed
        let create_info = vk::BufferCreateInfo::builder()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&create_info, None) }?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = context.allocator().lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err.into());
            }
        };

        let mut buffer = Buffer {
            inner: buffer,
            usage,
            size,
            device_address: 0,
            allocation: None,
            context,
        };
        // From here on Drop cleans up
        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        buffer.allocation = Some(allocation);
        unsafe {
            buffer
                .context
                .device
                .bind_buffer_memory(buffer.inner, memory, offset)
        }?;

        let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer.inner);
        buffer.device_address = unsafe { buffer.context.device.get_buffer_device_address(&info) };

        Ok(buffer)
    }

    /// Host visible buffer filled with `data`.
    pub fn with_data(
        context: Arc<Context>,
        name: &str,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<Buffer, BackendError> {
        let mut buffer = Buffer::new(
            context,
            name,
            data.len() as vk::DeviceSize,
            usage,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.copy_data(data)?;
        Ok(buffer)
    }

    pub fn copy_data(&mut self, data: &[u8]) -> Result<(), BackendError> {
        if data.len() as vk::DeviceSize > self.size {
            return Err(BackendError::InvalidInput(format!(
                "{} bytes do not fit into a buffer of {} bytes",
                data.len(),
                self.size
            )));
        }
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| BackendError::InvalidInput("buffer is not host visible".to_string()))?;
        mapped[..data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_buffer(self.inner, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(err) = self.context.allocator().lock().free(allocation) {
                error!("Failed to free buffer memory: {err}");
            }
        }
    }
}
