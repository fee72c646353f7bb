use std::sync::Arc;

use ash::vk;

use super::context::Context;
use crate::error::BackendError;

pub struct CommandPool {
    inner: vk::CommandPool,
    context: Arc<Context>,
}

impl CommandPool {
    pub fn new(context: Arc<Context>) -> Result<Self, BackendError> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index)
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );

        let command_pool = unsafe { context.device.create_command_pool(&create_info, None) }?;

        Ok(Self {
            inner: command_pool,
            context,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Records `record` into a fresh command buffer, submits it and waits for
    /// the queue to finish it.
    pub fn one_time_submit<F>(&self, record: F) -> Result<(), BackendError>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.context.device;

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.inner)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe { device.allocate_command_buffers(&allocate_info) }?;

        let result = self.submit_and_wait(&command_buffers, record);

        unsafe { device.free_command_buffers(self.inner, &command_buffers) };
        result
    }

    fn submit_and_wait<F>(
        &self,
        command_buffers: &[vk::CommandBuffer],
        record: F,
    ) -> Result<(), BackendError>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.context.device;
        let command_buffer = command_buffers[0];

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info) }?;
        record(device, command_buffer);
        unsafe { device.end_command_buffer(command_buffer) }?;

        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }?;
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(command_buffers)
            .build();
        let result = unsafe {
            device
                .queue_submit(self.context.queue, &[submit_info], fence)
                .and_then(|_| device.wait_for_fences(&[fence], true, u64::MAX))
        };
        unsafe { device.destroy_fence(fence, None) };

        Ok(result?)
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_command_pool(self.inner, None) };
    }
}
