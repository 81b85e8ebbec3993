use ash::{vk, Device};

use crate::gpu::Result;

/// Primary command buffers for one queue family.
///
/// Buffers come back through [`CommandPool::recycle`] once the queue
/// timeline shows their submission retired, and are reset on reuse.
pub(super) struct CommandPool {
    device: Device,
    raw: vk::CommandPool,
    family: u32,
    free: Vec<vk::CommandBuffer>,
    allocated: usize,
}

impl CommandPool {
    pub fn new(device: &Device, family: u32) -> Result<Self> {
        let ci = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .build();
        let raw = unsafe { device.create_command_pool(&ci, None)? };
        Ok(Self {
            device: device.clone(),
            raw,
            family,
            free: Vec::new(),
            allocated: 0,
        })
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    /// Hands out a reset command buffer in the initial state.
    pub fn acquire(&mut self) -> Result<vk::CommandBuffer> {
        if let Some(buf) = self.free.pop() {
            unsafe {
                self.device
                    .reset_command_buffer(buf, vk::CommandBufferResetFlags::empty())?;
            }
            return Ok(buf);
        }

        let cmd = unsafe {
            self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(self.raw)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1)
                    .build(),
            )?
        };
        self.allocated += 1;
        log::trace!(
            target: "kombu::vulkan",
            "family {} pool grew to {} command buffers",
            self.family,
            self.allocated
        );
        cmd.into_iter()
            .next()
            .ok_or(crate::gpu::GPUError::Backend("no command buffer allocated".into()))
    }

    pub fn recycle(&mut self, buf: vk::CommandBuffer) {
        self.free.push(buf);
    }

    /// Frees every buffer with the pool. The device must be idle.
    pub fn destroy(self) {
        unsafe { self.device.destroy_command_pool(self.raw, None) };
    }
}
