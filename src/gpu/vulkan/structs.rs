use std::ptr::NonNull;

use ash::vk;
use smallvec::SmallVec;

use crate::gpu::{Format, QueueType};

pub struct VkBuffer {
    pub(super) raw: vk::Buffer,
    pub(super) allocation: vk_mem::Allocation,
    pub(super) size: u64,
    /// Persistent mapping of host-visible buffers.
    pub(super) mapped: Option<NonNull<u8>>,
}

// The mapping is only dereferenced through `&mut VulkanDevice` or for reads
// of host-visible memory.
unsafe impl Send for VkBuffer {}
unsafe impl Sync for VkBuffer {}

impl VkBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

pub struct VkTexture {
    pub(super) raw: vk::Image,
    pub(super) view: vk::ImageView,
    pub(super) allocation: vk_mem::Allocation,
    pub(super) format: Format,
    pub(super) aspect: vk::ImageAspectFlags,
    pub(super) extent: vk::Extent2D,
    pub(super) mip_levels: u32,
}

unsafe impl Send for VkTexture {}
unsafe impl Sync for VkTexture {}

impl VkTexture {
    pub fn raw(&self) -> vk::Image {
        self.raw
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

pub struct VkSampler {
    pub(super) raw: vk::Sampler,
}

pub struct VkPipelineLayout {
    pub(super) raw: vk::PipelineLayout,
    pub(super) set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Descriptor type of every binding, indexed by set.
    pub(super) set_bindings: Vec<Vec<(u32, vk::DescriptorType)>>,
    pub(super) push_stages: vk::ShaderStageFlags,
}

pub struct VkShader {
    pub(super) pipeline: vk::Pipeline,
    pub(super) bind_point: vk::PipelineBindPoint,
    /// Borrowed from the pipeline layout the shader was built against.
    pub(super) layout: vk::PipelineLayout,
    pub(super) push_stages: vk::ShaderStageFlags,
}

impl VkShader {
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }
}

pub struct VkDescriptorSet {
    pub(super) raw: vk::DescriptorSet,
    pub(super) pool: vk::DescriptorPool,
    pub(super) bindings: Vec<(u32, vk::DescriptorType)>,
}

pub struct VkSemaphore {
    pub(super) raw: vk::Semaphore,
}

pub struct VkSwapchain {
    pub(super) surface: vk::SurfaceKHR,
    pub(super) raw: vk::SwapchainKHR,
    pub(super) images: Vec<vk::Image>,
    pub(super) views: Vec<vk::ImageView>,
    pub(super) format: vk::Format,
    pub(super) extent: vk::Extent2D,
    pub(super) acquire_fence: vk::Fence,
    /// Binary semaphores bridging timeline waits to presentation, one per image.
    pub(super) present_ready: SmallVec<[vk::Semaphore; 4]>,
}

impl VkSwapchain {
    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VkQueue {
    pub(super) raw: vk::Queue,
    pub(super) family: u32,
    pub(super) queue_type: QueueType,
}

impl VkQueue {
    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }
}

#[derive(Debug)]
pub struct VkCommandBuffer {
    pub(super) raw: vk::CommandBuffer,
    pub(super) family: u32,
}

/// Queue family chosen for each queue type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    pub fn of(&self, queue_type: QueueType) -> u32 {
        match queue_type {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        }
    }

    pub fn unique(&self) -> SmallVec<[u32; 3]> {
        let mut out = SmallVec::new();
        for family in [self.graphics, self.compute, self.transfer] {
            if !out.contains(&family) {
                out.push(family);
            }
        }
        out
    }

    /// Picks a graphics family plus dedicated compute and transfer families
    /// when the device exposes them.
    pub fn select(props: &[vk::QueueFamilyProperties]) -> Option<Self> {
        let find = |want: vk::QueueFlags, avoid: vk::QueueFlags| {
            props
                .iter()
                .position(|p| {
                    p.queue_count > 0 && p.queue_flags.contains(want) && !p.queue_flags.intersects(avoid)
                })
                .map(|i| i as u32)
        };

        let graphics = find(vk::QueueFlags::GRAPHICS, vk::QueueFlags::empty())?;
        let compute = find(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS)
            .or_else(|| find(vk::QueueFlags::COMPUTE, vk::QueueFlags::empty()))
            .unwrap_or(graphics);
        let transfer = find(
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .unwrap_or(compute);

        Some(Self {
            graphics,
            compute,
            transfer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_dedicated_families() {
        let props = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let families = QueueFamilies::select(&props).unwrap();
        assert_eq!(
            families,
            QueueFamilies {
                graphics: 0,
                compute: 1,
                transfer: 2
            }
        );
        assert_eq!(families.unique().len(), 3);
    }

    #[test]
    fn single_family_serves_everything() {
        let props = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let families = QueueFamilies::select(&props).unwrap();
        assert_eq!(families.of(QueueType::Transfer), 0);
        assert_eq!(families.unique().as_slice(), &[0]);
    }

    #[test]
    fn no_graphics_family_is_rejected() {
        assert!(QueueFamilies::select(&[family(vk::QueueFlags::TRANSFER)]).is_none());
    }
}
