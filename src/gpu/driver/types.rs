use bytemuck::{Pod, Zeroable};

use crate::gpu::{Buffer, ClearValue, LoadOp, QueueType, StoreOp, Swapchain, Texture};
use crate::utils::Handle;

#[cfg(feature = "kombu-serde")]
use serde::{Deserialize, Serialize};

/// Usage state of a resource, as declared by barriers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum ResourceState {
    #[default]
    Undefined,
    General,
    CopySrc,
    CopyDst,
    VertexBuffer,
    IndexBuffer,
    UniformBuffer,
    ShaderRead,
    ShaderWrite,
    ColorAttachment,
    DepthWrite,
    DepthRead,
    Present,
    HostRead,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl Default for SubresourceRange {
    fn default() -> Self {
        Self {
            base_mip: 0,
            mip_count: 1,
            base_layer: 0,
            layer_count: 1,
        }
    }
}

impl SubresourceRange {
    pub fn mips(base_mip: u32, mip_count: u32) -> Self {
        Self {
            base_mip,
            mip_count,
            ..Default::default()
        }
    }
}

/// Render target for a color slot. Exactly one of `texture` or `swapchain`
/// is consulted, selected by `is_swapchain`.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct ColorAttachment {
    pub texture: Handle<Texture>,
    pub swapchain: Handle<Swapchain>,
    pub is_swapchain: bool,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear: ClearValue,
}

impl ColorAttachment {
    pub fn texture(texture: Handle<Texture>) -> Self {
        Self {
            texture,
            ..Default::default()
        }
    }

    pub fn swapchain(swapchain: Handle<Swapchain>) -> Self {
        Self {
            swapchain,
            is_swapchain: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DepthAttachment {
    pub texture: Handle<Texture>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

impl Default for DepthAttachment {
    fn default() -> Self {
        Self {
            texture: Default::default(),
            load_op: LoadOp::Clear,
            store_op: StoreOp::DontCare,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct BufferBarrier {
    pub buffer: Handle<Buffer>,
    pub current: ResourceState,
    pub new: ResourceState,
    pub offset: u64,
    /// `0` covers the whole buffer.
    pub size: u64,
    pub src_queue: Option<QueueType>,
    pub dst_queue: Option<QueueType>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TextureBarrier {
    pub texture: Handle<Texture>,
    pub swapchain: Handle<Swapchain>,
    pub is_swapchain: bool,
    pub current: ResourceState,
    pub new: ResourceState,
    pub range: SubresourceRange,
    pub src_queue: Option<QueueType>,
    pub dst_queue: Option<QueueType>,
}

/// Placement of one mip level inside a staging buffer.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct TextureBufferRegion {
    pub buffer_offset: u64,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub mip_level: u32,
}

impl TextureBufferRegion {
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.bytes_per_pixel as u64
    }
}
