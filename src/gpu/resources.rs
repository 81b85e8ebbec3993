//! Handle registries for GPU objects.
//!
//! Each registry maps a backend-agnostic `Handle<Marker>` to an entry holding
//! the native object plus the metadata the context validates against.

use smallvec::SmallVec;

use super::backend::Backend;
use super::{
    Buffer, BufferUsage, DescriptorSet, Extent, Format, GPUError, HeapType, PipelineLayout,
    Result, Sampler, SamplerInfo, Semaphore, Shader, ShaderBinding, ShaderStage, Swapchain,
    Texture, TextureUsage,
};
use crate::utils::{Handle, ResourceList};

pub struct BufferEntry<B: Backend> {
    pub native: B::Buffer,
    pub size: u64,
    pub heap: HeapType,
    pub usage: BufferUsage,
    pub debug_name: String,
}

impl<B: Backend> BufferEntry<B> {
    pub(crate) fn check_range(&self, offset: u64, size: u64) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(GPUError::OutOfBounds {
                offset,
                size,
                capacity: self.size,
            }),
        }
    }
}

pub struct TextureEntry<B: Backend> {
    pub native: B::Texture,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub usage: TextureUsage,
    pub debug_name: String,
}

pub struct SamplerEntry<B: Backend> {
    pub native: B::Sampler,
    pub info: SamplerInfo,
}

pub struct PipelineLayoutEntry<B: Backend> {
    pub native: B::PipelineLayout,
    pub bindings: Vec<ShaderBinding>,
    pub push_constant_size: u32,
    pub debug_name: String,
}

pub struct ShaderEntry<B: Backend> {
    pub native: B::Shader,
    pub layout: Handle<PipelineLayout>,
    /// The layout was generated for this shader and dies with it.
    pub owns_layout: bool,
    pub stages: SmallVec<[ShaderStage; 2]>,
    pub debug_name: String,
}

impl<B: Backend> ShaderEntry<B> {
    pub fn is_compute(&self) -> bool {
        self.stages.contains(&ShaderStage::Compute)
    }
}

pub struct DescriptorSetEntry<B: Backend> {
    pub native: B::DescriptorSet,
    pub layout: Handle<PipelineLayout>,
    pub set: u32,
    pub debug_name: String,
}

pub struct SemaphoreEntry<B: Backend> {
    pub native: B::Semaphore,
    /// Highest value any submission so far will signal.
    pub pending_value: u64,
}

pub struct SwapchainEntry<B: Backend> {
    pub native: B::Swapchain,
    pub extent: Extent,
    pub format: Format,
    pub image_count: u32,
    /// Image acquired for the current frame, if any.
    pub current_image: Option<u32>,
}

impl<B: Backend> SwapchainEntry<B> {
    pub fn current_image(&self) -> Result<u32> {
        self.current_image.ok_or(GPUError::NoImageAcquired)
    }
}

pub struct Resources<B: Backend> {
    pub(crate) buffers: ResourceList<BufferEntry<B>, Buffer>,
    pub(crate) textures: ResourceList<TextureEntry<B>, Texture>,
    pub(crate) samplers: ResourceList<SamplerEntry<B>, Sampler>,
    pub(crate) pipeline_layouts: ResourceList<PipelineLayoutEntry<B>, PipelineLayout>,
    pub(crate) shaders: ResourceList<ShaderEntry<B>, Shader>,
    pub(crate) descriptor_sets: ResourceList<DescriptorSetEntry<B>, DescriptorSet>,
    pub(crate) semaphores: ResourceList<SemaphoreEntry<B>, Semaphore>,
    pub(crate) swapchains: ResourceList<SwapchainEntry<B>, Swapchain>,
}

impl<B: Backend> Default for Resources<B> {
    fn default() -> Self {
        Self {
            buffers: Default::default(),
            textures: Default::default(),
            samplers: Default::default(),
            pipeline_layouts: Default::default(),
            shaders: Default::default(),
            descriptor_sets: Default::default(),
            semaphores: Default::default(),
            swapchains: Default::default(),
        }
    }
}

macro_rules! lookups {
    ($($list:ident, $get:ident, $get_mut:ident, $marker:ty, $entry:ident, $what:literal;)*) => {
        impl<B: Backend> Resources<B> {
            $(
                pub fn $get(&self, h: Handle<$marker>) -> Result<&$entry<B>> {
                    self.$list.get_ref(h).ok_or(GPUError::InvalidHandle($what))
                }

                pub(crate) fn $get_mut(&mut self, h: Handle<$marker>) -> Result<&mut $entry<B>> {
                    self.$list.get_ref_mut(h).ok_or(GPUError::InvalidHandle($what))
                }
            )*
        }
    };
}

lookups! {
    buffers, buffer, buffer_mut, Buffer, BufferEntry, "buffer";
    textures, texture, texture_mut, Texture, TextureEntry, "texture";
    samplers, sampler, sampler_mut, Sampler, SamplerEntry, "sampler";
    pipeline_layouts, pipeline_layout, pipeline_layout_mut, PipelineLayout, PipelineLayoutEntry, "pipeline layout";
    shaders, shader, shader_mut, Shader, ShaderEntry, "shader";
    descriptor_sets, descriptor_set, descriptor_set_mut, DescriptorSet, DescriptorSetEntry, "descriptor set";
    semaphores, semaphore, semaphore_mut, Semaphore, SemaphoreEntry, "semaphore";
    swapchains, swapchain, swapchain_mut, Swapchain, SwapchainEntry, "swapchain";
}

pub(crate) fn insert<T, M>(list: &mut ResourceList<T, M>, entry: T) -> Result<Handle<M>> {
    list.push(entry).ok_or(GPUError::SlotError())
}

impl<B: Backend> Resources<B> {
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}
