//! Host-memory backend.
//!
//! Buffers and textures live in `Vec<u8>`s, copies really move bytes and
//! every other command is recorded into a trace. Queues are FIFO and honour
//! semaphore waits, so ordering and synchronization can be tested without a
//! GPU. In [`ExecutionMode::Manual`] nothing completes until the test drives
//! it through [`SoftwareGpu`].

mod encoder;
mod gpu;

pub use encoder::{SoftCommandList, SoftOp, SoftwareEncoder, TextureTarget};
pub use gpu::{ExecutionMode, SoftwareGpu, TraceEvent};

use std::sync::Arc;
use std::time::Duration;

use smallvec::SmallVec;

use self::gpu::TextureMemory;
use crate::gpu::backend::{Backend, NativeDescriptor, NativeDescriptorWrite};
use crate::gpu::{
    BufferInfo, Extent, GPUError, PipelineLayoutInfo, QueueType, Result, SamplerInfo, ShaderInfo,
    SwapchainInfo, TextureInfo,
};

#[derive(Debug)]
pub struct SoftBuffer {
    pub id: u64,
    pub size: u64,
}

#[derive(Debug)]
pub struct SoftTexture {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

#[derive(Debug)]
pub struct SoftSampler {
    pub id: u64,
}

#[derive(Debug)]
pub struct SoftPipelineLayout {
    pub id: u64,
    pub set_count: u32,
    pub push_constant_size: u32,
}

#[derive(Debug)]
pub struct SoftShader {
    pub id: u64,
    pub compute: bool,
    pub push_constant_size: u32,
}

#[derive(Debug)]
pub struct SoftDescriptorSet {
    pub id: u64,
    pub set: u32,
    /// (binding, array element) pairs written so far.
    pub written: Vec<(u32, u32)>,
}

#[derive(Debug)]
pub struct SoftSemaphore {
    pub id: u64,
}

#[derive(Debug)]
pub struct SoftSwapchain {
    pub id: u64,
    pub extent: Extent,
    pub image_count: u32,
    next: u32,
}

#[derive(Debug)]
pub struct SoftQueue {
    pub id: usize,
    pub queue_type: QueueType,
}

pub struct SoftwareDevice {
    gpu: Arc<SoftwareGpu>,
    next_id: u64,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new(ExecutionMode::Immediate)
    }
}

impl SoftwareDevice {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            gpu: Arc::new(SoftwareGpu::new(mode)),
            next_id: 1,
        }
    }

    /// Shared handle to the simulated GPU, usable after the device has been
    /// moved into a context.
    pub fn gpu(&self) -> Arc<SoftwareGpu> {
        Arc::clone(&self.gpu)
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn mip_extent(base: u32, mip: u32) -> u32 {
    (base >> mip).max(1)
}

impl Backend for SoftwareDevice {
    type Buffer = SoftBuffer;
    type Texture = SoftTexture;
    type Sampler = SoftSampler;
    type Shader = SoftShader;
    type PipelineLayout = SoftPipelineLayout;
    type DescriptorSet = SoftDescriptorSet;
    type Semaphore = SoftSemaphore;
    type Swapchain = SoftSwapchain;
    type Queue = SoftQueue;
    type CommandBuffer = SoftCommandList;
    type Encoder = SoftwareEncoder;

    fn name(&self) -> &'static str {
        "software"
    }

    fn create_queue(&mut self, queue_type: QueueType, _index: usize) -> Result<SoftQueue> {
        Ok(SoftQueue {
            id: self.gpu.add_queue(queue_type)?,
            queue_type,
        })
    }

    fn create_buffer(&mut self, info: &BufferInfo) -> Result<SoftBuffer> {
        if info.byte_size == 0 {
            return Err(GPUError::Configuration(format!(
                "buffer '{}' has zero size",
                info.debug_name
            )));
        }
        let id = self.alloc_id();
        self.gpu
            .lock()?
            .buffers
            .insert(id, vec![0; info.byte_size as usize]);
        Ok(SoftBuffer {
            id,
            size: info.byte_size,
        })
    }

    fn destroy_buffer(&mut self, buffer: SoftBuffer) {
        if let Ok(mut state) = self.gpu.lock() {
            state.buffers.remove(&buffer.id);
        }
    }

    fn write_buffer(&mut self, buffer: &SoftBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.gpu.lock()?;
        let mem = state
            .buffers
            .get_mut(&buffer.id)
            .ok_or(GPUError::InvalidHandle("buffer"))?;
        let start = offset as usize;
        mem[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &SoftBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
        let state = self.gpu.lock()?;
        let mem = state
            .buffers
            .get(&buffer.id)
            .ok_or(GPUError::InvalidHandle("buffer"))?;
        let start = offset as usize;
        out.copy_from_slice(&mem[start..start + out.len()]);
        Ok(())
    }

    fn create_texture(&mut self, info: &TextureInfo) -> Result<SoftTexture> {
        if info.width == 0 || info.height == 0 || info.mip_levels == 0 {
            return Err(GPUError::Configuration(format!(
                "texture '{}' has an empty extent",
                info.debug_name
            )));
        }
        let id = self.alloc_id();
        let bpp = info.format.bytes_per_pixel();
        let mips = (0..info.mip_levels)
            .map(|mip| {
                let w = mip_extent(info.width, mip) as usize;
                let h = mip_extent(info.height, mip) as usize;
                vec![0; w * h * bpp as usize]
            })
            .collect();
        self.gpu.lock()?.textures.insert(id, TextureMemory { mips });
        Ok(SoftTexture {
            id,
            width: info.width,
            height: info.height,
            mip_levels: info.mip_levels,
        })
    }

    fn destroy_texture(&mut self, texture: SoftTexture) {
        if let Ok(mut state) = self.gpu.lock() {
            state.textures.remove(&texture.id);
        }
    }

    fn create_sampler(&mut self, _info: &SamplerInfo) -> Result<SoftSampler> {
        Ok(SoftSampler { id: self.alloc_id() })
    }

    fn destroy_sampler(&mut self, _sampler: SoftSampler) {}

    fn create_pipeline_layout(&mut self, info: &PipelineLayoutInfo) -> Result<SoftPipelineLayout> {
        let set_count = info
            .bindings
            .iter()
            .map(|b| b.set + 1)
            .max()
            .unwrap_or(0);
        Ok(SoftPipelineLayout {
            id: self.alloc_id(),
            set_count,
            push_constant_size: info.push_constant_size,
        })
    }

    fn destroy_pipeline_layout(&mut self, _layout: SoftPipelineLayout) {}

    fn create_shader(
        &mut self,
        info: &ShaderInfo,
        layout: &SoftPipelineLayout,
    ) -> Result<SoftShader> {
        if info.stages.is_empty() {
            return Err(GPUError::Configuration(format!(
                "shader '{}' has no stages",
                info.debug_name
            )));
        }
        if info.stages.iter().any(|s| s.blob.data.is_empty()) {
            return Err(GPUError::Configuration(format!(
                "shader '{}' has an empty stage blob",
                info.debug_name
            )));
        }
        Ok(SoftShader {
            id: self.alloc_id(),
            compute: info.is_compute(),
            push_constant_size: layout.push_constant_size,
        })
    }

    fn destroy_shader(&mut self, _shader: SoftShader) {}

    fn create_descriptor_set(
        &mut self,
        layout: &SoftPipelineLayout,
        set: u32,
    ) -> Result<SoftDescriptorSet> {
        if set >= layout.set_count {
            return Err(GPUError::Configuration(format!(
                "layout has {} sets, requested set {}",
                layout.set_count, set
            )));
        }
        Ok(SoftDescriptorSet {
            id: self.alloc_id(),
            set,
            written: Vec::new(),
        })
    }

    fn update_descriptor_set(
        &mut self,
        set: &mut SoftDescriptorSet,
        writes: &[NativeDescriptorWrite<'_, Self>],
    ) -> Result<()> {
        for write in writes {
            if let NativeDescriptor::Buffer { buffer, offset, size } = write.resource {
                if offset.saturating_add(size) > buffer.size {
                    return Err(GPUError::OutOfBounds {
                        offset,
                        size,
                        capacity: buffer.size,
                    });
                }
            }
            let key = (write.binding, write.array_element);
            if !set.written.contains(&key) {
                set.written.push(key);
            }
        }
        Ok(())
    }

    fn destroy_descriptor_set(&mut self, _set: SoftDescriptorSet) {}

    fn create_semaphore(&mut self, initial_value: u64) -> Result<SoftSemaphore> {
        let id = self.alloc_id();
        self.gpu.add_semaphore(id, initial_value)?;
        Ok(SoftSemaphore { id })
    }

    fn destroy_semaphore(&mut self, semaphore: SoftSemaphore) {
        let _ = self.gpu.remove_semaphore(semaphore.id);
    }

    fn semaphore_value(&self, semaphore: &SoftSemaphore) -> Result<u64> {
        self.gpu.semaphore_value(semaphore.id)
    }

    fn wait_semaphore(
        &self,
        semaphore: &SoftSemaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        self.gpu.wait(semaphore.id, value, timeout)
    }

    fn begin_encoding(&mut self, queue_type: QueueType) -> Result<SoftwareEncoder> {
        Ok(SoftwareEncoder::new(queue_type))
    }

    fn finish_encoding(&mut self, encoder: SoftwareEncoder) -> Result<SoftCommandList> {
        encoder.finish()
    }

    fn submit(
        &mut self,
        queue: &SoftQueue,
        buffers: &[&SoftCommandList],
        waits: &[(&SoftSemaphore, u64)],
        signals: &[(&SoftSemaphore, u64)],
    ) -> Result<()> {
        let ops: Arc<[SoftOp]> = match buffers {
            [single] => Arc::clone(&single.ops),
            _ => buffers
                .iter()
                .flat_map(|b| b.ops.iter().cloned())
                .collect::<Vec<_>>()
                .into(),
        };
        let waits: SmallVec<[(u64, u64); 4]> = waits.iter().map(|(s, v)| (s.id, *v)).collect();
        let signals: SmallVec<[(u64, u64); 4]> =
            signals.iter().map(|(s, v)| (s.id, *v)).collect();

        log::trace!(
            target: "kombu::software",
            "queue {} ({:?}): {} ops, {} waits, {} signals",
            queue.id,
            queue.queue_type,
            ops.len(),
            waits.len(),
            signals.len()
        );
        self.gpu.enqueue(queue.id, ops, waits, signals)
    }

    fn create_swapchain(&mut self, info: &SwapchainInfo) -> Result<SoftSwapchain> {
        if info.extent.width == 0 || info.extent.height == 0 {
            return Err(GPUError::SwapchainOutOfDate);
        }
        Ok(SoftSwapchain {
            id: self.alloc_id(),
            extent: info.extent,
            image_count: info.image_count.max(1),
            next: 0,
        })
    }

    fn recreate_swapchain(&mut self, swapchain: &mut SoftSwapchain, info: &SwapchainInfo) -> Result<()> {
        if info.extent.width == 0 || info.extent.height == 0 {
            return Err(GPUError::SwapchainOutOfDate);
        }
        swapchain.extent = info.extent;
        swapchain.image_count = info.image_count.max(1);
        swapchain.next = 0;
        Ok(())
    }

    fn destroy_swapchain(&mut self, _swapchain: SoftSwapchain) {}

    fn swapchain_image_count(&self, swapchain: &SoftSwapchain) -> u32 {
        swapchain.image_count
    }

    fn acquire_next_image(&mut self, swapchain: &mut SoftSwapchain) -> Result<u32> {
        let image = swapchain.next;
        swapchain.next = (swapchain.next + 1) % swapchain.image_count;
        Ok(image)
    }

    fn present(
        &mut self,
        queue: &SoftQueue,
        swapchain: &mut SoftSwapchain,
        image: u32,
        waits: &[(&SoftSemaphore, u64)],
    ) -> Result<()> {
        let op = SoftOp::Present {
            swapchain: swapchain.id,
            image,
        };
        let waits = waits.iter().map(|(s, v)| (s.id, *v)).collect();
        self.gpu
            .enqueue(queue.id, Arc::from(vec![op]), waits, SmallVec::new())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.gpu.wait_idle()
    }

    fn destroy(self) {
        log::debug!(target: "kombu::software", "software device destroyed");
    }
}
