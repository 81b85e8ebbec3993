use smallvec::SmallVec;

use crate::gpu::backend::Backend;

/// Native object whose handle is gone but which the GPU may still use.
pub enum Retired<B: Backend> {
    Buffer(B::Buffer),
    Texture(B::Texture),
    Sampler(B::Sampler),
    PipelineLayout(B::PipelineLayout),
    Shader(B::Shader),
    DescriptorSet(B::DescriptorSet),
    Semaphore(B::Semaphore),
    Swapchain(B::Swapchain),
    CommandBuffer(B::CommandBuffer),
}

impl<B: Backend> Retired<B> {
    pub(crate) fn release(self, device: &mut B) {
        match self {
            Retired::Buffer(b) => device.destroy_buffer(b),
            Retired::Texture(t) => device.destroy_texture(t),
            Retired::Sampler(s) => device.destroy_sampler(s),
            Retired::PipelineLayout(l) => device.destroy_pipeline_layout(l),
            Retired::Shader(s) => device.destroy_shader(s),
            Retired::DescriptorSet(d) => device.destroy_descriptor_set(d),
            Retired::Semaphore(s) => device.destroy_semaphore(s),
            Retired::Swapchain(s) => device.destroy_swapchain(s),
            Retired::CommandBuffer(c) => device.recycle_command_buffer(c),
        }
    }
}

struct Pending<B: Backend> {
    /// Per-queue timeline values current when the object was retired.
    tokens: SmallVec<[u64; 4]>,
    object: Retired<B>,
}

/// Destruction deferred until every queue has passed the values recorded at
/// retire time.
pub struct DeletionQueue<B: Backend> {
    pending: Vec<Pending<B>>,
}

impl<B: Backend> Default for DeletionQueue<B> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl<B: Backend> DeletionQueue<B> {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn push(&mut self, tokens: &[u64], object: Retired<B>) {
        self.pending.push(Pending {
            tokens: tokens.iter().copied().collect(),
            object,
        });
    }

    /// Removes every object whose tokens are all covered by `completed`.
    pub fn collect(&mut self, completed: &[u64]) -> Vec<Retired<B>> {
        let mut ready = Vec::new();
        let mut idx = 0;
        while idx < self.pending.len() {
            let done = self.pending[idx]
                .tokens
                .iter()
                .zip(completed)
                .all(|(token, reached)| reached >= token);
            if done {
                ready.push(self.pending.swap_remove(idx).object);
            } else {
                idx += 1;
            }
        }
        ready
    }

    pub fn drain(&mut self) -> Vec<Retired<B>> {
        self.pending.drain(..).map(|p| p.object).collect()
    }
}
