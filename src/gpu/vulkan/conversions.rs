use ash::vk;

use crate::gpu::{
    BindingKind, BufferUsage, ClearValue, CullMode, Filter, Format, IndexType, LoadOp,
    Rect2D, ResourceState, SamplerAddressMode, SamplerInfo, ShaderStage, ShaderStages, StoreOp,
    TextureUsage, Topology, VertexFormat, Viewport,
};

impl From<Filter> for vk::Filter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

impl From<Filter> for vk::SamplerMipmapMode {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
            Filter::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

impl From<SamplerAddressMode> for vk::SamplerAddressMode {
    fn from(mode: SamplerAddressMode) -> Self {
        match mode {
            SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            SamplerAddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            SamplerAddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            SamplerAddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

impl From<SamplerInfo> for vk::SamplerCreateInfo {
    fn from(info: SamplerInfo) -> Self {
        vk::SamplerCreateInfo::builder()
            .mag_filter(info.mag_filter.into())
            .min_filter(info.min_filter.into())
            .mipmap_mode(info.mipmap_filter.into())
            .address_mode_u(info.address_mode_u.into())
            .address_mode_v(info.address_mode_v.into())
            .address_mode_w(info.address_mode_w.into())
            .anisotropy_enable(info.max_anisotropy.is_some())
            .max_anisotropy(info.max_anisotropy.unwrap_or(1.0))
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .build()
    }
}

impl From<Format> for vk::Format {
    fn from(format: Format) -> Self {
        match format {
            Format::R8Unorm => vk::Format::R8_UNORM,
            Format::R8Uint => vk::Format::R8_UINT,
            Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::RGBA8Srgb => vk::Format::R8G8B8A8_SRGB,
            Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::BGRA8Srgb => vk::Format::B8G8R8A8_SRGB,
            Format::RGBA16Float => vk::Format::R16G16B16A16_SFLOAT,
            Format::RGBA32Float => vk::Format::R32G32B32A32_SFLOAT,
            Format::D32Float => vk::Format::D32_SFLOAT,
            Format::D24S8 => vk::Format::D24_UNORM_S8_UINT,
        }
    }
}

pub(super) fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    match format {
        Format::D32Float => vk::ImageAspectFlags::DEPTH,
        Format::D24S8 => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

impl From<VertexFormat> for vk::Format {
    fn from(format: VertexFormat) -> Self {
        match format {
            VertexFormat::Float32 => vk::Format::R32_SFLOAT,
            VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
            VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
            VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
            VertexFormat::Uint32 => vk::Format::R32_UINT,
            VertexFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

impl From<BufferUsage> for vk::BufferUsageFlags {
    fn from(usage: BufferUsage) -> Self {
        // Every buffer can be the target of a staged upload.
        let mut flags = vk::BufferUsageFlags::TRANSFER_DST;
        if usage.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if usage.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if usage.contains(BufferUsage::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if usage.contains(BufferUsage::INDIRECT) {
            flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        if usage.contains(BufferUsage::COPY_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        flags
    }
}

impl From<TextureUsage> for vk::ImageUsageFlags {
    fn from(usage: TextureUsage) -> Self {
        let mut flags = vk::ImageUsageFlags::TRANSFER_DST;
        if usage.contains(TextureUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if usage.contains(TextureUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if usage.contains(TextureUsage::COLOR_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if usage.contains(TextureUsage::DEPTH_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if usage.contains(TextureUsage::COPY_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        flags
    }
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

impl From<ShaderStages> for vk::ShaderStageFlags {
    fn from(stages: ShaderStages) -> Self {
        let mut flags = vk::ShaderStageFlags::empty();
        if stages.contains(ShaderStages::VERTEX) {
            flags |= vk::ShaderStageFlags::VERTEX;
        }
        if stages.contains(ShaderStages::FRAGMENT) {
            flags |= vk::ShaderStageFlags::FRAGMENT;
        }
        if stages.contains(ShaderStages::COMPUTE) {
            flags |= vk::ShaderStageFlags::COMPUTE;
        }
        if flags.is_empty() {
            vk::ShaderStageFlags::ALL
        } else {
            flags
        }
    }
}

impl From<BindingKind> for vk::DescriptorType {
    fn from(kind: BindingKind) -> Self {
        match kind {
            BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            BindingKind::SampledTexture => vk::DescriptorType::SAMPLED_IMAGE,
            BindingKind::StorageTexture => vk::DescriptorType::STORAGE_IMAGE,
            BindingKind::Sampler => vk::DescriptorType::SAMPLER,
            BindingKind::CombinedTextureSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

impl From<Topology> for vk::PrimitiveTopology {
    fn from(topology: Topology) -> Self {
        match topology {
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
            Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
        }
    }
}

impl From<CullMode> for vk::CullModeFlags {
    fn from(mode: CullMode) -> Self {
        match mode {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

impl From<IndexType> for vk::IndexType {
    fn from(ty: IndexType) -> Self {
        match ty {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }
}

impl From<LoadOp> for vk::AttachmentLoadOp {
    fn from(op: LoadOp) -> Self {
        match op {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

impl From<StoreOp> for vk::AttachmentStoreOp {
    fn from(op: StoreOp) -> Self {
        match op {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

impl From<ClearValue> for vk::ClearValue {
    fn from(value: ClearValue) -> Self {
        match value {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::UintColor(uint32) => vk::ClearValue {
                color: vk::ClearColorValue { uint32 },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

impl From<Rect2D> for vk::Rect2D {
    fn from(rect: Rect2D) -> Self {
        vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.x,
                y: rect.y,
            },
            extent: vk::Extent2D {
                width: rect.width,
                height: rect.height,
            },
        }
    }
}

impl From<Viewport> for vk::Viewport {
    fn from(v: Viewport) -> Self {
        vk::Viewport {
            x: v.x,
            y: v.y,
            width: v.width,
            height: v.height,
            min_depth: v.min_depth,
            max_depth: v.max_depth,
        }
    }
}

/// Synchronization scope of a resource in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct StateScope {
    pub stages: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl From<ResourceState> for StateScope {
    fn from(state: ResourceState) -> Self {
        use vk::AccessFlags2 as A;
        use vk::ImageLayout as L;
        use vk::PipelineStageFlags2 as S;

        let (stages, access, layout) = match state {
            ResourceState::Undefined => (S::TOP_OF_PIPE, A::NONE, L::UNDEFINED),
            ResourceState::General => (
                S::ALL_COMMANDS,
                A::MEMORY_READ | A::MEMORY_WRITE,
                L::GENERAL,
            ),
            ResourceState::CopySrc => (S::TRANSFER, A::TRANSFER_READ, L::TRANSFER_SRC_OPTIMAL),
            ResourceState::CopyDst => (S::TRANSFER, A::TRANSFER_WRITE, L::TRANSFER_DST_OPTIMAL),
            ResourceState::VertexBuffer => (
                S::VERTEX_ATTRIBUTE_INPUT,
                A::VERTEX_ATTRIBUTE_READ,
                L::UNDEFINED,
            ),
            ResourceState::IndexBuffer => (S::INDEX_INPUT, A::INDEX_READ, L::UNDEFINED),
            ResourceState::UniformBuffer => (S::ALL_COMMANDS, A::UNIFORM_READ, L::UNDEFINED),
            ResourceState::ShaderRead => (
                S::ALL_COMMANDS,
                A::SHADER_READ,
                L::SHADER_READ_ONLY_OPTIMAL,
            ),
            ResourceState::ShaderWrite => (
                S::ALL_COMMANDS,
                A::SHADER_READ | A::SHADER_WRITE,
                L::GENERAL,
            ),
            ResourceState::ColorAttachment => (
                S::COLOR_ATTACHMENT_OUTPUT,
                A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
                L::COLOR_ATTACHMENT_OPTIMAL,
            ),
            ResourceState::DepthWrite => (
                S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
            ResourceState::DepthRead => (
                S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                A::DEPTH_STENCIL_ATTACHMENT_READ,
                L::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            ),
            ResourceState::Present => (S::BOTTOM_OF_PIPE, A::NONE, L::PRESENT_SRC_KHR),
            ResourceState::HostRead => (S::HOST, A::HOST_READ, L::GENERAL),
        };
        StateScope {
            stages,
            access,
            layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_states_map_to_transfer_layouts() {
        let dst = StateScope::from(ResourceState::CopyDst);
        assert_eq!(dst.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(dst.stages, vk::PipelineStageFlags2::TRANSFER);

        let present = StateScope::from(ResourceState::Present);
        assert_eq!(present.layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn depth_formats_use_depth_aspect() {
        assert_eq!(aspect_mask(Format::D32Float), vk::ImageAspectFlags::DEPTH);
        assert!(aspect_mask(Format::D24S8).contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(aspect_mask(Format::RGBA8Unorm), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn empty_stage_set_covers_everything() {
        let flags: vk::ShaderStageFlags = ShaderStages::empty().into();
        assert_eq!(flags, vk::ShaderStageFlags::ALL);
    }
}
