use bitflags::bitflags;
use raw_window_handle::RawWindowHandle;
use std::hash::{Hash, Hasher};

use super::{Buffer, PipelineLayout, Sampler, Semaphore, Texture};
use crate::utils::Handle;

#[cfg(feature = "kombu-serde")]
use serde::{Deserialize, Serialize};

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum QueueType {
    #[default]
    Graphics,
    Compute,
    Transfer,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer];

    pub fn mask(self) -> QueueMask {
        match self {
            QueueType::Graphics => QueueMask::GRAPHICS,
            QueueType::Compute => QueueMask::COMPUTE,
            QueueType::Transfer => QueueMask::TRANSFER,
        }
    }

    /// Whether a queue of this type can execute a stream recorded for `stream`.
    ///
    /// Graphics queues run everything, compute queues run compute and
    /// transfer work, transfer queues only run transfer work.
    pub fn accepts(self, stream: QueueType) -> bool {
        match self {
            QueueType::Graphics => true,
            QueueType::Compute => matches!(stream, QueueType::Compute | QueueType::Transfer),
            QueueType::Transfer => stream == QueueType::Transfer,
        }
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueMask: u8 {
        const GRAPHICS = 0x1;
        const COMPUTE = 0x2;
        const TRANSFER = 0x4;
        const GRAPHICS_COMPUTE = Self::GRAPHICS.bits() | Self::COMPUTE.bits();
        const ALL = Self::GRAPHICS.bits() | Self::COMPUTE.bits() | Self::TRANSFER.bits();
    }
}

/// Where a buffer lives and whether the host can map it.
#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum HeapType {
    #[default]
    GpuOnly,
    Upload,
    Readback,
}

impl HeapType {
    pub fn host_visible(self) -> bool {
        !matches!(self, HeapType::GpuOnly)
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 0x1;
        const INDEX = 0x2;
        const UNIFORM = 0x4;
        const STORAGE = 0x8;
        const INDIRECT = 0x10;
        const COPY_SRC = 0x20;
        const COPY_DST = 0x40;
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 0x1;
        const STORAGE = 0x2;
        const COLOR_ATTACHMENT = 0x4;
        const DEPTH_ATTACHMENT = 0x8;
        const COPY_SRC = 0x10;
        const COPY_DST = 0x20;
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum Format {
    R8Unorm,
    R8Uint,
    #[default]
    RGBA8Unorm,
    RGBA8Srgb,
    BGRA8Unorm,
    BGRA8Srgb,
    RGBA16Float,
    RGBA32Float,
    D32Float,
    D24S8,
}

impl Format {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::R8Unorm | Format::R8Uint => 1,
            Format::RGBA8Unorm
            | Format::RGBA8Srgb
            | Format::BGRA8Unorm
            | Format::BGRA8Srgb
            | Format::D32Float
            | Format::D24S8 => 4,
            Format::RGBA16Float => 8,
            Format::RGBA32Float => 16,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Format::D32Float | Format::D24S8)
    }
}

#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Hash, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1024.0,
            height: 1024.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum ClearValue {
    Color([f32; 4]),
    UintColor([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Color([0.0; 4])
    }
}

impl Hash for ClearValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ClearValue::Color(vals) => {
                0u8.hash(state);
                for v in vals {
                    v.to_bits().hash(state);
                }
            }
            ClearValue::UintColor(vals) => {
                1u8.hash(state);
                vals.hash(state);
            }
            ClearValue::DepthStencil { depth, stencil } => {
                2u8.hash(state);
                depth.to_bits().hash(state);
                stencil.hash(state);
            }
        }
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum LoadOp {
    Load,
    #[default]
    Clear,
    DontCare,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    pub fn size(self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum SamplerAddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub struct SamplerInfo {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_filter: Filter,
    pub address_mode_u: SamplerAddressMode,
    pub address_mode_v: SamplerAddressMode,
    pub address_mode_w: SamplerAddressMode,
    pub max_anisotropy: Option<f32>,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        SamplerInfo {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_filter: Filter::Linear,
            address_mode_u: SamplerAddressMode::Repeat,
            address_mode_v: SamplerAddressMode::Repeat,
            address_mode_w: SamplerAddressMode::Repeat,
            max_anisotropy: None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BufferInfo<'a> {
    pub debug_name: &'a str,
    pub byte_size: u64,
    pub heap: HeapType,
    pub usage: BufferUsage,
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> Default for BufferInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            byte_size: 1024,
            heap: HeapType::Upload,
            usage: BufferUsage::UNIFORM,
            initial_data: None,
        }
    }
}

/// Raw pixels for one mip level, as handed over by an image loader.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextureBuffer<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

impl TextureBuffer<'_> {
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.bytes_per_pixel as u64
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TextureInfo<'a> {
    pub debug_name: &'a str,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub usage: TextureUsage,
    /// One entry per mip, starting at mip 0. Uploaded through a staging buffer.
    pub initial_data: &'a [TextureBuffer<'a>],
}

impl<'a> Default for TextureInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            width: 1,
            height: 1,
            mip_levels: 1,
            format: Format::RGBA8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
            initial_data: &[],
        }
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u8 {
        const VERTEX = 0x1;
        const FRAGMENT = 0x2;
        const COMPUTE = 0x4;
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

impl From<ShaderStage> for ShaderStages {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::Fragment => ShaderStages::FRAGMENT,
            ShaderStage::Compute => ShaderStages::COMPUTE,
        }
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 | VertexFormat::Unorm8x4 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub struct VertexInput {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer,
    SampledTexture,
    StorageTexture,
    Sampler,
    CombinedTextureSampler,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub struct ShaderBinding {
    pub set: u32,
    pub binding: u32,
    pub kind: BindingKind,
    pub count: u32,
    #[cfg_attr(feature = "kombu-serde", serde(skip))]
    pub stages: ShaderStages,
}

/// Reflection data produced by the shader compiler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderLayout {
    pub vertex_inputs: Vec<VertexInput>,
    pub vertex_stride: u32,
    pub bindings: Vec<ShaderBinding>,
    pub push_constant_size: u32,
}

impl ShaderLayout {
    pub fn set_count(&self) -> u32 {
        self.bindings.iter().map(|b| b.set + 1).max().unwrap_or(0)
    }
}

/// Compiled shader bytecode.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataBlob<'a> {
    pub data: &'a [u8],
}

#[derive(Clone, Copy, Debug)]
pub struct ShaderStageInfo<'a> {
    pub stage: ShaderStage,
    pub blob: DataBlob<'a>,
    pub entry_point: &'a str,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum Topology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Hash, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "kombu-serde", derive(Serialize, Deserialize))]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug)]
pub struct ShaderInfo<'a> {
    pub debug_name: &'a str,
    pub stages: &'a [ShaderStageInfo<'a>],
    pub layout: &'a ShaderLayout,
    /// Generated from `layout` when not supplied.
    pub pipeline_layout: Option<Handle<PipelineLayout>>,
    pub color_formats: &'a [Format],
    pub depth_format: Option<Format>,
    pub topology: Topology,
    pub cull_mode: CullMode,
    pub depth_test: bool,
}

impl<'a> ShaderInfo<'a> {
    pub fn is_compute(&self) -> bool {
        self.stages.iter().any(|s| s.stage == ShaderStage::Compute)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineLayoutInfo<'a> {
    pub debug_name: &'a str,
    pub bindings: &'a [ShaderBinding],
    pub push_constant_size: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct DescriptorSetInfo<'a> {
    pub debug_name: &'a str,
    pub layout: Handle<PipelineLayout>,
    pub set: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DescriptorResource {
    Buffer {
        buffer: Handle<Buffer>,
        offset: u64,
        size: u64,
    },
    Texture(Handle<Texture>),
    Sampler(Handle<Sampler>),
    TextureSampler(Handle<Texture>, Handle<Sampler>),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub array_element: u32,
    pub resource: DescriptorResource,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainInfo {
    /// Native window to present into. Headless backends ignore it.
    pub window: Option<RawWindowHandle>,
    pub extent: Extent,
    pub format: Format,
    pub image_count: u32,
    pub vsync: bool,
}

impl Default for SwapchainInfo {
    fn default() -> Self {
        Self {
            window: None,
            extent: Extent {
                width: 1280,
                height: 1024,
            },
            format: Format::BGRA8Unorm,
            image_count: 3,
            vsync: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SemaphoreValue {
    pub semaphore: Handle<Semaphore>,
    pub value: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitInfo<'a> {
    pub wait: &'a [SemaphoreValue],
    pub signal: &'a [SemaphoreValue],
}
