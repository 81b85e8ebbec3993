//! Vulkan 1.3 backend built on `ash` and `vk-mem`.
//!
//! Every [`Queue`](crate::gpu::Queue) timeline is a `VK_SEMAPHORE_TYPE_TIMELINE`
//! semaphore, render passes use dynamic rendering and barriers go through
//! `vkCmdPipelineBarrier2`. Command buffers come from one pool per queue
//! family and are reused once the context reports them retired.

mod command_pool;
mod conversions;
mod encoder;
mod structs;

pub use encoder::VulkanEncoder;
pub use structs::*;

use std::ffi::{c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::os::raw::c_char;
use std::ptr::NonNull;
use std::time::Duration;

use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use raw_window_handle::{HasRawWindowHandle, RawWindowHandle};
use smallvec::SmallVec;
use vk_mem::Alloc;

use self::command_pool::CommandPool;
use self::conversions::aspect_mask;
use crate::gpu::backend::{Backend, NativeDescriptor, NativeDescriptorWrite};
use crate::gpu::{
    BufferInfo, ContextInfo, GPUError, HeapType, PipelineLayoutInfo, QueueType, Result,
    SamplerInfo, ShaderInfo, ShaderStage, SwapchainInfo, TextureInfo,
};

const VALIDATION_LAYER: &[u8] = b"VK_LAYER_KHRONOS_validation\0";

const DESCRIPTOR_POOL_SETS: u32 = 256;

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) };
    let level = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    };
    log::log!(
        target: "kombu::vulkan",
        level,
        "[{:?}] {}",
        message_type,
        message.to_string_lossy()
    );
    vk::FALSE
}

struct WindowTarget(RawWindowHandle);

unsafe impl HasRawWindowHandle for WindowTarget {
    fn raw_window_handle(&self) -> RawWindowHandle {
        self.0
    }
}

fn has_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
}

/// A Vulkan device with its instance, allocator and per-family command pools.
pub struct VulkanDevice {
    entry: Entry,
    instance: ash::Instance,
    pdevice: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    device: ash::Device,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    families: QueueFamilies,
    pools: SmallVec<[CommandPool; 3]>,
    descriptor_pools: Vec<vk::DescriptorPool>,
    debug_utils: Option<DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_loader: Option<khr::Surface>,
    swapchain_loader: Option<khr::Swapchain>,
}

// Access to queues and pools is serialised by `&mut self`.
unsafe impl Send for VulkanDevice {}

impl VulkanDevice {
    /// Creates an instance and device on the first discrete GPU, falling back
    /// to the first device found. Validation layers are enabled by
    /// `info.validation` or `KOMBU_VALIDATION=1`.
    pub fn new(info: &ContextInfo) -> Result<Self> {
        let validation = info.validation
            || std::env::var("KOMBU_VALIDATION")
                .map(|v| v == "1")
                .unwrap_or(false);

        let entry = unsafe { Entry::load() }?;

        let app_name = CString::new(info.application_name.as_str())
            .map_err(|_| GPUError::Configuration("application name contains a NUL".into()))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .engine_name(&app_name)
            .api_version(vk::make_api_version(0, 1, 3, 0));

        let available_exts = entry.enumerate_instance_extension_properties(None)?;
        let mut inst_exts: Vec<*const c_char> = Vec::new();
        let surface_exts: [&CStr; 6] = [
            khr::Surface::name(),
            khr::XlibSurface::name(),
            khr::XcbSurface::name(),
            khr::WaylandSurface::name(),
            khr::Win32Surface::name(),
            ash::extensions::ext::MetalSurface::name(),
        ];
        for name in surface_exts {
            if has_extension(&available_exts, name) {
                inst_exts.push(name.as_ptr());
            }
        }
        let windowed = has_extension(&available_exts, khr::Surface::name());

        let mut inst_layers: Vec<*const c_char> = Vec::new();
        if validation {
            inst_exts.push(DebugUtils::name().as_ptr());
            let layer = unsafe { CStr::from_bytes_with_nul_unchecked(VALIDATION_LAYER) };
            let available_layers = entry.enumerate_instance_layer_properties()?;
            if available_layers
                .iter()
                .any(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) } == layer)
            {
                inst_layers.push(layer.as_ptr());
            } else {
                log::warn!(target: "kombu::vulkan", "validation requested but the layer is not installed");
            }
        }

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .enabled_extension_names(&inst_exts)
                    .enabled_layer_names(&inst_layers),
                None,
            )
        }?;

        let (debug_utils, debug_messenger) = if validation {
            let utils = DebugUtils::new(&entry, &instance);
            let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            let messenger = unsafe { utils.create_debug_utils_messenger(&messenger_ci, None) }?;
            (Some(utils), Some(messenger))
        } else {
            (None, None)
        };

        let pdevices = unsafe { instance.enumerate_physical_devices() }?;
        let pdevice = pdevices
            .iter()
            .copied()
            .find(|p| {
                let props = unsafe { instance.get_physical_device_properties(*p) };
                props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            })
            .or_else(|| pdevices.first().copied())
            .ok_or(GPUError::Unsupported("no Vulkan physical device"))?;
        let properties = unsafe { instance.get_physical_device_properties(pdevice) };

        let mut supported12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut supported13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut query = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut supported12)
            .push_next(&mut supported13)
            .build();
        unsafe { instance.get_physical_device_features2(pdevice, &mut query) };
        if supported12.timeline_semaphore != vk::TRUE {
            return Err(GPUError::Unsupported("timeline semaphores"));
        }
        if supported13.dynamic_rendering != vk::TRUE || supported13.synchronization2 != vk::TRUE {
            return Err(GPUError::Unsupported("dynamic rendering and synchronization2"));
        }

        let family_props =
            unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let families = QueueFamilies::select(&family_props)
            .ok_or(GPUError::Unsupported("no graphics queue family"))?;

        let priorities = [1.0];
        let queue_infos: Vec<_> = families
            .unique()
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let device_exts = unsafe { instance.enumerate_device_extension_properties(pdevice) }?;
        let mut enabled_exts: Vec<*const c_char> = Vec::new();
        let presentable = windowed && has_extension(&device_exts, khr::Swapchain::name());
        if presentable {
            enabled_exts.push(khr::Swapchain::name().as_ptr());
        }

        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
            .timeline_semaphore(true)
            .build();
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true)
            .synchronization2(true)
            .build();
        let device_ci = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&enabled_exts)
            .push_next(&mut features12)
            .push_next(&mut features13);
        let device = unsafe { instance.create_device(pdevice, &device_ci, None) }?;

        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance, &device, pdevice,
        ))?;

        let pools = families
            .unique()
            .iter()
            .map(|&family| CommandPool::new(&device, family))
            .collect::<Result<SmallVec<[CommandPool; 3]>>>()?;

        let (surface_loader, swapchain_loader) = if presentable {
            (
                Some(khr::Surface::new(&entry, &instance)),
                Some(khr::Swapchain::new(&instance, &device)),
            )
        } else {
            (None, None)
        };

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            target: "kombu::vulkan",
            "using {} (families: graphics {}, compute {}, transfer {})",
            name.to_string_lossy(),
            families.graphics,
            families.compute,
            families.transfer
        );

        Ok(Self {
            entry,
            instance,
            pdevice,
            properties,
            device,
            allocator: ManuallyDrop::new(allocator),
            families,
            pools,
            descriptor_pools: Vec::new(),
            debug_utils,
            debug_messenger,
            surface_loader,
            swapchain_loader,
        })
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    fn set_name<T: vk::Handle>(&self, obj: T, name: &str, ty: vk::ObjectType) {
        let Some(utils) = &self.debug_utils else {
            return;
        };
        if name.is_empty() {
            return;
        }
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_name(&name)
            .object_type(ty)
            .object_handle(obj.as_raw());
        if let Err(e) = unsafe { utils.set_debug_utils_object_name(self.device.handle(), &info) } {
            log::debug!(target: "kombu::vulkan", "failed to name object: {}", e);
        }
    }

    fn pool(&mut self, family: u32) -> Result<&mut CommandPool> {
        self.pools
            .iter_mut()
            .find(|p| p.family() == family)
            .ok_or(GPUError::Backend(format!("no command pool for family {}", family)))
    }

    fn new_descriptor_pool(&mut self) -> Result<vk::DescriptorPool> {
        let sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::SAMPLED_IMAGE,
            vk::DescriptorType::STORAGE_IMAGE,
            vk::DescriptorType::SAMPLER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        ]
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: DESCRIPTOR_POOL_SETS * 4,
        });
        let pool = unsafe {
            self.device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(DESCRIPTOR_POOL_SETS)
                    .pool_sizes(&sizes),
                None,
            )
        }?;
        self.descriptor_pools.push(pool);
        log::debug!(
            target: "kombu::vulkan",
            "descriptor pool {} created",
            self.descriptor_pools.len()
        );
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
    ) -> Result<(vk::DescriptorSet, vk::DescriptorPool)> {
        let layouts = [layout];
        if let Some(&pool) = self.descriptor_pools.last() {
            let info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pool)
                .set_layouts(&layouts);
            match unsafe { self.device.allocate_descriptor_sets(&info) } {
                Ok(sets) => {
                    if let Some(&set) = sets.first() {
                        return Ok((set, pool));
                    }
                }
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
                | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let pool = self.new_descriptor_pool()?;
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }?;
        sets.first()
            .map(|&set| (set, pool))
            .ok_or(GPUError::Backend("no descriptor set allocated".into()))
    }

    fn create_shader_module(&self, blob: &[u8]) -> Result<vk::ShaderModule> {
        let code = ash::util::read_spv(&mut std::io::Cursor::new(blob))
            .map_err(|e| GPUError::Configuration(format!("invalid SPIR-V: {}", e)))?;
        let module = unsafe {
            self.device
                .create_shader_module(&vk::ShaderModuleCreateInfo::builder().code(&code), None)
        }?;
        Ok(module)
    }

    fn build_pipeline(
        &self,
        info: &ShaderInfo,
        layout: vk::PipelineLayout,
        modules: &[vk::ShaderModule],
        entry_points: &[CString],
    ) -> Result<vk::Pipeline> {
        let stages: SmallVec<[vk::PipelineShaderStageCreateInfo; 2]> = info
            .stages
            .iter()
            .zip(modules.iter().zip(entry_points))
            .map(|(stage, (module, name))| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage.into())
                    .module(*module)
                    .name(name)
                    .build()
            })
            .collect();

        if info.is_compute() {
            let stage = stages
                .iter()
                .zip(info.stages)
                .find(|(_, s)| s.stage == ShaderStage::Compute)
                .map(|(ci, _)| *ci)
                .ok_or(GPUError::Configuration("compute shader without a compute stage".into()))?;
            let ci = vk::ComputePipelineCreateInfo::builder()
                .stage(stage)
                .layout(layout)
                .build();
            let pipelines = unsafe {
                self.device
                    .create_compute_pipelines(vk::PipelineCache::null(), &[ci], None)
            }
            .map_err(|(_, e)| GPUError::from(e))?;
            return pipelines
                .first()
                .copied()
                .ok_or(GPUError::Backend("no compute pipeline created".into()));
        }

        let bindings = if info.layout.vertex_inputs.is_empty() {
            Vec::new()
        } else {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: info.layout.vertex_stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        };
        let attributes: Vec<_> = info
            .layout
            .vertex_inputs
            .iter()
            .map(|v| vk::VertexInputAttributeDescription {
                location: v.location,
                binding: 0,
                format: v.format.into(),
                offset: v.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::builder().topology(info.topology.into());
        let viewport = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let raster = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(info.cull_mode.into())
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(info.depth_test)
            .depth_write_enable(info.depth_test)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);
        let blend_attachments: Vec<_> = info
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::builder()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .build()
            })
            .collect();
        let blend =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let color_formats: Vec<vk::Format> =
            info.color_formats.iter().map(|f| (*f).into()).collect();
        let depth_format = info
            .depth_format
            .map(vk::Format::from)
            .unwrap_or(vk::Format::UNDEFINED);
        let mut rendering = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format);

        let ci = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&raster)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth)
            .color_blend_state(&blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .push_next(&mut rendering)
            .build();
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[ci], None)
        }
        .map_err(|(_, e)| GPUError::from(e))?;
        pipelines
            .first()
            .copied()
            .ok_or(GPUError::Backend("no graphics pipeline created".into()))
    }

    /// Builds the swapchain images for `surface`, retiring `old` if given.
    fn build_swapchain(
        &self,
        surface: vk::SurfaceKHR,
        info: &SwapchainInfo,
        old: vk::SwapchainKHR,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>, vk::Format, vk::Extent2D)> {
        let (Some(surface_loader), Some(swapchain_loader)) =
            (&self.surface_loader, &self.swapchain_loader)
        else {
            return Err(GPUError::Unsupported("presentation on this device"));
        };

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(self.pdevice, surface)
        }?;
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(self.pdevice, surface) }?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(self.pdevice, surface)
        }?;

        let mut extent = vk::Extent2D {
            width: info.extent.width,
            height: info.extent.height,
        };
        if capabilities.current_extent.width != u32::MAX {
            extent = capabilities.current_extent;
        } else {
            extent.width = extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            );
            extent.height = extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            );
        }
        if extent.width == 0 || extent.height == 0 {
            return Err(GPUError::SwapchainOutOfDate);
        }

        let wanted: vk::Format = info.format.into();
        let surface_format = formats
            .iter()
            .find(|f| f.format == wanted)
            .or_else(|| formats.first())
            .copied()
            .ok_or(GPUError::Unsupported("surface without formats"))?;
        if surface_format.format != wanted {
            log::warn!(
                target: "kombu::vulkan",
                "surface does not support {:?}, using {:?}",
                info.format,
                surface_format.format
            );
        }

        let present_mode = if info.vsync {
            vk::PresentModeKHR::FIFO
        } else if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else if present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
            vk::PresentModeKHR::IMMEDIATE
        } else {
            vk::PresentModeKHR::FIFO
        };

        let mut image_count = info.image_count.max(capabilities.min_image_count);
        if capabilities.max_image_count != 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let raw = unsafe {
            swapchain_loader.create_swapchain(
                &vk::SwapchainCreateInfoKHR::builder()
                    .surface(surface)
                    .present_mode(present_mode)
                    .image_format(surface_format.format)
                    .image_color_space(surface_format.color_space)
                    .image_array_layers(1)
                    .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .image_extent(extent)
                    .image_usage(
                        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                    )
                    .min_image_count(image_count)
                    .pre_transform(capabilities.current_transform)
                    .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                    .clipped(true)
                    .old_swapchain(old),
                None,
            )
        }?;
        let images = unsafe { swapchain_loader.get_swapchain_images(raw) }?;
        Ok((raw, images, surface_format.format, extent))
    }

    fn create_views(&self, images: &[vk::Image], format: vk::Format) -> Result<Vec<vk::ImageView>> {
        images
            .iter()
            .map(|&image| -> Result<vk::ImageView> {
                let view = unsafe {
                    self.device.create_image_view(
                        &vk::ImageViewCreateInfo::builder()
                            .image(image)
                            .view_type(vk::ImageViewType::TYPE_2D)
                            .format(format)
                            .subresource_range(vk::ImageSubresourceRange {
                                aspect_mask: vk::ImageAspectFlags::COLOR,
                                base_mip_level: 0,
                                level_count: 1,
                                base_array_layer: 0,
                                layer_count: 1,
                            }),
                        None,
                    )
                }?;
                Ok(view)
            })
            .collect()
    }

    fn create_binary_semaphores(&self, count: usize) -> Result<SmallVec<[vk::Semaphore; 4]>> {
        (0..count)
            .map(|_| -> Result<vk::Semaphore> {
                let sem = unsafe {
                    self.device
                        .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                }?;
                Ok(sem)
            })
            .collect()
    }

    fn release_swapchain_images(&self, swapchain: &mut VkSwapchain) {
        unsafe {
            for view in swapchain.views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            for sem in swapchain.present_ready.drain(..) {
                self.device.destroy_semaphore(sem, None);
            }
        }
        swapchain.images.clear();
    }
}

fn semaphore_infos(
    entries: &[(&VkSemaphore, u64)],
) -> SmallVec<[vk::SemaphoreSubmitInfo; 4]> {
    entries
        .iter()
        .map(|(sem, value)| {
            vk::SemaphoreSubmitInfo::builder()
                .semaphore(sem.raw)
                .value(*value)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .build()
        })
        .collect()
}

impl Backend for VulkanDevice {
    type Buffer = VkBuffer;
    type Texture = VkTexture;
    type Sampler = VkSampler;
    type Shader = VkShader;
    type PipelineLayout = VkPipelineLayout;
    type DescriptorSet = VkDescriptorSet;
    type Semaphore = VkSemaphore;
    type Swapchain = VkSwapchain;
    type Queue = VkQueue;
    type CommandBuffer = VkCommandBuffer;
    type Encoder = VulkanEncoder;

    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn create_queue(&mut self, queue_type: QueueType, index: usize) -> Result<VkQueue> {
        let family = self.families.of(queue_type);
        let raw = unsafe { self.device.get_device_queue(family, 0) };
        if index > 0 {
            log::debug!(
                target: "kombu::vulkan",
                "{:?} queue {} shares the native queue of family {}",
                queue_type,
                index,
                family
            );
        }
        Ok(VkQueue {
            raw,
            family,
            queue_type,
        })
    }

    fn create_buffer(&mut self, info: &BufferInfo) -> Result<VkBuffer> {
        if info.byte_size == 0 {
            return Err(GPUError::Configuration(format!(
                "buffer '{}' has zero size",
                info.debug_name
            )));
        }

        let mut usage: vk::BufferUsageFlags = info.usage.into();
        if info.heap.host_visible() {
            usage |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        let create_info = vk_mem::AllocationCreateInfo {
            usage: match info.heap {
                HeapType::GpuOnly => vk_mem::MemoryUsage::AutoPreferDevice,
                HeapType::Upload | HeapType::Readback => vk_mem::MemoryUsage::AutoPreferHost,
            },
            flags: match info.heap {
                HeapType::GpuOnly => vk_mem::AllocationCreateFlags::empty(),
                HeapType::Upload => {
                    vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
                        | vk_mem::AllocationCreateFlags::MAPPED
                }
                HeapType::Readback => {
                    vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
                        | vk_mem::AllocationCreateFlags::MAPPED
                }
            },
            ..Default::default()
        };

        let (raw, allocation) = unsafe {
            self.allocator.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(info.byte_size)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                &create_info,
            )
        }?;
        self.set_name(raw, info.debug_name, vk::ObjectType::BUFFER);

        let mapped = if info.heap.host_visible() {
            NonNull::new(self.allocator.get_allocation_info(&allocation).mapped_data as *mut u8)
        } else {
            None
        };

        Ok(VkBuffer {
            raw,
            allocation,
            size: info.byte_size,
            mapped,
        })
    }

    fn destroy_buffer(&mut self, mut buffer: VkBuffer) {
        unsafe { self.allocator.destroy_buffer(buffer.raw, &mut buffer.allocation) };
    }

    fn write_buffer(&mut self, buffer: &VkBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = buffer
            .mapped
            .ok_or(GPUError::HostAccessDenied(HeapType::GpuOnly))?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        self.allocator
            .flush_allocation(&buffer.allocation, offset as usize, data.len())?;
        Ok(())
    }

    fn read_buffer(&self, buffer: &VkBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
        let ptr = buffer
            .mapped
            .ok_or(GPUError::HostAccessDenied(HeapType::GpuOnly))?;
        self.allocator
            .invalidate_allocation(&buffer.allocation, offset as usize, out.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_ptr().add(offset as usize),
                out.as_mut_ptr(),
                out.len(),
            );
        }
        Ok(())
    }

    fn create_texture(&mut self, info: &TextureInfo) -> Result<VkTexture> {
        if info.width == 0 || info.height == 0 || info.mip_levels == 0 {
            return Err(GPUError::Configuration(format!(
                "texture '{}' has an empty extent",
                info.debug_name
            )));
        }

        let format: vk::Format = info.format.into();
        let aspect = aspect_mask(info.format);
        let (raw, mut allocation) = unsafe {
            self.allocator.create_image(
                &vk::ImageCreateInfo::builder()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(format)
                    .extent(vk::Extent3D {
                        width: info.width,
                        height: info.height,
                        depth: 1,
                    })
                    .mip_levels(info.mip_levels)
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(info.usage.into())
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED),
                &vk_mem::AllocationCreateInfo {
                    usage: vk_mem::MemoryUsage::AutoPreferDevice,
                    ..Default::default()
                },
            )
        }?;

        let view = unsafe {
            self.device.create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(raw)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: 0,
                        level_count: info.mip_levels,
                        base_array_layer: 0,
                        layer_count: 1,
                    }),
                None,
            )
        };
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.allocator.destroy_image(raw, &mut allocation) };
                return Err(e.into());
            }
        };
        self.set_name(raw, info.debug_name, vk::ObjectType::IMAGE);

        Ok(VkTexture {
            raw,
            view,
            allocation,
            format: info.format,
            aspect,
            extent: vk::Extent2D {
                width: info.width,
                height: info.height,
            },
            mip_levels: info.mip_levels,
        })
    }

    fn destroy_texture(&mut self, mut texture: VkTexture) {
        unsafe {
            self.device.destroy_image_view(texture.view, None);
            self.allocator
                .destroy_image(texture.raw, &mut texture.allocation);
        }
    }

    fn create_sampler(&mut self, info: &SamplerInfo) -> Result<VkSampler> {
        let ci: vk::SamplerCreateInfo = (*info).into();
        let raw = unsafe { self.device.create_sampler(&ci, None) }?;
        Ok(VkSampler { raw })
    }

    fn destroy_sampler(&mut self, sampler: VkSampler) {
        unsafe { self.device.destroy_sampler(sampler.raw, None) };
    }

    fn create_pipeline_layout(&mut self, info: &PipelineLayoutInfo) -> Result<VkPipelineLayout> {
        let set_count = info.bindings.iter().map(|b| b.set + 1).max().unwrap_or(0);

        let mut set_layouts = Vec::with_capacity(set_count as usize);
        let mut set_bindings = Vec::with_capacity(set_count as usize);
        for set in 0..set_count {
            let bindings: Vec<_> = info
                .bindings
                .iter()
                .filter(|b| b.set == set)
                .map(|b| {
                    vk::DescriptorSetLayoutBinding::builder()
                        .binding(b.binding)
                        .descriptor_type(b.kind.into())
                        .descriptor_count(b.count.max(1))
                        .stage_flags(b.stages.into())
                        .build()
                })
                .collect();
            let layout = unsafe {
                self.device.create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings),
                    None,
                )
            };
            match layout {
                Ok(layout) => set_layouts.push(layout),
                Err(e) => {
                    for layout in set_layouts {
                        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
                    }
                    return Err(e.into());
                }
            }
            set_bindings.push(
                bindings
                    .iter()
                    .map(|b| (b.binding, b.descriptor_type))
                    .collect(),
            );
        }

        let push_stages = vk::ShaderStageFlags::ALL;
        let ranges = [vk::PushConstantRange {
            stage_flags: push_stages,
            offset: 0,
            size: info.push_constant_size,
        }];
        let ranges: &[vk::PushConstantRange] = if info.push_constant_size > 0 {
            &ranges
        } else {
            &[]
        };

        let raw = unsafe {
            self.device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(&set_layouts)
                    .push_constant_ranges(ranges),
                None,
            )
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                for layout in set_layouts {
                    unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
                }
                return Err(e.into());
            }
        };
        self.set_name(raw, info.debug_name, vk::ObjectType::PIPELINE_LAYOUT);

        Ok(VkPipelineLayout {
            raw,
            set_layouts,
            set_bindings,
            push_stages,
        })
    }

    fn destroy_pipeline_layout(&mut self, layout: VkPipelineLayout) {
        unsafe {
            self.device.destroy_pipeline_layout(layout.raw, None);
            for set_layout in layout.set_layouts {
                self.device.destroy_descriptor_set_layout(set_layout, None);
            }
        }
    }

    fn create_shader(&mut self, info: &ShaderInfo, layout: &VkPipelineLayout) -> Result<VkShader> {
        if info.stages.is_empty() {
            return Err(GPUError::Configuration(format!(
                "shader '{}' has no stages",
                info.debug_name
            )));
        }

        let entry_points = info
            .stages
            .iter()
            .map(|s| {
                CString::new(s.entry_point).map_err(|_| {
                    GPUError::Configuration(format!("entry point '{}' contains a NUL", s.entry_point))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut modules: SmallVec<[vk::ShaderModule; 2]> = SmallVec::new();
        let mut built = Ok(());
        for stage in info.stages {
            match self.create_shader_module(stage.blob.data) {
                Ok(module) => modules.push(module),
                Err(e) => {
                    built = Err(e);
                    break;
                }
            }
        }
        let pipeline = built.and_then(|_| self.build_pipeline(info, layout.raw, &modules, &entry_points));
        for module in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
        let pipeline = pipeline?;
        self.set_name(pipeline, info.debug_name, vk::ObjectType::PIPELINE);

        Ok(VkShader {
            pipeline,
            bind_point: if info.is_compute() {
                vk::PipelineBindPoint::COMPUTE
            } else {
                vk::PipelineBindPoint::GRAPHICS
            },
            layout: layout.raw,
            push_stages: layout.push_stages,
        })
    }

    fn destroy_shader(&mut self, shader: VkShader) {
        unsafe { self.device.destroy_pipeline(shader.pipeline, None) };
    }

    fn create_descriptor_set(
        &mut self,
        layout: &VkPipelineLayout,
        set: u32,
    ) -> Result<VkDescriptorSet> {
        let set_layout = *layout
            .set_layouts
            .get(set as usize)
            .ok_or_else(|| {
                GPUError::Configuration(format!(
                    "layout has {} sets, requested set {}",
                    layout.set_layouts.len(),
                    set
                ))
            })?;
        let (raw, pool) = self.allocate_descriptor_set(set_layout)?;
        Ok(VkDescriptorSet {
            raw,
            pool,
            bindings: layout.set_bindings[set as usize].clone(),
        })
    }

    fn update_descriptor_set(
        &mut self,
        set: &mut VkDescriptorSet,
        writes: &[NativeDescriptorWrite<'_, Self>],
    ) -> Result<()> {
        enum Info {
            Buffer(vk::DescriptorBufferInfo),
            Image(vk::DescriptorImageInfo),
        }

        let mut infos = Vec::with_capacity(writes.len());
        for write in writes {
            let ty = set
                .bindings
                .iter()
                .find(|(b, _)| *b == write.binding)
                .map(|(_, ty)| *ty)
                .ok_or(GPUError::Configuration(format!(
                    "binding {} is not in the set layout",
                    write.binding
                )))?;
            let info = match write.resource {
                NativeDescriptor::Buffer {
                    buffer,
                    offset,
                    size,
                } => Info::Buffer(vk::DescriptorBufferInfo {
                    buffer: buffer.raw,
                    offset,
                    range: if size == 0 { vk::WHOLE_SIZE } else { size },
                }),
                NativeDescriptor::Texture(texture) => Info::Image(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: texture.view,
                    image_layout: if ty == vk::DescriptorType::STORAGE_IMAGE {
                        vk::ImageLayout::GENERAL
                    } else {
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                    },
                }),
                NativeDescriptor::Sampler(sampler) => Info::Image(vk::DescriptorImageInfo {
                    sampler: sampler.raw,
                    image_view: vk::ImageView::null(),
                    image_layout: vk::ImageLayout::UNDEFINED,
                }),
                NativeDescriptor::TextureSampler(texture, sampler) => {
                    Info::Image(vk::DescriptorImageInfo {
                        sampler: sampler.raw,
                        image_view: texture.view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    })
                }
            };
            infos.push((ty, info));
        }

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .zip(&infos)
            .map(|(write, (ty, info))| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set.raw)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(*ty);
                match info {
                    Info::Buffer(b) => builder.buffer_info(std::slice::from_ref(b)).build(),
                    Info::Image(i) => builder.image_info(std::slice::from_ref(i)).build(),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn destroy_descriptor_set(&mut self, set: VkDescriptorSet) {
        if let Err(e) = unsafe { self.device.free_descriptor_sets(set.pool, &[set.raw]) } {
            log::warn!(target: "kombu::vulkan", "failed to free descriptor set: {}", e);
        }
    }

    fn create_semaphore(&mut self, initial_value: u64) -> Result<VkSemaphore> {
        let mut timeline = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let raw = unsafe {
            self.device.create_semaphore(
                &vk::SemaphoreCreateInfo::builder().push_next(&mut timeline),
                None,
            )
        }?;
        Ok(VkSemaphore { raw })
    }

    fn destroy_semaphore(&mut self, semaphore: VkSemaphore) {
        unsafe { self.device.destroy_semaphore(semaphore.raw, None) };
    }

    fn semaphore_value(&self, semaphore: &VkSemaphore) -> Result<u64> {
        Ok(unsafe { self.device.get_semaphore_counter_value(semaphore.raw) }?)
    }

    fn wait_semaphore(
        &self,
        semaphore: &VkSemaphore,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let semaphores = [semaphore.raw];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);
        let timeout_ns = timeout
            .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
            .unwrap_or(u64::MAX);
        match unsafe { self.device.wait_semaphores(&info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn begin_encoding(&mut self, queue_type: QueueType) -> Result<VulkanEncoder> {
        let family = self.families.of(queue_type);
        let cmd = self.pool(family)?.acquire()?;
        unsafe {
            self.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        }?;
        Ok(VulkanEncoder::new(
            self.device.clone(),
            self.debug_utils.clone(),
            cmd,
            self.families,
            queue_type,
        ))
    }

    fn finish_encoding(&mut self, encoder: VulkanEncoder) -> Result<VkCommandBuffer> {
        let family = encoder.family();
        let raw = encoder.raw();
        match encoder.finish() {
            Ok(buffer) => Ok(buffer),
            Err(e) => {
                self.pool(family)?.recycle(raw);
                Err(e)
            }
        }
    }

    fn discard_encoding(&mut self, encoder: VulkanEncoder) {
        let family = encoder.family();
        let raw = encoder.raw();
        if let Ok(pool) = self.pool(family) {
            pool.recycle(raw);
        }
    }

    fn recycle_command_buffer(&mut self, buffer: VkCommandBuffer) {
        if let Ok(pool) = self.pool(buffer.family) {
            pool.recycle(buffer.raw);
        }
    }

    fn submit(
        &mut self,
        queue: &VkQueue,
        buffers: &[&VkCommandBuffer],
        waits: &[(&VkSemaphore, u64)],
        signals: &[(&VkSemaphore, u64)],
    ) -> Result<()> {
        let cmds: SmallVec<[vk::CommandBufferSubmitInfo; 4]> = buffers
            .iter()
            .map(|b| {
                vk::CommandBufferSubmitInfo::builder()
                    .command_buffer(b.raw)
                    .build()
            })
            .collect();
        let wait_infos = semaphore_infos(waits);
        let signal_infos = semaphore_infos(signals);

        let submit = vk::SubmitInfo2::builder()
            .command_buffer_infos(&cmds)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .build();
        log::trace!(
            target: "kombu::vulkan",
            "{:?} submit: {} buffers, {} waits, {} signals",
            queue.queue_type,
            cmds.len(),
            wait_infos.len(),
            signal_infos.len()
        );
        unsafe {
            self.device
                .queue_submit2(queue.raw, &[submit], vk::Fence::null())
        }?;
        Ok(())
    }

    fn create_swapchain(&mut self, info: &SwapchainInfo) -> Result<VkSwapchain> {
        let window = info
            .window
            .ok_or(GPUError::Unsupported("swapchain without a window"))?;
        let surface_loader = self
            .surface_loader
            .as_ref()
            .ok_or(GPUError::Unsupported("presentation on this device"))?;

        let surface = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, &WindowTarget(window), None)
        }?;
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                self.pdevice,
                self.families.graphics,
                surface,
            )
        };
        if !matches!(supported, Ok(true)) {
            unsafe { surface_loader.destroy_surface(surface, None) };
            return Err(GPUError::Unsupported("graphics family cannot present to this surface"));
        }

        let built = self
            .build_swapchain(surface, info, vk::SwapchainKHR::null())
            .and_then(|(raw, images, format, extent)| {
                let views = self.create_views(&images, format)?;
                let present_ready = self.create_binary_semaphores(images.len())?;
                let acquire_fence = unsafe {
                    self.device
                        .create_fence(&vk::FenceCreateInfo::default(), None)
                }?;
                Ok(VkSwapchain {
                    surface,
                    raw,
                    images,
                    views,
                    format,
                    extent,
                    acquire_fence,
                    present_ready,
                })
            });
        if built.is_err() {
            unsafe { surface_loader.destroy_surface(surface, None) };
        }
        let swapchain = built?;
        log::info!(
            target: "kombu::vulkan",
            "swapchain {}x{} with {} images",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len()
        );
        Ok(swapchain)
    }

    fn recreate_swapchain(&mut self, swapchain: &mut VkSwapchain, info: &SwapchainInfo) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        let (raw, images, format, extent) =
            self.build_swapchain(swapchain.surface, info, swapchain.raw)?;

        self.release_swapchain_images(swapchain);
        if let Some(loader) = &self.swapchain_loader {
            unsafe { loader.destroy_swapchain(swapchain.raw, None) };
        }
        swapchain.raw = raw;
        swapchain.format = format;
        swapchain.extent = extent;
        swapchain.views = self.create_views(&images, format)?;
        swapchain.present_ready = self.create_binary_semaphores(images.len())?;
        swapchain.images = images;
        log::debug!(
            target: "kombu::vulkan",
            "swapchain recreated at {}x{}",
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn destroy_swapchain(&mut self, mut swapchain: VkSwapchain) {
        self.release_swapchain_images(&mut swapchain);
        unsafe {
            self.device.destroy_fence(swapchain.acquire_fence, None);
            if let Some(loader) = &self.swapchain_loader {
                loader.destroy_swapchain(swapchain.raw, None);
            }
            if let Some(loader) = &self.surface_loader {
                loader.destroy_surface(swapchain.surface, None);
            }
        }
    }

    fn swapchain_image_count(&self, swapchain: &VkSwapchain) -> u32 {
        swapchain.images.len() as u32
    }

    fn acquire_next_image(&mut self, swapchain: &mut VkSwapchain) -> Result<u32> {
        let loader = self
            .swapchain_loader
            .as_ref()
            .ok_or(GPUError::Unsupported("presentation on this device"))?;
        let (image, suboptimal) = unsafe {
            loader.acquire_next_image(
                swapchain.raw,
                u64::MAX,
                vk::Semaphore::null(),
                swapchain.acquire_fence,
            )
        }?;
        unsafe {
            self.device
                .wait_for_fences(&[swapchain.acquire_fence], true, u64::MAX)?;
            self.device.reset_fences(&[swapchain.acquire_fence])?;
        }
        if suboptimal {
            log::debug!(target: "kombu::vulkan", "acquired image {} from a suboptimal swapchain", image);
        }
        Ok(image)
    }

    fn present(
        &mut self,
        queue: &VkQueue,
        swapchain: &mut VkSwapchain,
        image: u32,
        waits: &[(&VkSemaphore, u64)],
    ) -> Result<()> {
        let ready = *swapchain
            .present_ready
            .get(image as usize)
            .ok_or(GPUError::InvalidHandle("swapchain image"))?;

        // Presentation only waits on binary semaphores, so bridge the
        // timeline waits through an empty submission.
        let wait_infos = semaphore_infos(waits);
        let signal_infos = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(ready)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .build()];
        let submit = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .build();
        unsafe {
            self.device
                .queue_submit2(queue.raw, &[submit], vk::Fence::null())
        }?;

        let loader = self
            .swapchain_loader
            .as_ref()
            .ok_or(GPUError::Unsupported("presentation on this device"))?;
        let swapchains = [swapchain.raw];
        let indices = [image];
        let wait = [ready];
        let suboptimal = unsafe {
            loader.queue_present(
                queue.raw,
                &vk::PresentInfoKHR::builder()
                    .wait_semaphores(&wait)
                    .swapchains(&swapchains)
                    .image_indices(&indices),
            )
        }?;
        if suboptimal {
            log::debug!(target: "kombu::vulkan", "presented to a suboptimal swapchain");
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    fn destroy(mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!(target: "kombu::vulkan", "wait before teardown failed: {}", e);
        }
        for pool in self.pools.drain(..) {
            pool.destroy();
        }
        unsafe {
            for pool in self.descriptor_pools.drain(..) {
                self.device.destroy_descriptor_pool(pool, None);
            }
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!(target: "kombu::vulkan", "device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::*;
    use serial_test::serial;

    fn device() -> Option<VulkanDevice> {
        let _ = env_logger::builder().is_test(true).try_init();
        match VulkanDevice::new(&ContextInfo::default()) {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("skipping Vulkan test: {}", e);
                None
            }
        }
    }

    #[test]
    #[serial]
    fn timeline_semaphore_round_trip() {
        let Some(mut dev) = device() else { return };
        let sem = dev.create_semaphore(3).unwrap();
        assert_eq!(dev.semaphore_value(&sem).unwrap(), 3);
        assert!(dev.wait_semaphore(&sem, 3, Some(Duration::ZERO)).unwrap());
        assert!(!dev
            .wait_semaphore(&sem, 4, Some(Duration::from_millis(1)))
            .unwrap());
        dev.destroy_semaphore(sem);
        dev.destroy();
    }

    #[test]
    #[serial]
    fn upload_buffer_is_mapped() {
        let Some(mut dev) = device() else { return };
        let buffer = dev
            .create_buffer(&BufferInfo {
                byte_size: 16,
                heap: HeapType::Upload,
                ..Default::default()
            })
            .unwrap();
        dev.write_buffer(&buffer, 4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        dev.read_buffer(&buffer, 4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        dev.destroy_buffer(buffer);
        dev.destroy();
    }
}
