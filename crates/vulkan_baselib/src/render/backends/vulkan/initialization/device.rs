//! Logical device and physical capability snapshot
//!
//! [`Device`] is the shared root of every GPU resource in the crate. Buffers,
//! images, pipelines, swapchains and frame resources each hold an
//! `Arc<Device>`, so the logical device (and after it the instance) is only
//! destroyed once all of them are gone.
//!
//! All upload helpers here are synchronous: they record a one-shot command
//! buffer, submit it with a fresh fence and block until the fence signals.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;
use std::ffi::CString;
use std::os::raw::c_char;
use std::sync::{Arc, Mutex};

use super::context::{raw_name_to_string, VulkanError, VulkanInstance, VulkanResult};
use crate::core::DeviceConfig;
use crate::render::backends::vulkan::resources::Buffer;
use crate::render::backends::vulkan::rendering::CommandBuffers;
use crate::render::backends::vulkan::state::Fence;

/// Depth formats tried by [`Device::supported_depth_format`], best first
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Descriptors of each type in the shared descriptor pool
const DESCRIPTORS_PER_TYPE: u32 = 1000;

const POOL_DESCRIPTOR_TYPES: [vk::DescriptorType; 11] = [
    vk::DescriptorType::SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::SAMPLED_IMAGE,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
    vk::DescriptorType::STORAGE_TEXEL_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    vk::DescriptorType::INPUT_ATTACHMENT,
];

/// Snapshot of what a physical device offers
#[derive(Clone)]
pub struct DeviceCapabilities {
    /// Physical device handle
    pub physical_device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory types and heaps
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Available queue families
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Supported device extension names
    pub extensions: Vec<String>,
}

impl DeviceCapabilities {
    /// Query the capabilities of `physical_device`
    pub fn query(instance: &VulkanInstance, physical_device: vk::PhysicalDevice) -> VulkanResult<Self> {
        let raw = instance.handle();
        let (properties, features, memory_properties, queue_families) = unsafe {
            (
                raw.get_physical_device_properties(physical_device),
                raw.get_physical_device_features(physical_device),
                raw.get_physical_device_memory_properties(physical_device),
                raw.get_physical_device_queue_family_properties(physical_device),
            )
        };
        let extensions = unsafe {
            raw.enumerate_device_extension_properties(physical_device)
                .map_err(VulkanError::Api)?
        }
        .iter()
        .map(|ext| raw_name_to_string(&ext.extension_name))
        .collect();

        Ok(Self {
            physical_device,
            properties,
            features,
            memory_properties,
            queue_families,
            extensions,
        })
    }

    /// Device name reported by the driver
    pub fn device_name(&self) -> String {
        raw_name_to_string(&self.properties.device_name)
    }

    /// Whether the device supports the named extension
    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }
}

/// Find the first memory type allowed by `type_bits` whose flags contain `properties`
///
/// Partial matches are never returned.
pub fn memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}

/// Resolve the queue family for `flags`
///
/// A request for compute alone prefers a family without graphics, and a
/// request for transfer alone prefers one without graphics or compute.
/// Otherwise the first family supporting every requested flag is used.
pub fn resolve_queue_family(
    families: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> VulkanResult<u32> {
    let position = |pred: &dyn Fn(vk::QueueFlags) -> bool| {
        families
            .iter()
            .position(|family| family.queue_count > 0 && pred(family.queue_flags))
    };

    let dedicated = if flags == vk::QueueFlags::COMPUTE {
        position(&|f| f.contains(vk::QueueFlags::COMPUTE) && !f.contains(vk::QueueFlags::GRAPHICS))
    } else if flags == vk::QueueFlags::TRANSFER {
        position(&|f| {
            f.contains(vk::QueueFlags::TRANSFER)
                && !f.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
    } else {
        None
    };

    dedicated
        .or_else(|| position(&|f| f.contains(flags)))
        .map(|index| index as u32)
        .ok_or(VulkanError::NoQueueFamily { flags })
}

/// Whether `region` lies inside both a `src_size` source and a `dst_size` destination
pub fn copy_fits(region: &vk::BufferCopy, src_size: vk::DeviceSize, dst_size: vk::DeviceSize) -> bool {
    let within = |offset: vk::DeviceSize, limit| offset.checked_add(region.size).is_some_and(|end| end <= limit);
    within(region.src_offset, src_size) && within(region.dst_offset, dst_size)
}

/// Queue family indices, fixed once the device is realized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Graphics family, also the family of the default command pool
    pub graphics: u32,
    /// Compute family
    pub compute: u32,
    /// Transfer family
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Resolve every family named in `requested`
    ///
    /// A graphics family is always resolved, since it owns the default
    /// command pool and the present queue. Families that are not requested
    /// share the graphics family.
    pub fn resolve(families: &[vk::QueueFamilyProperties], requested: vk::QueueFlags) -> VulkanResult<Self> {
        let graphics = resolve_queue_family(families, vk::QueueFlags::GRAPHICS)?;
        let compute = if requested.contains(vk::QueueFlags::COMPUTE) {
            resolve_queue_family(families, vk::QueueFlags::COMPUTE)?
        } else {
            graphics
        };
        let transfer = if requested.contains(vk::QueueFlags::TRANSFER) {
            resolve_queue_family(families, vk::QueueFlags::TRANSFER)?
        } else {
            graphics
        };

        Ok(Self { graphics, compute, transfer })
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        let mut unique = vec![self.graphics];
        for family in [self.compute, self.transfer] {
            if !unique.contains(&family) {
                unique.push(family);
            }
        }
        unique
    }
}

/// Pick the first candidate usable as an optimally tiled depth attachment
///
/// With `check_sampling` the format must also be sampleable.
pub fn select_depth_format(
    candidates: &[vk::Format],
    check_sampling: bool,
    format_properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    let mut required = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    if check_sampling {
        required |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
    }
    candidates
        .iter()
        .copied()
        .find(|&format| format_properties(format).optimal_tiling_features.contains(required))
}

/// Whether a depth format also carries a stencil component
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

fn lock_poisoned(what: &str) -> VulkanError {
    VulkanError::InvalidOperation {
        reason: format!("{what} lock poisoned"),
    }
}

/// Logical device with its queues, default command pool and shared pools
pub struct Device {
    device: ash::Device,
    capabilities: DeviceCapabilities,
    queue_families: QueueFamilyIndices,
    enabled_features: vk::PhysicalDeviceFeatures,
    swapchain_loader: Option<SwapchainLoader>,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    transfer_queue: vk::Queue,
    command_pool: vk::CommandPool,
    pipeline_cache: Mutex<vk::PipelineCache>,
    descriptor_pool: Mutex<vk::DescriptorPool>,
    instance: Arc<VulkanInstance>,
}

impl Device {
    /// Select a physical device per `config` and realize it
    pub fn new(instance: Arc<VulkanInstance>, config: &DeviceConfig) -> VulkanResult<Arc<Self>> {
        let physical_device = instance.pick_physical_device(config.preferred_device.as_deref())?;
        let capabilities = DeviceCapabilities::query(&instance, physical_device)?;
        Self::realize(instance, capabilities, config)
    }

    /// Create the logical device, its queues and the default command pool
    pub fn realize(
        instance: Arc<VulkanInstance>,
        capabilities: DeviceCapabilities,
        config: &DeviceConfig,
    ) -> VulkanResult<Arc<Self>> {
        let queue_families = QueueFamilyIndices::resolve(&capabilities.queue_families, config.queues.to_flags())?;
        log::debug!("Resolved queue families: {queue_families:?}");

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let mut wanted: Vec<String> = config.extra_extensions.clone();
        if config.enable_swapchain {
            wanted.insert(0, SwapchainLoader::name().to_string_lossy().into_owned());
        }
        let mut extensions: Vec<CString> = Vec::new();
        for name in wanted {
            if !capabilities.supports_extension(&name) {
                log::warn!("Device extension {name} is not supported by {}", capabilities.device_name());
                continue;
            }
            let name = CString::new(name).map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
            if !extensions.contains(&name) {
                extensions.push(name);
            }
        }
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|name| name.as_ptr()).collect();

        let mut enabled_features = vk::PhysicalDeviceFeatures::default();
        if config.sampler_anisotropy && capabilities.features.sampler_anisotropy == vk::TRUE {
            enabled_features.sampler_anisotropy = vk::TRUE;
        }

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&enabled_features);

        let device = unsafe {
            instance.handle()
                .create_device(capabilities.physical_device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let swapchain_enabled = extensions
            .iter()
            .any(|name| name.as_c_str() == SwapchainLoader::name());
        let swapchain_loader = swapchain_enabled.then(|| SwapchainLoader::new(instance.handle(), &device));

        let (graphics_queue, compute_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(queue_families.graphics, 0),
                device.get_device_queue(queue_families.compute, 0),
                device.get_device_queue(queue_families.transfer, 0),
            )
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_families.graphics);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(VulkanError::Api(e));
            }
        };

        log::info!(
            "Realized logical device on {} with extensions {:?}",
            capabilities.device_name(),
            extensions
        );

        Ok(Arc::new(Self {
            device,
            capabilities,
            queue_families,
            enabled_features,
            swapchain_loader,
            graphics_queue,
            compute_queue,
            transfer_queue,
            command_pool,
            pipeline_cache: Mutex::new(vk::PipelineCache::null()),
            descriptor_pool: Mutex::new(vk::DescriptorPool::null()),
            instance,
        }))
    }

    /// Raw ash device
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Owning instance
    pub fn instance(&self) -> &Arc<VulkanInstance> {
        &self.instance
    }

    /// Physical device handle
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.capabilities.physical_device
    }

    /// Capability snapshot taken before realization
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Features enabled on the logical device
    pub fn enabled_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.enabled_features
    }

    /// Resolved queue family indices
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Compute queue
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Transfer queue
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Default command pool on the graphics family
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> VulkanResult<&SwapchainLoader> {
        self.swapchain_loader.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "VK_KHR_swapchain was not enabled on this device".to_string(),
        })
    }

    /// See [`memory_type_index`]
    pub fn memory_type_index(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> Option<u32> {
        memory_type_index(&self.capabilities.memory_properties, type_bits, properties)
    }

    /// Like [`Device::memory_type_index`] but a miss is an error
    pub fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        self.memory_type_index(type_bits, properties)
            .ok_or(VulkanError::NoSuitableMemoryType { type_bits, properties })
    }

    /// Best supported depth format from [`DEPTH_FORMAT_CANDIDATES`]
    pub fn supported_depth_format(&self, check_sampling: bool) -> VulkanResult<vk::Format> {
        let instance = self.instance.handle();
        select_depth_format(&DEPTH_FORMAT_CANDIDATES, check_sampling, |format| unsafe {
            instance.get_physical_device_format_properties(self.capabilities.physical_device, format)
        })
        .ok_or(VulkanError::NoDepthFormat)
    }

    /// Pipeline cache, created on first use
    pub fn pipeline_cache(&self) -> VulkanResult<vk::PipelineCache> {
        let mut cache = self.pipeline_cache.lock().map_err(|_| lock_poisoned("pipeline cache"))?;
        if *cache == vk::PipelineCache::null() {
            let create_info = vk::PipelineCacheCreateInfo::builder();
            *cache = unsafe {
                self.device.create_pipeline_cache(&create_info, None)
                    .map_err(VulkanError::Api)?
            };
            log::debug!("Created pipeline cache");
        }
        Ok(*cache)
    }

    /// Shared descriptor pool, created on first use
    pub fn descriptor_pool(&self) -> VulkanResult<vk::DescriptorPool> {
        let mut pool = self.descriptor_pool.lock().map_err(|_| lock_poisoned("descriptor pool"))?;
        if *pool == vk::DescriptorPool::null() {
            let sizes: Vec<vk::DescriptorPoolSize> = POOL_DESCRIPTOR_TYPES
                .iter()
                .map(|&ty| vk::DescriptorPoolSize { ty, descriptor_count: DESCRIPTORS_PER_TYPE })
                .collect();
            let create_info = vk::DescriptorPoolCreateInfo::builder()
                .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                .max_sets(DESCRIPTORS_PER_TYPE * POOL_DESCRIPTOR_TYPES.len() as u32)
                .pool_sizes(&sizes);
            *pool = unsafe {
                self.device.create_descriptor_pool(&create_info, None)
                    .map_err(VulkanError::Api)?
            };
            log::debug!("Created descriptor pool");
        }
        Ok(*pool)
    }

    /// Allocate one descriptor set from the shared pool
    pub fn allocate_descriptor_set(&self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool()?)
            .set_layouts(&layouts);
        let sets = unsafe {
            self.device.allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?
        };
        sets.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "descriptor set allocation returned nothing".to_string(),
        })
    }

    /// Return a descriptor set to the shared pool
    pub fn free_descriptor_set(&self, set: vk::DescriptorSet) -> VulkanResult<()> {
        let pool = self.descriptor_pool()?;
        unsafe {
            self.device.free_descriptor_sets(pool, &[set])
                .map_err(VulkanError::Api)
        }
    }

    /// Create a buffer, optionally filled with `data`
    ///
    /// Initial data requires host-visible memory; use
    /// [`Device::upload_buffer`] for device-local destinations.
    pub fn create_buffer(
        self: &Arc<Self>,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        size: vk::DeviceSize,
        data: Option<&[u8]>,
    ) -> VulkanResult<Buffer> {
        Buffer::new(self, usage, memory_flags, size, data)
    }

    /// Create a device-local buffer holding `data` via a staging copy
    ///
    /// `TRANSFER_DST` is added to `usage`. Blocks until the copy completes.
    pub fn upload_buffer(self: &Arc<Self>, usage: vk::BufferUsageFlags, data: &[u8]) -> VulkanResult<Buffer> {
        let size = data.len() as vk::DeviceSize;
        let staging = self.create_buffer(
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            size,
            Some(data),
        )?;
        let destination = self.create_buffer(
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            size,
            None,
        )?;

        self.copy_buffer(&staging, &destination, None)?;
        log::debug!("Uploaded {size} bytes into device-local {usage:?} buffer");
        Ok(destination)
    }

    /// Copy between buffers and wait for completion
    ///
    /// Without a region the whole source is copied to offset 0.
    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, region: Option<vk::BufferCopy>) -> VulkanResult<()> {
        let region = region.unwrap_or(vk::BufferCopy { src_offset: 0, dst_offset: 0, size: src.size() });
        if !copy_fits(&region, src.size(), dst.size()) {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "copy of {} bytes does not fit source ({}) or destination ({})",
                    region.size,
                    src.size(),
                    dst.size()
                ),
            });
        }

        self.submit_one_shot(self.graphics_queue, |cmd| unsafe {
            self.device.cmd_copy_buffer(cmd, src.handle(), dst.handle(), &[region]);
        })
    }

    /// Allocate a command buffer from the default pool, optionally begun
    pub fn create_command_buffer(&self, level: vk::CommandBufferLevel, begin: bool) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(level)
            .command_buffer_count(1);
        let cmd = unsafe {
            self.device.allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        }
        .into_iter()
        .next()
        .ok_or_else(|| VulkanError::InvalidOperation {
            reason: "command buffer allocation returned nothing".to_string(),
        })?;

        if begin {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            if let Err(e) = unsafe { self.device.begin_command_buffer(cmd, &begin_info) } {
                unsafe { self.device.free_command_buffers(self.command_pool, &[cmd]) };
                return Err(VulkanError::Api(e));
            }
        }
        Ok(cmd)
    }

    /// End, submit and wait for a one-shot command buffer
    ///
    /// The submission uses a fresh fence and waits without timeout. `queue`
    /// must belong to the graphics family, which owns the default pool.
    pub fn flush_command_buffer(&self, cmd: vk::CommandBuffer, queue: vk::Queue, free: bool) -> VulkanResult<()> {
        let result = unsafe { self.device.end_command_buffer(cmd) }.and_then(|()| {
            let fence_info = vk::FenceCreateInfo::builder();
            let fence = unsafe { self.device.create_fence(&fence_info, None)? };
            let buffers = [cmd];
            let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
            let waited = unsafe {
                self.device
                    .queue_submit(queue, &[submit], fence)
                    .and_then(|()| self.device.wait_for_fences(&[fence], true, u64::MAX))
            };
            unsafe { self.device.destroy_fence(fence, None) };
            waited
        });

        if free {
            unsafe { self.device.free_command_buffers(self.command_pool, &[cmd]) };
        }
        result.map_err(VulkanError::Api)
    }

    /// Record with `record`, then submit and wait
    pub fn submit_one_shot<F>(&self, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let cmd = self.create_command_buffer(vk::CommandBufferLevel::PRIMARY, true)?;
        record(cmd);
        self.flush_command_buffer(cmd, queue, true)
    }

    /// Allocate `count` primary command buffers owned by the returned set
    pub fn create_command_buffers(self: &Arc<Self>, count: usize) -> VulkanResult<CommandBuffers> {
        CommandBuffers::new(self, count)
    }

    /// Create `count` fences
    pub fn create_fences(self: &Arc<Self>, count: usize, signaled: bool) -> VulkanResult<Vec<Fence>> {
        (0..count).map(|_| Fence::new(Arc::clone(self), signaled)).collect()
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device.device_wait_idle()
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let descriptor_pool = match self.descriptor_pool.get_mut() {
            Ok(pool) => *pool,
            Err(poisoned) => *poisoned.into_inner(),
        };
        let pipeline_cache = match self.pipeline_cache.get_mut() {
            Ok(cache) => *cache,
            Err(poisoned) => *poisoned.into_inner(),
        };

        unsafe {
            let _ = self.device.device_wait_idle();
            if descriptor_pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(descriptor_pool, None);
            }
            if pipeline_cache != vk::PipelineCache::null() {
                self.device.destroy_pipeline_cache(pipeline_cache, None);
            }
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = types.len() as u32;
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_memory_type_index_requires_superset() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let coherent = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, coherent]);

        assert_eq!(memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::HOST_COHERENT), Some(2));
        assert_eq!(memory_type_index(&props, 0b111, host), Some(1));
        assert_eq!(memory_type_index(&props, 0b101, host), Some(2));
        assert_eq!(memory_type_index(&props, 0b011, coherent), None);
    }

    #[test]
    fn test_memory_type_index_exhaustive_over_small_masks() {
        let flag_sets = [
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ];
        let props = memory_properties(&flag_sets);
        let wanted = [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        ];

        for mask in 0u32..16 {
            for &required in &wanted {
                match memory_type_index(&props, mask, required) {
                    Some(i) => {
                        assert!(mask & (1 << i) != 0);
                        assert!(flag_sets[i as usize].contains(required));
                        for earlier in 0..i {
                            assert!(mask & (1 << earlier) == 0 || !flag_sets[earlier as usize].contains(required));
                        }
                    }
                    None => {
                        assert!((0..4).all(|i| mask & (1 << i) == 0 || !flag_sets[i].contains(required)));
                    }
                }
            }
        }
    }

    #[test]
    fn test_dedicated_compute_and_transfer_families_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];

        assert_eq!(resolve_queue_family(&families, vk::QueueFlags::GRAPHICS).unwrap(), 0);
        assert_eq!(resolve_queue_family(&families, vk::QueueFlags::COMPUTE).unwrap(), 1);
        assert_eq!(resolve_queue_family(&families, vk::QueueFlags::TRANSFER).unwrap(), 2);
    }

    #[test]
    fn test_queue_families_fall_back_to_shared() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::resolve(
            &families,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        ).unwrap();

        assert_eq!(indices, QueueFamilyIndices { graphics: 0, compute: 0, transfer: 0 });
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn test_unrequested_families_share_graphics() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::resolve(&families, vk::QueueFlags::GRAPHICS).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, compute: 1, transfer: 1 });
    }

    #[test]
    fn test_graphics_family_resolved_even_when_not_requested() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::resolve(&families, vk::QueueFlags::TRANSFER).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, compute: 1, transfer: 0 });

        let no_graphics = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        let err = QueueFamilyIndices::resolve(&no_graphics, vk::QueueFlags::COMPUTE).unwrap_err();
        assert!(matches!(err, VulkanError::NoQueueFamily { flags } if flags == vk::QueueFlags::GRAPHICS));
    }

    #[test]
    fn test_copy_region_bounds() {
        let region = |src_offset, dst_offset, size| vk::BufferCopy { src_offset, dst_offset, size };
        assert!(copy_fits(&region(0, 0, 16), 16, 16));
        assert!(copy_fits(&region(8, 4, 8), 16, 12));
        assert!(!copy_fits(&region(8, 0, 16), 16, 16));
        assert!(!copy_fits(&region(0, 1, 16), 16, 16));
        assert!(!copy_fits(&region(u64::MAX - 1, 0, 4), 16, 16));
        assert!(!copy_fits(&region(0, u64::MAX, 1), 16, 16));
    }

    #[test]
    fn test_missing_queue_family_is_an_error() {
        let families = [family(vk::QueueFlags::TRANSFER)];
        let err = resolve_queue_family(&families, vk::QueueFlags::GRAPHICS).unwrap_err();
        assert!(matches!(err, VulkanError::NoQueueFamily { flags } if flags == vk::QueueFlags::GRAPHICS));
    }

    #[test]
    fn test_depth_format_follows_preference_order() {
        let depth_only = |format: vk::Format| {
            let mut props = vk::FormatProperties::default();
            if format == vk::Format::D32_SFLOAT || format == vk::Format::D16_UNORM {
                props.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
            }
            if format == vk::Format::D16_UNORM {
                props.optimal_tiling_features |= vk::FormatFeatureFlags::SAMPLED_IMAGE;
            }
            props
        };

        assert_eq!(select_depth_format(&DEPTH_FORMAT_CANDIDATES, false, depth_only), Some(vk::Format::D32_SFLOAT));
        assert_eq!(select_depth_format(&DEPTH_FORMAT_CANDIDATES, true, depth_only), Some(vk::Format::D16_UNORM));
        assert_eq!(
            select_depth_format(&DEPTH_FORMAT_CANDIDATES, false, |_| vk::FormatProperties::default()),
            None
        );
    }

    #[test]
    fn test_stencil_formats() {
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert!(!has_stencil_component(vk::Format::D16_UNORM));
    }
}
