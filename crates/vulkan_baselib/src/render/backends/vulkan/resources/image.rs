//! Device-local 2D images with a tracked layout

use ash::vk;
use std::sync::Arc;

use crate::render::backends::vulkan::{has_stencil_component, Device, VulkanError, VulkanResult};

/// Parameters for [`Image::new`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Width and height in texels
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect covered by the view
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Sampled colour image that is filled by a transfer
    pub fn sampled_color(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    /// Depth (and stencil, when the format has one) attachment
    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if has_stencil_component(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect,
        }
    }
}

/// Image, view and memory with RAII cleanup
///
/// The layout starts as `UNDEFINED` and only changes through
/// [`Image::transition_layout`] or [`Image::assume_layout`].
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    desc: ImageDesc,
    layout: vk::ImageLayout,
}

impl Image {
    /// Create a single-mip, optimally tiled, device-local image and its view
    pub fn new(device: &Arc<Device>, desc: ImageDesc) -> VulkanResult<Self> {
        let raw = device.handle();
        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe {
            raw.create_image(&image_create_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { raw.get_image_memory_requirements(image) };
        let memory_type = match device.find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(index) => index,
            Err(e) => {
                unsafe { raw.destroy_image(image, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = match unsafe { raw.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { raw.destroy_image(image, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let bound = unsafe { raw.bind_image_memory(image, memory, 0) };
        let view = bound.and_then(|()| {
            let view_create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(desc.format)
                .subresource_range(subresource_range(desc.aspect));
            unsafe { raw.create_image_view(&view_create_info, None) }
        });

        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    raw.destroy_image(image, None);
                    raw.free_memory(memory, None);
                }
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            device: Arc::clone(device),
            image,
            memory,
            view,
            desc,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }

    /// Get the image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Image view covering the whole image
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Aspect covered by the view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.desc.aspect
    }

    /// Layout after all recorded transitions
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Record the layout a render pass leaves the image in
    pub fn assume_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }

    /// Record a barrier moving the image to `new_layout`
    pub fn transition_layout(&mut self, cmd: vk::CommandBuffer, new_layout: vk::ImageLayout) {
        let (src_access, src_stage) = layout_access_and_stage(self.layout);
        let (dst_access, dst_stage) = layout_access_and_stage(new_layout);

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(self.layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(subresource_range(self.desc.aspect))
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();

        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        self.layout = new_layout;
    }

    /// Record a copy of a tightly packed buffer into the whole image
    ///
    /// The image must already be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_from_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) -> VulkanResult<()> {
        if self.layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(VulkanError::InvalidOperation {
                reason: format!("image copy requires TRANSFER_DST_OPTIMAL, image is {:?}", self.layout),
            });
        }

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: self.desc.aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: self.desc.extent.width,
                height: self.desc.extent.height,
                depth: 1,
            })
            .build();

        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                cmd,
                buffer,
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
            self.device.handle().destroy_image(self.image, None);
            self.device.handle().free_memory(self.memory, None);
        }
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Access mask and pipeline stage associated with an image layout
///
/// Used on both sides of a layout transition barrier.
pub fn layout_access_and_stage(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::PREINITIALIZED => (vk::AccessFlags::HOST_WRITE, vk::PipelineStageFlags::HOST),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::AccessFlags::MEMORY_READ, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition_masks() {
        let (src_access, src_stage) = layout_access_and_stage(vk::ImageLayout::UNDEFINED);
        let (dst_access, dst_stage) = layout_access_and_stage(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert!(src_access.is_empty());
        assert_eq!(src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (read_access, read_stage) = layout_access_and_stage(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(read_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(read_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_depth_desc_adds_stencil_aspect() {
        let extent = vk::Extent2D { width: 4, height: 4 };
        let with_stencil = ImageDesc::depth(extent, vk::Format::D24_UNORM_S8_UINT);
        assert_eq!(with_stencil.aspect, vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);

        let depth_only = ImageDesc::depth(extent, vk::Format::D32_SFLOAT);
        assert_eq!(depth_only.aspect, vk::ImageAspectFlags::DEPTH);
    }
}
