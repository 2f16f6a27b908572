//! Command buffer allocation and recording
//!
//! [`CommandBuffers`] owns a set of primary buffers from the device's default
//! pool. [`CommandRecorder`] wraps the begin/end bracket and hands out an
//! [`ActiveRenderPass`] guard that ends the render pass when dropped.

use ash::vk;
use std::sync::Arc;

use crate::render::backends::vulkan::{Device, VulkanError, VulkanResult};

/// Primary command buffers freed back to the device pool on drop
pub struct CommandBuffers {
    device: Arc<Device>,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandBuffers {
    /// Allocate `count` primary command buffers
    pub fn new(device: &Arc<Device>, count: usize) -> VulkanResult<Self> {
        let buffers = if count == 0 {
            Vec::new()
        } else {
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(device.command_pool())
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(count as u32);

            unsafe {
                device.handle().allocate_command_buffers(&alloc_info)
                    .map_err(VulkanError::Api)?
            }
        };

        Ok(Self {
            device: Arc::clone(device),
            buffers,
        })
    }

    /// Number of buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer at `index`
    pub fn get(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(index).copied()
    }

    /// All buffers in allocation order
    pub fn as_slice(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            unsafe {
                self.device.handle().free_command_buffers(self.device.command_pool(), &self.buffers);
            }
        }
    }
}

/// Records into one command buffer between begin and end
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
    recording: bool,
}

impl<'a> CommandRecorder<'a> {
    /// Begin recording; any previous contents are discarded
    pub fn begin(
        device: &'a Device,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VulkanResult<Self> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);

        unsafe {
            device.handle().begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        Ok(Self {
            device: device.handle(),
            command_buffer,
            recording: true,
        })
    }

    /// Command buffer being recorded
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Begin an inline render pass
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) -> VulkanResult<ActiveRenderPass<'_, 'a>> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }

        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );
        }

        Ok(ActiveRenderPass { recorder: self })
    }

    /// Finish recording
    pub fn end(mut self) -> VulkanResult<vk::CommandBuffer> {
        unsafe {
            self.device.end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }

        self.recording = false;
        Ok(self.command_buffer)
    }
}

/// Render pass in progress; ended on drop
pub struct ActiveRenderPass<'r, 'a> {
    recorder: &'r mut CommandRecorder<'a>,
}

impl ActiveRenderPass<'_, '_> {
    /// Command buffer being recorded
    pub fn handle(&self) -> vk::CommandBuffer {
        self.recorder.command_buffer
    }

    /// Set dynamic viewport 0
    pub fn set_viewport(&mut self, viewport: &vk::Viewport) {
        unsafe {
            self.recorder.device.cmd_set_viewport(
                self.recorder.command_buffer,
                0,
                &[*viewport],
            );
        }
    }

    /// Set dynamic scissor 0
    pub fn set_scissor(&mut self, scissor: &vk::Rect2D) {
        unsafe {
            self.recorder.device.cmd_set_scissor(
                self.recorder.command_buffer,
                0,
                &[*scissor],
            );
        }
    }
}

impl Drop for ActiveRenderPass<'_, '_> {
    fn drop(&mut self) {
        unsafe {
            self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer);
        }
    }
}

/// Viewport covering `extent` with Y pointing up
///
/// Origin sits at the bottom edge and the height is negative, so clip-space
/// +Y maps to the top of the image.
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flipped_viewport_starts_at_bottom() {
        let viewport = flipped_viewport(vk::Extent2D { width: 800, height: 600 });
        assert_eq!(viewport.y, 600.0);
        assert_eq!(viewport.height, -600.0);
        assert_eq!(viewport.width, 800.0);
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }

    #[test]
    fn test_scissor_covers_extent() {
        let extent = vk::Extent2D { width: 1280, height: 720 };
        let scissor = full_scissor(extent);
        assert_eq!(scissor.extent, extent);
        assert_eq!((scissor.offset.x, scissor.offset.y), (0, 0));
    }
}
