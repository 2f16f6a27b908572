//! Seams the frame loop calls into

use ash::vk;

use crate::foundation::math::{Mat4, Vec3};
use crate::render::backends::vulkan::VulkanResult;

/// Render pass and attachment formats the scene draws into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    /// Framebuffer size
    pub extent: vk::Extent2D,
    /// Render pass command buffers are recorded in
    pub render_pass: vk::RenderPass,
    /// Colour attachment format
    pub color_format: vk::Format,
    /// Depth attachment format
    pub depth_format: vk::Format,
    /// Number of swapchain images, and so of command buffers
    pub image_count: usize,
}

impl RenderTarget {
    /// Width over height, 1 for an empty extent
    pub fn aspect(&self) -> f32 {
        if self.extent.height == 0 {
            1.0
        } else {
            self.extent.width as f32 / self.extent.height as f32
        }
    }
}

/// Per-update state handed to [`Scene::update_scene`]
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    /// Frames presented before this update
    pub frame: u64,
    /// True only for the first update after the surface was attached
    pub first_frame: bool,
    /// Image index of the last presented frame
    pub last_image_index: Option<u32>,
    /// Current framebuffer size
    pub extent: vk::Extent2D,
    /// Camera view matrix from the manipulator
    pub view_matrix: Mat4,
    /// Camera eye position
    pub eye: Vec3,
}

/// Content plugged into a [`View`](super::View)
///
/// The view owns exactly one scene and calls it from the frame loop thread.
pub trait Scene {
    /// Render target changed; recreate size-dependent resources and pipelines
    fn resize(&mut self, target: &RenderTarget) -> VulkanResult<()>;

    /// Update per-frame state; return true when command buffers must be re-recorded
    fn update_scene(&mut self, frame: &FrameInfo) -> bool;

    /// Record draws inside the view's render pass
    ///
    /// Viewport and scissor are already set.
    fn build_command_buffer(&self, cmd: vk::CommandBuffer);

    /// Mouse wheel moved
    fn wheel(&mut self, _delta: i32) {}

    /// Left button clicked
    fn left_clicked(&mut self, _x: i32, _y: i32) {}

    /// Mouse dragged with the left button held
    fn left_drag(&mut self, _x: i32, _y: i32, _dx: i32, _dy: i32) {}

    /// Mouse dragged with the right button held
    fn right_drag(&mut self, _x: i32, _y: i32, _dx: i32, _dy: i32) {}
}

/// Overlay drawn on top of the scene in the same render pass
pub trait Overlay {
    /// Framebuffer size changed
    fn resize(&mut self, extent: vk::Extent2D);

    /// Build pipelines for the view's render pass
    fn create_pipeline(
        &mut self,
        render_pass: vk::RenderPass,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> VulkanResult<()>;

    /// Refresh geometry; return true when it changed
    fn update(&mut self) -> bool;

    /// Record the overlay draw
    fn draw(&self, cmd: vk::CommandBuffer);
}
