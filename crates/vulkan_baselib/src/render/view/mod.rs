//! # Frame Loop
//!
//! [`View`] drives a single-threaded acquire, wait, submit, present cycle
//! over a [`SwapChain`] and hosts one [`Scene`] plus an optional [`Overlay`].
//!
//! ## Frame resources
//!
//! There is one command buffer, one framebuffer and one fence per swapchain
//! image, and two semaphores shared by every frame (image acquired, render
//! finished). After every successful build the three per-image arrays have
//! exactly `swapchain.image_count()` entries.
//!
//! Command buffers are recorded once and replayed. They are re-recorded only
//! when something invalidates them: a resize, a scene update that asks for
//! it, or a changed overlay.
//!
//! ## Synchronization
//!
//! Before acquiring, [`View::render`] waits for the fence of the previously
//! submitted frame, so at most one frame is in flight and the two shared
//! semaphores are never signalled twice before being waited on. The acquired
//! image's own fence is then waited and reset before its command buffer is
//! resubmitted.
//!
//! `SUBOPTIMAL_KHR` from acquire or present is tolerated and counted in
//! [`FrameStats`]; it never triggers a rebuild. Only [`View::resize`]
//! recreates the swapchain. Any other non-success code is returned as an
//! error.
//!
//! ## Resize
//!
//! A resize waits for the device to go idle, realizes a new swapchain
//! generation, recreates the depth image and framebuffers, resizes the
//! per-image arrays and re-records every command buffer.
//!
//! ## Failure recovery
//!
//! A failed rebuild leaves the command buffers pointing at framebuffers that
//! no longer exist, and a failed submit or present leaves the shared
//! semaphores in an unknown state. Either way [`View::render`] refuses to
//! submit until a later [`View::resize`] completes; after a failed submit
//! that resize also recreates the semaphores and fences.

mod scene;
mod state;
mod stats;

pub use scene::{FrameInfo, Overlay, RenderTarget, Scene};
pub use stats::FrameStats;

use ash::vk;
use std::sync::Arc;

use crate::core::ViewConfig;
use crate::render::backends::vulkan::{
    flipped_viewport, full_scissor, CommandBuffers, CommandRecorder, Device, Fence, Framebuffer, Image,
    RenderPass, Semaphore, Surface, SwapChain, SwapChainState, VulkanError, VulkanResult,
};
use crate::render::primitives::Manipulator;
use state::FrameState;

/// Frame-loop orchestrator over one swapchain and one scene
pub struct View<S: Scene> {
    // declaration order is drop order: the scene and per-image resources go
    // before the render pass, the swapchain and its surface
    scene: S,
    overlay: Option<Box<dyn Overlay>>,
    framebuffers: Vec<Framebuffer>,
    depth: Option<Image>,
    command_buffers: Option<CommandBuffers>,
    fences: Vec<Fence>,
    render_pass: Option<RenderPass>,
    present_semaphore: Semaphore,
    render_semaphore: Semaphore,
    swapchain: SwapChain,
    manipulator: Manipulator,
    config: ViewConfig,
    stats: FrameStats,
    frame_state: FrameState,
    last_submitted: Option<usize>,
    last_image_index: Option<u32>,
    first_frame: bool,
    device: Arc<Device>,
}

impl<S: Scene> View<S> {
    /// Create a view with an unsurfaced swapchain and the two frame semaphores
    pub fn new(device: &Arc<Device>, scene: S, config: ViewConfig) -> VulkanResult<Self> {
        let present_semaphore = Semaphore::new(Arc::clone(device))?;
        let render_semaphore = Semaphore::new(Arc::clone(device))?;

        Ok(Self {
            scene,
            overlay: None,
            framebuffers: Vec::new(),
            depth: None,
            command_buffers: None,
            fences: Vec::new(),
            render_pass: None,
            present_semaphore,
            render_semaphore,
            swapchain: SwapChain::new(device),
            manipulator: Manipulator::from_home(&config.camera),
            config,
            stats: FrameStats::default(),
            frame_state: FrameState::default(),
            last_submitted: None,
            last_image_index: None,
            first_frame: true,
            device: Arc::clone(device),
        })
    }

    /// Attach the presentation surface and build every frame resource
    ///
    /// Realizes the swapchain, creates the render pass for its formats and
    /// records the first set of command buffers.
    pub fn set_surface(&mut self, surface: Surface, width: u32, height: u32) -> VulkanResult<()> {
        self.frame_state = self.frame_state.begin_rebuild();
        self.swapchain.set_surface(surface)?;
        self.swapchain.realize(width, height, self.config.vsync)?;
        self.stats.swapchain_generation = self.swapchain.generation();

        self.render_pass = Some(RenderPass::forward(
            Arc::clone(&self.device),
            self.swapchain.color_format(),
            self.swapchain.depth_format(),
        )?);

        self.build_frame_resources()?;
        self.first_frame = true;
        Ok(())
    }

    /// Rebuild everything that depends on the window size
    ///
    /// Stalls until the device is idle before touching any resource.
    pub fn resize(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        self.ensure_realized()?;

        self.device.wait_idle()?;
        self.stats.device_idle_waits += 1;
        self.last_submitted = None;

        if self.frame_state.needs_sync_reset() {
            self.reset_sync_objects()?;
        }
        self.frame_state = FrameState::Stale;

        self.framebuffers.clear();
        self.depth = None;

        self.swapchain.realize(width, height, self.config.vsync)?;
        self.stats.swapchain_generation = self.swapchain.generation();

        log::info!("View resized to {width}x{height}");
        self.build_frame_resources()
    }

    // Only called with the device idle, so nothing waits on the old objects.
    fn reset_sync_objects(&mut self) -> VulkanResult<()> {
        self.present_semaphore = Semaphore::new(Arc::clone(&self.device))?;
        self.render_semaphore = Semaphore::new(Arc::clone(&self.device))?;
        self.fences = self.device.create_fences(self.fences.len(), true)?;
        log::info!("Recreated frame semaphores and {} fences", self.fences.len());
        Ok(())
    }

    fn build_frame_resources(&mut self) -> VulkanResult<()> {
        let render_pass = self.render_pass.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "view has no render pass".to_string(),
        })?;
        let extent = self.swapchain.extent();

        if let Some(overlay) = self.overlay.as_mut() {
            overlay.resize(extent);
            overlay.create_pipeline(
                render_pass.handle(),
                self.swapchain.color_format(),
                self.swapchain.depth_format(),
            )?;
        }

        let depth = self.swapchain.create_depth_image()?;
        self.framebuffers = self.swapchain.create_frame_buffers(render_pass, &depth)?;
        self.depth = Some(depth);
        self.stats.framebuffer_builds += 1;

        let count = self.swapchain.image_count();
        if self.command_buffers.as_ref().map_or(true, |cbs| cbs.len() != count) {
            self.command_buffers = None;
            self.command_buffers = Some(self.device.create_command_buffers(count)?);
        }
        if self.fences.len() != count {
            self.fences = self.device.create_fences(count, true)?;
        }

        let target = RenderTarget {
            extent,
            render_pass: render_pass.handle(),
            color_format: self.swapchain.color_format(),
            depth_format: self.swapchain.depth_format(),
            image_count: count,
        };
        self.scene.resize(&target)?;

        self.record_command_buffers()?;
        self.frame_state = self.frame_state.finish_rebuild();
        Ok(())
    }

    /// Re-record every command buffer
    ///
    /// Waits on each per-image fence first so no buffer is re-recorded while
    /// the GPU may still be executing it.
    pub fn rebuild_command_buffers(&mut self) -> VulkanResult<()> {
        self.ensure_realized()?;
        self.frame_state.ensure_recordable()?;
        self.frame_state = self.frame_state.begin_rebuild();
        for fence in &self.fences {
            fence.wait(u64::MAX)?;
        }
        self.record_command_buffers()?;
        self.frame_state = self.frame_state.finish_rebuild();
        Ok(())
    }

    fn record_command_buffers(&mut self) -> VulkanResult<()> {
        let render_pass = self.render_pass.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "view has no render pass".to_string(),
        })?;
        let command_buffers = self.command_buffers.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "view has no command buffers".to_string(),
        })?;
        if command_buffers.len() != self.framebuffers.len() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "{} command buffers for {} framebuffers",
                    command_buffers.len(),
                    self.framebuffers.len()
                ),
            });
        }

        let extent = self.swapchain.extent();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: self.config.clear_color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        for (&cmd, framebuffer) in command_buffers.as_slice().iter().zip(&self.framebuffers) {
            let mut recorder = CommandRecorder::begin(&self.device, cmd, vk::CommandBufferUsageFlags::empty())?;
            {
                let mut pass = recorder.begin_render_pass(
                    render_pass.handle(),
                    framebuffer.handle(),
                    full_scissor(extent),
                    &clear_values,
                )?;
                pass.set_viewport(&flipped_viewport(extent));
                pass.set_scissor(&full_scissor(extent));

                self.scene.build_command_buffer(pass.handle());
                if let Some(overlay) = &self.overlay {
                    overlay.draw(pass.handle());
                }
            }
            recorder.end()?;
        }

        self.stats.command_buffer_recordings += command_buffers.len() as u64;
        log::debug!("Recorded {} command buffers", command_buffers.len());
        Ok(())
    }

    /// Run the scene and overlay updates
    ///
    /// Re-records the command buffers when either reports a change, and
    /// returns whether that happened.
    pub fn update(&mut self) -> VulkanResult<bool> {
        let info = FrameInfo {
            frame: self.stats.frames_presented,
            first_frame: self.first_frame,
            last_image_index: self.last_image_index,
            extent: self.swapchain.extent(),
            view_matrix: self.manipulator.view_matrix(),
            eye: self.manipulator.eye(),
        };
        self.first_frame = false;

        let scene_changed = self.scene.update_scene(&info);
        let overlay_changed = self.overlay.as_mut().is_some_and(|o| o.update());
        let changed = scene_changed || overlay_changed;

        if changed && self.is_ready() {
            self.rebuild_command_buffers()?;
        }
        Ok(changed)
    }

    /// Acquire, submit the prerecorded command buffer and present
    ///
    /// A failure after the image was acquired leaves the view unusable until
    /// the next successful [`View::resize`].
    pub fn render(&mut self) -> VulkanResult<()> {
        self.ensure_realized()?;
        self.frame_state.ensure_submittable()?;

        if let Some(previous) = self.last_submitted.take() {
            if let Some(fence) = self.fences.get(previous) {
                fence.wait(u64::MAX)?;
            }
        }

        let (result, image_index) = self.swapchain.acquire_image(self.present_semaphore.handle())?;
        self.check_swapchain_result("acquire", result)?;

        if let Err(e) = self.submit_and_present(image_index) {
            log::error!("Frame for swapchain image {image_index} failed: {e}");
            self.frame_state = FrameState::Faulted;
            return Err(e);
        }

        self.stats.frames_presented += 1;
        self.last_image_index = Some(image_index);
        Ok(())
    }

    fn submit_and_present(&mut self, image_index: u32) -> VulkanResult<()> {
        let index = image_index as usize;
        let fence = self.fences.get(index).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("no fence for swapchain image {index}"),
        })?;
        let cmd = self
            .command_buffers
            .as_ref()
            .and_then(|cbs| cbs.get(index))
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no command buffer for swapchain image {index}"),
            })?;

        fence.wait(u64::MAX)?;
        fence.reset()?;

        let wait_semaphores = [self.present_semaphore.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_semaphore.handle()];
        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        let queue = self.device.graphics_queue();
        unsafe {
            self.device.handle()
                .queue_submit(queue, &[submit], fence.handle())
                .map_err(VulkanError::Api)?;
        }
        self.last_submitted = Some(index);

        let result = self.swapchain.queue_present(queue, image_index, self.render_semaphore.handle())?;
        self.check_swapchain_result("present", result)
    }

    fn check_swapchain_result(&mut self, what: &str, result: vk::Result) -> VulkanResult<()> {
        match result {
            vk::Result::SUCCESS => Ok(()),
            vk::Result::SUBOPTIMAL_KHR => {
                self.stats.suboptimal_results += 1;
                if self.stats.suboptimal_results == 1 {
                    log::warn!("Swapchain {what} returned SUBOPTIMAL_KHR; waiting for an explicit resize");
                } else {
                    log::debug!("Swapchain {what} returned SUBOPTIMAL_KHR");
                }
                Ok(())
            }
            code => Err(VulkanError::Api(code)),
        }
    }

    /// Install the overlay, replacing any previous one
    pub fn set_overlay(&mut self, mut overlay: Box<dyn Overlay>) -> VulkanResult<()> {
        if let (true, Some(render_pass)) = (self.is_ready(), self.render_pass.as_ref()) {
            overlay.resize(self.swapchain.extent());
            overlay.create_pipeline(
                render_pass.handle(),
                self.swapchain.color_format(),
                self.swapchain.depth_format(),
            )?;
            self.overlay = Some(overlay);
            return self.rebuild_command_buffers();
        }
        self.overlay = Some(overlay);
        Ok(())
    }

    /// Mouse wheel: zoom the camera, then notify the scene
    pub fn wheel(&mut self, delta: i32) -> VulkanResult<bool> {
        self.manipulator.zoom(delta <= 0);
        self.scene.wheel(delta);
        self.update()
    }

    /// Left click: notify the scene
    pub fn left_clicked(&mut self, x: i32, y: i32) -> VulkanResult<bool> {
        self.scene.left_clicked(x, y);
        self.update()
    }

    /// Left drag: orbit the camera, then notify the scene
    pub fn left_drag(&mut self, x: i32, y: i32, dx: i32, dy: i32) -> VulkanResult<bool> {
        self.manipulator.rotate(dx, dy);
        self.scene.left_drag(x, y, dx, dy);
        self.update()
    }

    /// Right drag: pan the camera, then notify the scene
    pub fn right_drag(&mut self, x: i32, y: i32, dx: i32, dy: i32) -> VulkanResult<bool> {
        self.manipulator.translate(dx, -dy);
        self.scene.right_drag(x, y, dx, dy);
        self.update()
    }

    /// Return the camera to its home position
    pub fn home(&mut self) -> VulkanResult<bool> {
        self.manipulator.home();
        self.update()
    }

    fn is_realized(&self) -> bool {
        matches!(self.swapchain.state(), SwapChainState::Realized { .. }) && self.render_pass.is_some()
    }

    // stale or faulted views defer re-recording to the next resize
    fn is_ready(&self) -> bool {
        self.is_realized() && self.frame_state == FrameState::Ready
    }

    fn ensure_realized(&self) -> VulkanResult<()> {
        if self.is_realized() {
            Ok(())
        } else {
            Err(VulkanError::InvalidOperation {
                reason: "view has no realized surface".to_string(),
            })
        }
    }

    /// Owning device
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Hosted scene
    pub fn scene(&self) -> &S {
        &self.scene
    }

    /// Hosted scene, mutably
    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    /// Swapchain
    pub fn swapchain(&self) -> &SwapChain {
        &self.swapchain
    }

    /// Render pass, once a surface is attached
    pub fn render_pass(&self) -> Option<vk::RenderPass> {
        self.render_pass.as_ref().map(RenderPass::handle)
    }

    /// Number of swapchain images
    pub fn frame_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Number of command buffers
    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.as_ref().map_or(0, CommandBuffers::len)
    }

    /// Number of framebuffers
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Number of per-image fences
    pub fn fence_count(&self) -> usize {
        self.fences.len()
    }

    /// Current framebuffer size
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Camera manipulator
    pub fn manipulator(&self) -> &Manipulator {
        &self.manipulator
    }

    /// Camera manipulator, mutably
    pub fn manipulator_mut(&mut self) -> &mut Manipulator {
        &mut self.manipulator
    }

    /// Frame loop settings
    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Whether [`View::render`] will submit; false after a failed rebuild or
    /// frame until the next successful resize
    pub fn can_render(&self) -> bool {
        self.is_ready()
    }

    /// Counters since creation
    pub fn stats(&self) -> FrameStats {
        self.stats
    }
}

impl<S: Scene> Drop for View<S> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device wait failed while dropping view: {e}");
        }
    }
}
