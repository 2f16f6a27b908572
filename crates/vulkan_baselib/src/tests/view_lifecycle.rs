//! Swapchain realization and view resize on a headless surface

use ash::vk;
use std::cell::Cell;
use std::sync::Arc;

use super::support::headless_device;
use crate::core::ViewConfig;
use crate::render::backends::vulkan::{
    Device, Surface, SwapChain, SwapChainState, VulkanError, VulkanInstance, VulkanResult,
};
use crate::render::view::{FrameInfo, RenderTarget, Scene, View};

#[derive(Default)]
struct CountingScene {
    targets: Vec<RenderTarget>,
    updates: Vec<bool>,
    recorded: Cell<u64>,
    dirty: bool,
    fail_resize: bool,
}

impl Scene for CountingScene {
    fn resize(&mut self, target: &RenderTarget) -> VulkanResult<()> {
        if self.fail_resize {
            return Err(VulkanError::InvalidOperation {
                reason: "scene refused the new target".to_string(),
            });
        }
        self.targets.push(*target);
        Ok(())
    }

    fn update_scene(&mut self, frame: &FrameInfo) -> bool {
        self.updates.push(frame.first_frame);
        std::mem::take(&mut self.dirty)
    }

    fn build_command_buffer(&self, _cmd: vk::CommandBuffer) {
        self.recorded.set(self.recorded.get() + 1);
    }
}

/// Headless surface, or `None` when the instance lacks the extension
fn headless_surface(instance: &Arc<VulkanInstance>) -> Option<Surface> {
    match Surface::headless(instance) {
        Ok(surface) => Some(surface),
        Err(e) => {
            log::warn!("Skipping surface test: {e}");
            None
        }
    }
}

/// View with a realized surface, or `None` when presentation is unavailable
fn realized_view(
    instance: &Arc<VulkanInstance>,
    device: &Arc<Device>,
    width: u32,
    height: u32,
) -> Option<View<CountingScene>> {
    let surface = headless_surface(instance)?;
    let mut view = View::new(device, CountingScene::default(), ViewConfig::default()).unwrap();
    match view.set_surface(surface, width, height) {
        Ok(()) => Some(view),
        Err(e @ (VulkanError::NoPresentQueue | VulkanError::SeparatePresentQueue { .. })) => {
            log::warn!("Skipping view test: {e}");
            None
        }
        Err(e) => panic!("set_surface failed: {e}"),
    }
}

fn assert_frame_resources_match(view: &View<CountingScene>) {
    let images = view.swapchain().image_count();
    assert!(images > 0);
    assert_eq!(view.command_buffer_count(), images);
    assert_eq!(view.framebuffer_count(), images);
    assert_eq!(view.fence_count(), images);
}

#[test]
fn test_realize_twice_keeps_image_count() {
    let Some((instance, device)) = headless_device() else { return };
    let Some(surface) = headless_surface(&instance) else { return };

    let mut swapchain = SwapChain::new(&device);
    assert_eq!(swapchain.state(), SwapChainState::Unsurfaced);
    if let Err(e) = swapchain.set_surface(surface) {
        log::warn!("Skipping swapchain test: {e}");
        return;
    }
    assert_eq!(swapchain.state(), SwapChainState::Surfaced);

    swapchain.realize(800, 600, true).unwrap();
    let first = swapchain.image_count();
    swapchain.realize(800, 600, true).unwrap();

    assert_eq!(swapchain.image_count(), first);
    assert_eq!(swapchain.generation(), 2);
    assert_eq!(swapchain.image_views().len(), first);
}

#[test]
fn test_set_surface_builds_every_frame_resource() {
    let Some((instance, device)) = headless_device() else { return };
    let Some(view) = realized_view(&instance, &device, 800, 600) else { return };

    assert_frame_resources_match(&view);
    assert_eq!(view.extent(), vk::Extent2D { width: 800, height: 600 });

    let stats = view.stats();
    assert_eq!(stats.device_idle_waits, 0);
    assert_eq!(stats.swapchain_generation, 1);
    assert_eq!(stats.framebuffer_builds, 1);
    assert_eq!(stats.command_buffer_recordings, view.frame_count() as u64);

    let scene = view.scene();
    assert_eq!(scene.targets.len(), 1);
    assert_eq!(scene.targets[0].image_count, view.frame_count());
    assert_eq!(scene.recorded.get(), view.frame_count() as u64);
}

#[test]
fn test_resize_waits_idle_once_and_rebuilds() {
    let Some((instance, device)) = headless_device() else { return };
    let Some(mut view) = realized_view(&instance, &device, 800, 600) else { return };

    let before = view.stats();
    view.resize(1280, 720).unwrap();
    let after = view.stats();

    assert_eq!(after.device_idle_waits, before.device_idle_waits + 1);
    assert_eq!(after.swapchain_generation, before.swapchain_generation + 1);
    assert_eq!(after.framebuffer_builds, before.framebuffer_builds + 1);
    assert_eq!(
        after.command_buffer_recordings,
        before.command_buffer_recordings + view.frame_count() as u64
    );

    assert_eq!(view.extent(), vk::Extent2D { width: 1280, height: 720 });
    assert_frame_resources_match(&view);

    let last = view.scene().targets.last().copied().unwrap();
    assert_eq!(last.extent, vk::Extent2D { width: 1280, height: 720 });
}

#[test]
fn test_render_presents_and_update_rebuilds_on_request() {
    let Some((instance, device)) = headless_device() else { return };
    let Some(mut view) = realized_view(&instance, &device, 320, 240) else { return };

    assert!(!view.update().unwrap());
    view.render().unwrap();
    view.render().unwrap();
    assert_eq!(view.stats().frames_presented, 2);

    let recordings = view.stats().command_buffer_recordings;
    view.scene_mut().dirty = true;
    assert!(view.update().unwrap());
    assert_eq!(
        view.stats().command_buffer_recordings,
        recordings + view.frame_count() as u64
    );

    // only the first update after set_surface is flagged
    assert_eq!(view.scene().updates, vec![true, false]);
}

#[test]
fn test_failed_resize_blocks_render_until_next_resize() {
    let Some((instance, device)) = headless_device() else { return };
    let Some(mut view) = realized_view(&instance, &device, 320, 240) else { return };

    view.render().unwrap();
    assert!(view.can_render());

    view.scene_mut().fail_resize = true;
    assert!(view.resize(640, 480).is_err());
    assert!(!view.can_render());
    assert!(matches!(view.render(), Err(VulkanError::InvalidOperation { .. })));
    assert_eq!(view.stats().frames_presented, 1);

    // stale command buffers are not re-recorded by an update either
    let recordings = view.stats().command_buffer_recordings;
    view.scene_mut().dirty = true;
    assert!(view.update().unwrap());
    assert_eq!(view.stats().command_buffer_recordings, recordings);

    view.scene_mut().fail_resize = false;
    view.resize(640, 480).unwrap();
    assert!(view.can_render());
    assert_frame_resources_match(&view);
    view.render().unwrap();
    assert_eq!(view.stats().frames_presented, 2);
}

#[test]
fn test_resize_without_surface_is_rejected() {
    let Some((_instance, device)) = headless_device() else { return };

    let mut view = View::new(&device, CountingScene::default(), ViewConfig::default()).unwrap();
    assert!(matches!(view.resize(640, 480), Err(VulkanError::InvalidOperation { .. })));
    assert!(matches!(view.render(), Err(VulkanError::InvalidOperation { .. })));
    assert_eq!(view.stats().device_idle_waits, 0);
    assert!(!view.can_render());
}

#[test]
fn test_input_moves_the_camera() {
    let Some((_instance, device)) = headless_device() else { return };

    let mut view = View::new(&device, CountingScene::default(), ViewConfig::default()).unwrap();
    let home_distance = view.manipulator().distance();

    view.wheel(1).unwrap();
    assert!(view.manipulator().distance() > home_distance);

    view.left_drag(0, 0, 50, 0).unwrap();
    view.home().unwrap();
    assert_eq!(view.manipulator().distance(), home_distance);
    assert_eq!(view.scene().updates.len(), 3);
}
