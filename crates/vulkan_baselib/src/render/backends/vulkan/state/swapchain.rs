//! Presentation swapchain lifecycle
//!
//! A [`SwapChain`] moves through three states. It starts unsurfaced, becomes
//! surfaced once [`SwapChain::set_surface`] has checked present support and
//! negotiated the formats, and is realized by [`SwapChain::realize`]. Calling
//! `realize` again (on resize) replaces the chain with a new generation,
//! handing the old chain to the driver for reuse before destroying it.
//!
//! The swapchain never decides to recreate itself. Acquire and present hand
//! the raw result code back so the caller owns that policy.

use ash::vk;
use std::sync::Arc;

use super::framebuffer::Framebuffer;
use crate::render::backends::vulkan::initialization::Surface;
use crate::render::backends::vulkan::rendering::RenderPass;
use crate::render::backends::vulkan::resources::{Image, ImageDesc};
use crate::render::backends::vulkan::{Device, VulkanError, VulkanResult};

/// Colour format used whenever the surface offers it
pub const PREFERRED_COLOR_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

const COMPOSITE_ALPHA_PREFERENCE: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

/// Lifecycle state of a [`SwapChain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapChainState {
    /// No surface attached
    Unsurfaced,
    /// Surface attached and formats negotiated
    Surfaced,
    /// Images exist; `generation` counts realizations
    Realized {
        /// Number of successful realizations so far
        generation: u64,
    },
}

/// Pick the surface colour format
///
/// A lone `UNDEFINED` entry means the surface has no preference.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(vk::SurfaceFormatKHR {
            format: PREFERRED_COLOR_FORMAT,
            color_space: only.color_space,
        }),
        _ => formats
            .iter()
            .find(|f| f.format == PREFERRED_COLOR_FORMAT)
            .or_else(|| formats.first())
            .copied(),
    }
}

/// Pick the present mode
///
/// With vsync FIFO is used, which every implementation supports. Without it
/// MAILBOX is preferred, then IMMEDIATE, then FIFO.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// One more than the minimum, clamped to the maximum when there is one
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Identity when supported, else the current transform
pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps.supported_transforms.contains(vk::SurfaceTransformFlagsKHR::IDENTITY) {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// First supported composite alpha mode, opaque first
pub fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    COMPOSITE_ALPHA_PREFERENCE
        .into_iter()
        .find(|&mode| caps.supported_composite_alpha.contains(mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Swapchain extent
///
/// The surface's current extent wins unless it is the `u32::MAX` wildcard,
/// in which case the requested size is clamped to the allowed range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width.max(caps.min_image_extent.width)),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height.max(caps.min_image_extent.height)),
    }
}

/// Resolve the present family
///
/// Presentation must happen on the graphics family. When only another family
/// can present the configuration is rejected.
pub fn resolve_present_family(
    graphics_family: u32,
    family_count: u32,
    supports_present: impl Fn(u32) -> VulkanResult<bool>,
) -> VulkanResult<u32> {
    if supports_present(graphics_family)? {
        return Ok(graphics_family);
    }
    for family in 0..family_count {
        if family != graphics_family && supports_present(family)? {
            return Err(VulkanError::SeparatePresentQueue {
                graphics: graphics_family,
                present: family,
            });
        }
    }
    Err(VulkanError::NoPresentQueue)
}

/// Swapchain with its images and views
pub struct SwapChain {
    device: Arc<Device>,
    state: SwapChainState,
    surface_format: vk::SurfaceFormatKHR,
    depth_format: vk::Format,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    surface: Option<Surface>,
}

impl SwapChain {
    /// Create an unsurfaced swapchain
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
            state: SwapChainState::Unsurfaced,
            surface_format: vk::SurfaceFormatKHR::default(),
            depth_format: vk::Format::UNDEFINED,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            surface: None,
        }
    }

    /// Attach a surface and negotiate the colour and depth formats
    ///
    /// Fails when the graphics family cannot present to the surface.
    pub fn set_surface(&mut self, surface: Surface) -> VulkanResult<()> {
        if self.surface.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "swapchain already has a surface".to_string(),
            });
        }

        let physical_device = self.device.physical_device();
        let family_count = self.device.capabilities().queue_families.len() as u32;
        resolve_present_family(self.device.queue_families().graphics, family_count, |family| {
            surface.supports_present(physical_device, family)
        })?;

        let formats = surface.formats(physical_device)?;
        self.surface_format = choose_surface_format(&formats).ok_or_else(|| {
            VulkanError::InitializationFailed("surface reports no colour formats".to_string())
        })?;
        self.depth_format = self.device.supported_depth_format(false)?;
        self.surface = Some(surface);
        self.state = SwapChainState::Surfaced;

        log::info!(
            "Swapchain surfaced: colour {:?}/{:?}, depth {:?}",
            self.surface_format.format,
            self.surface_format.color_space,
            self.depth_format
        );
        Ok(())
    }

    /// Create or recreate the chain at the requested size
    ///
    /// Does not wait for the device; the caller must make sure the old
    /// images are no longer in use.
    pub fn realize(&mut self, width: u32, height: u32, vsync: bool) -> VulkanResult<()> {
        let surface = self.surface.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "cannot realize a swapchain without a surface".to_string(),
        })?;
        let loader = self.device.swapchain_loader()?;
        let physical_device = self.device.physical_device();

        let caps = surface.capabilities(physical_device)?;
        let modes = surface.present_modes(physical_device)?;
        let extent = choose_extent(&caps, width, height);
        let present_mode = choose_present_mode(&modes, vsync);
        let image_count = choose_image_count(&caps);

        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if caps.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(choose_pre_transform(&caps))
            .composite_alpha(choose_composite_alpha(&caps))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            loader.create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            match self.create_image_view(image) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views {
                            self.device.handle().destroy_image_view(view, None);
                        }
                        loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(e);
                }
            }
        }

        self.destroy_chain();
        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.extent = extent;
        self.present_mode = present_mode;

        let generation = match self.state {
            SwapChainState::Realized { generation } => generation + 1,
            _ => 1,
        };
        self.state = SwapChainState::Realized { generation };

        log::info!(
            "Swapchain generation {generation}: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            present_mode
        );
        Ok(())
    }

    fn create_image_view(&self, image: vk::Image) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.surface_format.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.device.handle().create_image_view(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn destroy_chain(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.handle().destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                if let Ok(loader) = self.device.swapchain_loader() {
                    loader.destroy_swapchain(self.swapchain, None);
                }
            }
        }
        self.images.clear();
        self.swapchain = vk::SwapchainKHR::null();
    }

    fn ensure_realized(&self) -> VulkanResult<()> {
        match self.state {
            SwapChainState::Realized { .. } => Ok(()),
            state => Err(VulkanError::InvalidOperation {
                reason: format!("swapchain is {state:?}, not realized"),
            }),
        }
    }

    /// Create a depth image matching the current extent and depth format
    pub fn create_depth_image(&self) -> VulkanResult<Image> {
        self.ensure_realized()?;
        Image::new(&self.device, ImageDesc::depth(self.extent, self.depth_format))
    }

    /// Create one framebuffer per image, each sharing `depth`
    pub fn create_frame_buffers(&self, render_pass: &RenderPass, depth: &Image) -> VulkanResult<Vec<Framebuffer>> {
        self.ensure_realized()?;
        let framebuffers = self
            .image_views
            .iter()
            .map(|&view| {
                Framebuffer::new(
                    Arc::clone(&self.device),
                    render_pass.handle(),
                    &[view, depth.view()],
                    self.extent,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        log::debug!("Created {} framebuffers", framebuffers.len());
        Ok(framebuffers)
    }

    /// Acquire the next image, signalling `semaphore`
    ///
    /// Returns the raw result code with the image index. On any code other
    /// than `SUCCESS` or `SUBOPTIMAL_KHR` the index is meaningless.
    pub fn acquire_image(&self, semaphore: vk::Semaphore) -> VulkanResult<(vk::Result, u32)> {
        self.ensure_realized()?;
        let loader = self.device.swapchain_loader()?;
        let acquired = unsafe {
            loader.acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        Ok(match acquired {
            Ok((index, false)) => (vk::Result::SUCCESS, index),
            Ok((index, true)) => (vk::Result::SUBOPTIMAL_KHR, index),
            Err(code) => (code, 0),
        })
    }

    /// Present `image_index` on `queue` once `wait` has signalled
    pub fn queue_present(&self, queue: vk::Queue, image_index: u32, wait: vk::Semaphore) -> VulkanResult<vk::Result> {
        self.ensure_realized()?;
        let loader = self.device.swapchain_loader()?;

        let swapchains = [self.swapchain];
        let indices = [image_index];
        let wait_semaphores = [wait];
        let mut present_info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&indices);
        if wait != vk::Semaphore::null() {
            present_info = present_info.wait_semaphores(&wait_semaphores);
        }

        Ok(match unsafe { loader.queue_present(queue, &present_info) } {
            Ok(false) => vk::Result::SUCCESS,
            Ok(true) => vk::Result::SUBOPTIMAL_KHR,
            Err(code) => code,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> SwapChainState {
        self.state
    }

    /// Number of realizations so far; 0 before the first
    pub fn generation(&self) -> u64 {
        match self.state {
            SwapChainState::Realized { generation } => generation,
            _ => 0,
        }
    }

    /// Number of presentable images; fixed until the next realize
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Presentable images in acquire-index order
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Views over the presentable images
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Negotiated colour format and colour space
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Negotiated colour format
    pub fn color_format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Negotiated depth format
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Present mode of the current generation
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Raw swapchain handle; null until realized
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Attached surface
    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        self.destroy_chain();
        // surface field drops after the chain that references it
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        }
    }

    #[test]
    fn test_surface_format_prefers_bgra_unorm() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_SRGB),
            surface_format(vk::Format::A2B10G10R10_UNORM_PACK32),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_SRGB);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_undefined_surface_format_means_any() {
        let formats = [surface_format(vk::Format::UNDEFINED)];
        assert_eq!(choose_surface_format(&formats).unwrap().format, PREFERRED_COLOR_FORMAT);
    }

    #[test]
    fn test_present_mode_selection() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_image_count_clamped_to_maximum() {
        let mut caps = caps();
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 0;
        caps.min_image_count = 5;
        assert_eq!(choose_image_count(&caps), 6);
    }

    #[test]
    fn test_image_count_is_stable_for_same_caps() {
        let caps = caps();
        assert_eq!(choose_image_count(&caps), choose_image_count(&caps));
    }

    #[test]
    fn test_extent_uses_current_unless_wildcard() {
        let mut caps = caps();
        assert_eq!(choose_extent(&caps, 800, 600), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(choose_extent(&caps, 10_000, 0), vk::Extent2D { width: 4096, height: 1 });

        caps.current_extent = vk::Extent2D { width: 1280, height: 720 };
        assert_eq!(choose_extent(&caps, 800, 600), vk::Extent2D { width: 1280, height: 720 });
    }

    #[test]
    fn test_transform_and_composite_alpha_preferences() {
        let mut caps = caps();
        caps.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        caps.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(choose_pre_transform(&caps), vk::SurfaceTransformFlagsKHR::ROTATE_90);

        caps.supported_composite_alpha =
            vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED;
        assert_eq!(choose_composite_alpha(&caps), vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED);

        caps.supported_composite_alpha = vk::CompositeAlphaFlagsKHR::empty();
        assert_eq!(choose_composite_alpha(&caps), vk::CompositeAlphaFlagsKHR::OPAQUE);
    }

    #[test]
    fn test_present_family_must_match_graphics() {
        assert_eq!(resolve_present_family(0, 2, |_| Ok(true)).unwrap(), 0);

        let err = resolve_present_family(0, 3, |family| Ok(family == 2)).unwrap_err();
        assert!(matches!(err, VulkanError::SeparatePresentQueue { graphics: 0, present: 2 }));

        let err = resolve_present_family(1, 3, |_| Ok(false)).unwrap_err();
        assert!(matches!(err, VulkanError::NoPresentQueue));
    }
}
