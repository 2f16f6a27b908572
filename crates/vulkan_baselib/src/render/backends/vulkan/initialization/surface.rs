//! Vulkan surface management
//!
//! Handles presentation surface creation and queries. The windowing layer
//! owns the window; this wrapper owns the `VkSurfaceKHR` created for it.

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::context::{VulkanError, VulkanInstance, VulkanResult};

/// Vulkan surface wrapper for presentation
pub struct Surface {
    surface: vk::SurfaceKHR,
    instance: Arc<VulkanInstance>,
}

impl Surface {
    /// Create a surface from raw platform handles
    pub fn from_raw_handles(
        instance: &Arc<VulkanInstance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VulkanResult<Self> {
        let surface = unsafe {
            ash_window::create_surface(instance.entry(), instance.handle(), display, window, None)
                .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create surface: {e:?}")))?
        };

        log::debug!("Created window surface {surface:?}");
        Ok(Self { surface, instance: Arc::clone(instance) })
    }

    /// Create a surface from a window
    pub fn from_window<W>(instance: &Arc<VulkanInstance>, window: &W) -> VulkanResult<Self>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        Self::from_raw_handles(instance, window.raw_display_handle(), window.raw_window_handle())
    }

    /// Create a headless surface (`VK_EXT_headless_surface`)
    pub fn headless(instance: &Arc<VulkanInstance>) -> VulkanResult<Self> {
        let loader = instance.headless_loader().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "VK_EXT_headless_surface was not enabled on the instance".to_string(),
        })?;

        let create_info = vk::HeadlessSurfaceCreateInfoEXT::builder();
        let surface = unsafe {
            loader.create_headless_surface(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!("Created headless surface {surface:?}");
        Ok(Self { surface, instance: Arc::clone(instance) })
    }

    /// Take ownership of a surface created elsewhere
    ///
    /// # Safety
    /// `surface` must have been created from `instance` and must not be
    /// destroyed by anyone else.
    pub unsafe fn from_handle(instance: &Arc<VulkanInstance>, surface: vk::SurfaceKHR) -> Self {
        Self { surface, instance: Arc::clone(instance) }
    }

    /// Get the underlying surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get surface capabilities for a physical device
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.instance.surface_loader()
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Get surface formats for a physical device
    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.instance.surface_loader()
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Get surface present modes for a physical device
    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.instance.surface_loader()
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Check if a queue family supports presentation to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family_index: u32) -> VulkanResult<bool> {
        unsafe {
            self.instance.surface_loader()
                .get_physical_device_surface_support(physical_device, queue_family_index, self.surface)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance.surface_loader().destroy_surface(self.surface, None);
        }
    }
}
