//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for semaphores and fences. The frame loop keeps one fence
//! per swapchain image and two semaphores shared by every frame; uploads
//! create a throwaway fence per submission.

use ash::vk;
use std::sync::Arc;

use crate::render::backends::vulkan::{Device, VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
///
/// Semaphores are signaled by one operation and waited on by another:
/// - Image acquisition signals → Rendering waits
/// - Rendering signals → Presentation waits
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Arc<Device>) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device.handle().create_semaphore(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Arc<Device>, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device.handle().create_fence(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, fence })
    }

    /// Wait for the fence; `u64::MAX` waits forever
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device.handle().wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Reset fence to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device.handle().reset_fences(&[self.fence])
                .map_err(VulkanError::Api)
        }
    }

    /// Whether the fence is currently signaled
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        unsafe {
            self.device.handle().get_fence_status(self.fence)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}
