//! Shared setup for driver-backed tests

use std::sync::Arc;

use crate::core::{DeviceConfig, InstanceConfig};
use crate::render::backends::vulkan::{Device, VulkanInstance};

/// Headless instance and default device, or `None` without a usable driver
pub(crate) fn headless_device() -> Option<(Arc<VulkanInstance>, Arc<Device>)> {
    crate::foundation::logging::init();

    let config = InstanceConfig::new("vulkan_baselib-tests")
        .with_headless(true)
        .with_validation(false);
    let instance = match VulkanInstance::new(&config, None) {
        Ok(instance) => instance,
        Err(e) => {
            log::warn!("Skipping GPU test, no Vulkan instance: {e}");
            return None;
        }
    };

    match Device::new(Arc::clone(&instance), &DeviceConfig::default()) {
        Ok(device) => Some((instance, device)),
        Err(e) => {
            log::warn!("Skipping GPU test, no Vulkan device: {e}");
            None
        }
    }
}
