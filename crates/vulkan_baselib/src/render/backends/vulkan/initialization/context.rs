//! Vulkan context management
//!
//! Loads the Vulkan entry points and owns the instance, the surface
//! extension loaders and the validation-layer debug messenger. Everything
//! else in the crate holds an `Arc<VulkanInstance>` (directly or through a
//! [`Device`](super::Device)) so the instance is always destroyed last.

use ash::{Entry, Instance};
use ash::extensions::ext::{DebugUtils, HeadlessSurface};
use ash::extensions::khr::Surface as SurfaceLoader;
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;
use thiserror::Error;

use crate::core::InstanceConfig;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type satisfies the requested property flags
    #[error("No suitable memory type found (type bits {type_bits:#x}, properties {properties:?})")]
    NoSuitableMemoryType {
        /// Memory type bits allowed by the resource
        type_bits: u32,
        /// Property flags that were required
        properties: vk::MemoryPropertyFlags,
    },

    /// No queue family supports the requested flags
    #[error("No queue family supports {flags:?}")]
    NoQueueFamily {
        /// Flags that were requested
        flags: vk::QueueFlags,
    },

    /// None of the candidate depth formats is supported
    #[error("No supported depth format found")]
    NoDepthFormat,

    /// No queue family can present to the surface
    #[error("No queue family supports presentation to the surface")]
    NoPresentQueue,

    /// Graphics and present resolve to different queue families
    #[error("Separate graphics ({graphics}) and present ({present}) queue families are not supported")]
    SeparatePresentQueue {
        /// Graphics queue family index
        graphics: u32,
        /// Present-capable queue family index
        present: u32,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    surface_loader: SurfaceLoader,
    headless_loader: Option<HeadlessSurface>,
    debug_messenger: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    enabled_extensions: Vec<String>,
}

impl VulkanInstance {
    /// Create a new Vulkan instance
    ///
    /// `display` selects the platform surface extensions through `ash-window`;
    /// pass `None` for headless or offscreen use.
    pub fn new(config: &InstanceConfig, display: Option<RawDisplayHandle>) -> VulkanResult<Arc<Self>> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {e}")))?;
        let engine_name = CString::new("vulkan_baselib")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        #[allow(unused_unsafe)]
        let available: Vec<String> = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(VulkanError::Api)?
            .iter()
            .map(|ext| raw_name_to_string(&ext.extension_name))
            .collect();

        let mut wanted: Vec<&CStr> = Vec::new();
        if let Some(display) = display {
            let platform = ash_window::enumerate_required_extensions(display)
                .map_err(VulkanError::Api)?;
            for &name in platform {
                wanted.push(unsafe { CStr::from_ptr(name) });
            }
        } else {
            wanted.push(SurfaceLoader::name());
        }
        if config.headless {
            wanted.push(HeadlessSurface::name());
        }
        let validation = config.validation_enabled();
        if validation {
            wanted.push(DebugUtils::name());
        }

        let enabled = filter_supported(&wanted, &available);
        let extension_ptrs: Vec<*const c_char> = enabled.iter().map(|name| name.as_ptr()).collect();
        let enabled_extensions: Vec<String> = enabled
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect();

        let layers = if validation && Self::has_validation_layer(&entry)? {
            vec![CString::new(VALIDATION_LAYER).map_err(|e| VulkanError::InitializationFailed(e.to_string()))?]
        } else {
            if validation {
                log::warn!("{VALIDATION_LAYER} requested but not present, continuing without it");
            }
            Vec::new()
        };
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let surface_loader = SurfaceLoader::new(&entry, &instance);
        let has = |name: &CStr| enabled_extensions.iter().any(|e| e.as_bytes() == name.to_bytes());
        let headless_loader = has(HeadlessSurface::name()).then(|| HeadlessSurface::new(&entry, &instance));

        let debug_messenger = if has(DebugUtils::name()) {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    log::warn!("Failed to create debug messenger: {e}");
                    None
                }
            }
        } else {
            None
        };

        log::info!(
            "Created Vulkan instance for '{}' with extensions {:?}",
            config.application_name,
            enabled_extensions
        );

        Ok(Arc::new(Self {
            entry,
            instance,
            surface_loader,
            headless_loader,
            debug_messenger,
            enabled_extensions,
        }))
    }

    fn has_validation_layer(entry: &Entry) -> VulkanResult<bool> {
        #[allow(unused_unsafe)]
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(VulkanError::Api)?;
        Ok(layers.iter().any(|layer| raw_name_to_string(&layer.layer_name) == VALIDATION_LAYER))
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Get a reference to the Vulkan entry
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Get a reference to the raw instance
    pub fn handle(&self) -> &Instance {
        &self.instance
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &SurfaceLoader {
        &self.surface_loader
    }

    /// Headless surface loader, present when the extension was enabled
    pub fn headless_loader(&self) -> Option<&HeadlessSurface> {
        self.headless_loader.as_ref()
    }

    /// Names of the instance extensions that were enabled
    pub fn enabled_extensions(&self) -> &[String] {
        &self.enabled_extensions
    }

    /// Whether the validation debug messenger is active
    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// All physical devices visible to this instance
    pub fn physical_devices(&self) -> VulkanResult<Vec<vk::PhysicalDevice>> {
        unsafe {
            self.instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)
        }
    }

    /// Human-readable name of a physical device
    pub fn device_name(&self, physical_device: vk::PhysicalDevice) -> String {
        let properties = unsafe { self.instance.get_physical_device_properties(physical_device) };
        raw_name_to_string(&properties.device_name)
    }

    /// Select a physical device
    ///
    /// Returns the first device whose name contains `name_hint`, otherwise
    /// the first enumerated device.
    pub fn pick_physical_device(&self, name_hint: Option<&str>) -> VulkanResult<vk::PhysicalDevice> {
        let devices = self.physical_devices()?;
        let names: Vec<String> = devices.iter().map(|&d| self.device_name(d)).collect();

        let index = select_device_index(&names, name_hint).ok_or_else(|| {
            VulkanError::InitializationFailed("No device with Vulkan support found".to_string())
        })?;

        log::info!("Selected GPU: {}", names[index]);
        Ok(devices[index])
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan instance destroyed");
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Convert a fixed-size, nul-terminated name from a Vulkan struct
pub(crate) fn raw_name_to_string(raw: &[c_char]) -> String {
    #[allow(clippy::cast_sign_loss)]
    let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Keep the wanted names that appear in `available`, warning about the rest
fn filter_supported<'a>(wanted: &[&'a CStr], available: &[String]) -> Vec<&'a CStr> {
    let mut enabled: Vec<&CStr> = Vec::new();
    for &name in wanted {
        let text = name.to_string_lossy();
        if !available.iter().any(|a| *a == text) {
            log::warn!("Instance extension {text} is not supported");
        } else if !enabled.contains(&name) {
            enabled.push(name);
        }
    }
    enabled
}

fn select_device_index(names: &[String], name_hint: Option<&str>) -> Option<usize> {
    if names.is_empty() {
        return None;
    }
    name_hint
        .and_then(|hint| names.iter().position(|name| name.contains(hint)))
        .or(Some(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_raw(name: &str) -> [c_char; 256] {
        let mut raw = [0 as c_char; 256];
        for (dst, src) in raw.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }
        raw
    }

    #[test]
    fn test_raw_name_stops_at_nul() {
        assert_eq!(raw_name_to_string(&to_raw("VK_KHR_surface")), "VK_KHR_surface");
        assert_eq!(raw_name_to_string(&to_raw("")), "");
    }

    #[test]
    fn test_unsupported_extensions_are_skipped() {
        let available = vec!["VK_KHR_surface".to_string()];
        let wanted = [SurfaceLoader::name(), HeadlessSurface::name(), SurfaceLoader::name()];
        let enabled = filter_supported(&wanted, &available);
        assert_eq!(enabled, vec![SurfaceLoader::name()]);
    }

    #[test]
    fn test_device_selection_prefers_hint_then_first() {
        let names = vec!["llvmpipe".to_string(), "NVIDIA GeForce".to_string()];
        assert_eq!(select_device_index(&names, Some("NVIDIA")), Some(1));
        assert_eq!(select_device_index(&names, Some("Radeon")), Some(0));
        assert_eq!(select_device_index(&names, None), Some(0));
        assert_eq!(select_device_index(&[], None), None);
    }
}
