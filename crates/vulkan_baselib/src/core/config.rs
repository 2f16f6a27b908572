//! # Configuration
//!
//! Serializable settings for each layer of the Vulkan core: instance creation,
//! logical device realization and the frame loop. All of them have defaults
//! that work for a windowed demo, and `with_*` builders for code-side tweaks.
//!
//! ```toml
//! [instance]
//! application_name = "gltf viewer"
//! enable_validation = true
//!
//! [device]
//! preferred_device = "NVIDIA"
//!
//! [view]
//! vsync = false
//! ```

use ash::vk;
use serde::{Serialize, Deserialize};

pub use crate::config::{Config, ConfigError};

/// # Instance Configuration
///
/// Application metadata and the instance-level layers and extensions to enable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Enable `VK_EXT_headless_surface` so surfaces can exist without a window
    pub headless: bool,
}

impl InstanceConfig {
    /// Create a new instance configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            enable_validation: None,
            headless: false,
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Request the headless surface extension
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Resolved validation setting
    ///
    /// Enabled in debug builds and disabled in release builds unless set explicitly.
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self::new("Vulkan Baselib Application")
    }
}

/// Queue capabilities requested from the logical device
///
/// A graphics queue is always created; it owns the default command pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueRequest {
    /// Compute queue, dedicated when the hardware has one
    pub compute: bool,
    /// Transfer queue, dedicated when the hardware has one
    pub transfer: bool,
}

impl QueueRequest {
    /// Convert into Vulkan queue flags, graphics included
    pub fn to_flags(self) -> vk::QueueFlags {
        let mut flags = vk::QueueFlags::GRAPHICS;
        if self.compute {
            flags |= vk::QueueFlags::COMPUTE;
        }
        if self.transfer {
            flags |= vk::QueueFlags::TRANSFER;
        }
        flags
    }
}

impl Default for QueueRequest {
    fn default() -> Self {
        Self { compute: true, transfer: true }
    }
}

/// # Device Configuration
///
/// Controls physical device selection and logical device realization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Queue families to resolve
    pub queues: QueueRequest,
    /// Enable `VK_KHR_swapchain`; off for pure offscreen or transfer work
    pub enable_swapchain: bool,
    /// Substring of the preferred physical device name
    pub preferred_device: Option<String>,
    /// Enable anisotropic filtering when the device supports it
    pub sampler_anisotropy: bool,
    /// Additional device extensions to enable when supported
    pub extra_extensions: Vec<String>,
}

impl DeviceConfig {
    /// Set the requested queues
    pub fn with_queues(mut self, queues: QueueRequest) -> Self {
        self.queues = queues;
        self
    }

    /// Enable or disable the swapchain extension
    pub fn with_swapchain(mut self, enabled: bool) -> Self {
        self.enable_swapchain = enabled;
        self
    }

    /// Prefer the first device whose name contains `name`
    pub fn with_preferred_device(mut self, name: impl Into<String>) -> Self {
        self.preferred_device = Some(name.into());
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            queues: QueueRequest::default(),
            enable_swapchain: true,
            preferred_device: None,
            sampler_anisotropy: true,
            extra_extensions: Vec::new(),
        }
    }
}

/// Camera home position in world space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraHome {
    /// Eye position
    pub eye: [f32; 3],
    /// Point looked at
    pub target: [f32; 3],
    /// Approximate up direction
    pub up: [f32; 3],
}

impl Default for CameraHome {
    fn default() -> Self {
        Self {
            eye: [0.0, -30.0, 0.0],
            target: [0.0, 0.0, 0.0],
            up: [0.0, 0.0, 1.0],
        }
    }
}

/// # View Configuration
///
/// Frame-loop behaviour of [`View`](crate::render::view::View).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Wait for vertical blank when presenting
    pub vsync: bool,
    /// Colour the render pass clears to
    pub clear_color: [f32; 4],
    /// Camera home used at start-up and on `home()`
    pub camera: CameraHome,
}

impl ViewConfig {
    /// Enable or disable vsync
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Set the clear colour
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            clear_color: [0.025, 0.025, 0.025, 1.0],
            camera: CameraHome::default(),
        }
    }
}

/// # Baselib Configuration
///
/// Everything needed to bring up an instance, a device and a view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselibConfig {
    /// Instance settings
    pub instance: InstanceConfig,
    /// Device settings
    pub device: DeviceConfig,
    /// Frame-loop settings
    pub view: ViewConfig,
}

impl Config for BaselibConfig {}

impl BaselibConfig {
    /// Load from a `.toml` or `.ron` file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        Self::load_from_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_queue_request_covers_all_families() {
        let flags = QueueRequest::default().to_flags();
        assert!(flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER));
    }

    #[test]
    fn test_graphics_is_always_requested() {
        let flags = QueueRequest { compute: false, transfer: false }.to_flags();
        assert_eq!(flags, vk::QueueFlags::GRAPHICS);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BaselibConfig::from_toml_str(
            r#"
[instance]
application_name = "viewer"
enable_validation = false

[view]
vsync = false
"#,
        ).unwrap();

        assert_eq!(config.instance.application_name, "viewer");
        assert!(!config.instance.validation_enabled());
        assert!(!config.view.vsync);
        assert!(config.device.enable_swapchain);
        assert_eq!(config.view.camera, CameraHome::default());
    }

    #[test]
    fn test_ron_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("baselib_config_{}.ron", std::process::id()));
        let config = BaselibConfig {
            device: DeviceConfig::default().with_preferred_device("llvmpipe"),
            view: ViewConfig::default().with_vsync(false),
            ..Default::default()
        };

        config.save_to_file(&path).unwrap();
        let loaded = BaselibConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.device.preferred_device.as_deref(), Some("llvmpipe"));
        assert!(!loaded.view.vsync);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = BaselibConfig::load("settings.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }
}
