//! # Vulkan Baselib
//!
//! A small Vulkan core for rendering demos: device and queue setup, a
//! swapchain with format and present-mode negotiation, a frame loop that
//! hosts one scene, GPU buffers and images with staging uploads, and glTF
//! mesh ingestion.
//!
//! ## Features
//!
//! - **Device**: queue-family resolution, memory-type search, depth format
//!   selection, one-shot command submission
//! - **SwapChain**: surface negotiation and generation-counted recreation
//! - **View**: acquire, submit and present with prerecorded command buffers
//! - **Resources**: RAII buffers, images and textures tied to the device
//! - **Meshes**: per-attribute vertex streams drawn with indexed draws
//! - **glTF**: `.gltf` and `.glb` loading with materials and node transforms
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use vulkan_baselib::prelude::*;
//!
//! struct Empty;
//!
//! impl Scene for Empty {
//!     fn resize(&mut self, _target: &RenderTarget) -> VulkanResult<()> {
//!         Ok(())
//!     }
//!
//!     fn update_scene(&mut self, _frame: &FrameInfo) -> bool {
//!         false
//!     }
//!
//!     fn build_command_buffer(&self, _cmd: vk::CommandBuffer) {}
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     vulkan_baselib::foundation::logging::init();
//!
//!     let config = BaselibConfig::default();
//!     let instance = VulkanInstance::new(&config.instance.clone().with_headless(true), None)?;
//!     let device = Device::new(Arc::clone(&instance), &config.device)?;
//!
//!     let mut view = View::new(&device, Empty, config.view)?;
//!     view.set_surface(Surface::headless(&instance)?, 800, 600)?;
//!     view.update()?;
//!     view.render()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod assets;
pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for crate users
pub mod prelude {
    pub use crate::{
        assets::{GltfDocument, GltfError, GltfLoader, LoadedModel},
        core::{BaselibConfig, CameraHome, Config, DeviceConfig, InstanceConfig, QueueRequest, ViewConfig},
        foundation::math::{Mat4, Transform, Vec3},
        render::backends::vulkan::{
            Buffer, Device, Image, ImageDesc, Surface, SwapChain, Texture, VulkanError, VulkanInstance,
            VulkanResult,
        },
        render::primitives::{Manipulator, Material, MeshInstance, MeshPrimitive, PbrFactors, Sphere},
        render::view::{FrameInfo, FrameStats, Overlay, RenderTarget, Scene, View},
    };
}

#[cfg(test)]
mod tests;
