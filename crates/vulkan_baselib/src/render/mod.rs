//! # Rendering
//!
//! Everything that touches the GPU lives under this module.
//!
//! ## Layout
//!
//! - **backends::vulkan**: instance, device, swapchain, buffers, images,
//!   pipelines and command recording as thin RAII wrappers over `ash`
//! - **primitives**: drawable geometry ([`MeshPrimitive`], [`MeshInstance`]),
//!   materials, shader-visible data layouts and the camera [`Manipulator`]
//! - **view**: the [`View`] frame loop and the [`Scene`] it hosts
//!
//! Every GPU object holds an `Arc<Device>`, so the device outlives all
//! resources created from it regardless of drop order elsewhere.

pub mod backends;
pub mod primitives;
pub mod view;

pub use backends::vulkan::{Device, VulkanError, VulkanInstance, VulkanResult};
pub use primitives::{Manipulator, Material, MeshInstance, MeshPrimitive};
pub use view::{FrameInfo, FrameStats, Overlay, RenderTarget, Scene, View};
