//! Vulkan resource management
//!
//! Buffers, images and textures, each owning its handle and backing memory
//! and holding the device they were created from.

/// Buffers with owned memory
pub mod buffer;

/// Device-local images with layout tracking
pub mod image;

/// Sampled textures
pub mod texture;

pub use buffer::Buffer;
pub use image::{layout_access_and_stage, Image, ImageDesc};
pub use texture::{Texture, TextureError, TEXTURE_FORMAT};
