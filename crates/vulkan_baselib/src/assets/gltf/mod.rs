//! glTF 2.0 ingestion
//!
//! [`GltfDocument`] parses `.gltf` and `.glb` files and resolves their
//! buffers on the CPU. [`GltfLoader::plan`] validates every primitive without
//! a device, and [`GltfLoader`] then turns the plan into a
//! [`MeshInstance`](crate::render::MeshInstance) plus its materials,
//! uploading every accessor through the staging path.

pub mod accessor;
pub mod document;
mod loader;

pub use accessor::{attribute_format, index_type, read_accessor, topology, AccessorData};
pub use document::GltfDocument;
pub use loader::{GltfLoader, LoadedModel, PlannedAttribute, PrimitivePlan};

use thiserror::Error;

use crate::render::backends::vulkan::{TextureError, VulkanError};

/// glTF loading errors
#[derive(Error, Debug)]
pub enum GltfError {
    /// Reading the asset or an external resource failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The JSON document is invalid
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A data URI is not valid base64
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The document violates the glTF structure
    #[error("Malformed glTF: {0}")]
    Malformed(String),

    /// Valid glTF the loader does not handle
    #[error("Unsupported glTF feature: {0}")]
    Unsupported(String),

    /// An image could not be decoded or uploaded
    #[error("Texture error: {0}")]
    Texture(#[from] TextureError),

    /// GPU upload failed
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}
