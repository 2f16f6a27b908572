//! Asset ingestion

pub mod gltf;

pub use gltf::{GltfDocument, GltfError, GltfLoader, LoadedModel};
